//! Threadquest Core — shared domain model and collaborator contracts.
//!
//! This crate defines the quest/chapter/vote model and the traits that the
//! progression engine depends on (store, generator, social client,
//! scheduler). It contains no infrastructure code.

pub mod clock;
pub mod error;
pub mod generator;
pub mod model;
pub mod rng;
pub mod scheduler;
pub mod social;
pub mod store;
