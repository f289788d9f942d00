//! Threadquest API — HTTP surface, configuration and external adapters.
//!
//! The binary in `main.rs` wires these pieces to PostgreSQL, the task
//! queue, the narrative generator and the X API.

pub mod adapters;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;
