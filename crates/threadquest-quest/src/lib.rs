//! Threadquest — Quest Progression bounded context.
//!
//! Responsible for starting quests, collecting and tallying votes,
//! advancing chapters exactly once per voting round, and repairing quests
//! whose deadline passed while the process was down.

pub mod application;
pub mod domain;
