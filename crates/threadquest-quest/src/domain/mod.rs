//! Domain layer: commands, tally rules, task payloads and settings.

pub mod commands;
pub mod config;
pub mod short_id;
pub mod tally;
pub mod tasks;
