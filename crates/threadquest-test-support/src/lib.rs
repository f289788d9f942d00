//! Shared test fakes and utilities for the threadquest bot.

mod clock;
mod generator;
mod rng;
mod scheduler;
mod social;
mod store;

pub use clock::{FixedClock, ManualClock};
pub use generator::ScriptedGenerator;
pub use rng::{MockRng, SequenceRng};
pub use scheduler::{RecordingScheduler, ScheduledCall};
pub use social::{PostedMessage, RecordingSocialClient};
pub use store::{FailingQuestStore, InMemoryQuestStore};
