//! Application layer: the progression engine and its collaborators.

pub mod engine;
pub mod query_handlers;
pub mod recovery;
pub mod task_handlers;
pub mod vote_collector;

pub use engine::{QuestEngine, QuestProgression, ResumeOutcome};
pub use recovery::{RecoveryReport, RecoveryScanner};
pub use task_handlers::CollectVotesHandler;
pub use vote_collector::{TallyOutcome, VoteCollector, VoteRecord};
