//! Entities owned by the progression engine.

pub mod chapter;
pub mod quest;
pub mod vote;

pub use chapter::{Chapter, ChapterOptions};
pub use quest::{PathStep, Quest, QuestState, QuestStatus};
pub use vote::{MatchKind, NewVote, Vote, Voter, clamp_weight};
