//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A quest was not found.
    #[error("quest not found: {0}")]
    QuestNotFound(Uuid),

    /// A quest exists but has no chapter with the requested number.
    #[error("chapter {chapter_number} not found for quest {quest_id}")]
    ChapterNotFound {
        /// The quest that was searched.
        quest_id: Uuid,
        /// The missing chapter number.
        chapter_number: u32,
    },

    /// Conditional quest update lost a race.
    #[error(
        "concurrency conflict on quest {quest_id}: expected chapter {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The quest that had the conflict.
        quest_id: Uuid,
        /// The chapter number the writer expected.
        expected: u32,
        /// The chapter number found in the store.
        actual: u32,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// The voter already has a vote recorded for this chapter.
    #[error("voter {voter_handle} already voted on chapter {chapter_id}")]
    AlreadyVoted {
        /// The chapter voted on.
        chapter_id: Uuid,
        /// The repeat voter.
        voter_handle: String,
    },

    /// An ACTIVE quest already exists for the conversation.
    #[error("a quest is already active in conversation {conversation_id}")]
    QuestAlreadyActive {
        /// The originating conversation.
        conversation_id: String,
    },

    /// The narrative generator failed or returned unusable output.
    #[error("generation error: {0}")]
    Generation(String),

    /// The social platform rejected or failed a request.
    #[error("social client error: {0}")]
    Social(String),

    /// A delayed task could not be submitted.
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for failures that a later delivery of the same task may
    /// succeed on (external services, persistence, lost races).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. }
                | Self::Generation(_)
                | Self::Social(_)
                | Self::Scheduling(_)
                | Self::Infrastructure(_)
        )
    }
}
