//! Commands and outcomes for the Quest Progression context.

use serde::Serialize;
use uuid::Uuid;

/// Command to start a quest from a message.
#[derive(Debug, Clone)]
pub struct StartQuest {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The message that asked for the quest.
    pub origin_tweet_id: String,
    /// The conversation the message belongs to.
    pub conversation_id: String,
    /// The message chapter 1 should reply to.
    pub reply_target: String,
    /// The message the requester was replying to, if any.
    pub in_reply_to: Option<String>,
    /// Text that seeds the story.
    pub seed_text: String,
    /// Handle of the requester.
    pub author_handle: String,
}

/// Result of handling `StartQuest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new quest was created and chapter 1 posted.
    Started {
        /// The new quest.
        quest_id: Uuid,
        /// Its short public id.
        short_id: String,
    },
    /// The conversation already has an ACTIVE quest; the requester was told.
    AlreadyActive {
        /// The quest in flight.
        quest_id: Uuid,
    },
    /// The message was a vote on a posted chapter; nothing to do here.
    IgnoredVoteReply {
        /// The quest being voted on.
        quest_id: Uuid,
    },
}

/// Result of advancing a quest past a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    /// The next chapter was posted and is collecting votes.
    Advanced {
        /// The chapter now collecting votes.
        chapter_number: u32,
        /// The option that won on the previous chapter.
        winning_option: u8,
    },
    /// The terminal chapter was posted and the quest completed.
    Completed {
        /// The terminal chapter.
        chapter_number: u32,
    },
    /// A later chapter already exists; the trigger was a duplicate.
    AlreadyAdvanced,
    /// The quest is no longer ACTIVE.
    Inactive,
}
