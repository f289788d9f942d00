//! The quest entity and its lifecycle transitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Current schema version of [`QuestState`].
pub const QUEST_STATE_VERSION: u32 = 1;

/// Persistent lifecycle status of a quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestStatus {
    /// Chapters are still being posted and voted on.
    Active,
    /// The terminal chapter has been posted.
    Completed,
    /// Administratively halted; never reached by normal progression.
    Archived,
}

impl QuestStatus {
    /// Returns the stored representation of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for QuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "COMPLETED" => Ok(Self::Completed),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(DomainError::Infrastructure(format!(
                "unknown quest status: {other}"
            ))),
        }
    }
}

/// One resolved vote along the quest's path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    /// The chapter whose vote was resolved.
    pub chapter_number: u32,
    /// The 1-based winning option.
    pub winning_option: u8,
    /// Text of the winning option.
    pub choice_text: String,
}

/// Narrative context threaded between chapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestState {
    /// Schema version of this value.
    pub schema_version: u32,
    /// Title of the quest, taken from the opening chapter.
    pub title: String,
    /// The text that seeded the quest.
    pub seed_text: String,
    /// Premise established by the opening chapter.
    pub premise: String,
    /// Resolved choices in chapter order.
    pub path: Vec<PathStep>,
}

impl QuestState {
    /// Creates the state for a freshly started quest.
    #[must_use]
    pub fn new(title: String, seed_text: String, premise: String) -> Self {
        Self {
            schema_version: QUEST_STATE_VERSION,
            title,
            seed_text,
            premise,
            path: Vec::new(),
        }
    }

    /// Records the resolved choice for a chapter, replacing any earlier
    /// record for the same chapter.
    pub fn record_choice(&mut self, step: PathStep) {
        self.path.retain(|s| s.chapter_number != step.chapter_number);
        self.path.push(step);
        self.path.sort_by_key(|s| s.chapter_number);
    }

    /// Returns the winning option recorded for `chapter_number`, if any.
    #[must_use]
    pub fn winning_option_for(&self, chapter_number: u32) -> Option<u8> {
        self.path
            .iter()
            .find(|s| s.chapter_number == chapter_number)
            .map(|s| s.winning_option)
    }

    /// Decodes a stored state document.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the document is malformed or
    /// was written by a newer schema version.
    pub fn from_json(value: serde_json::Value) -> Result<Self, DomainError> {
        let state: Self = serde_json::from_value(value)
            .map_err(|e| DomainError::Infrastructure(format!("invalid quest state: {e}")))?;
        if state.schema_version > QUEST_STATE_VERSION {
            return Err(DomainError::Infrastructure(format!(
                "unsupported quest state version {}",
                state.schema_version
            )));
        }
        Ok(state)
    }

    /// Encodes the state for storage.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        serde_json::to_value(self).expect("QuestState serialization is infallible")
    }
}

/// A crowd-voted branching narrative anchored on one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Quest {
    /// Durable identifier.
    pub id: Uuid,
    /// Short public identifier shown to users.
    pub short_id: String,
    /// The originating conversation; at most one ACTIVE quest per value.
    pub conversation_id: String,
    /// The message that triggered the quest.
    pub origin_tweet_id: String,
    /// Message chapter 1 replies to.
    pub reply_target: String,
    /// Handle of the user who started the quest.
    pub author_handle: String,
    /// Lifecycle status.
    pub status: QuestStatus,
    /// The chapter currently collecting votes (or the last one posted).
    pub current_chapter_number: u32,
    /// When voting on the current chapter closes.
    pub chapter_deadline: Option<DateTime<Utc>>,
    /// The most recently posted chapter message.
    pub last_posted_message_id: Option<String>,
    /// Narrative context carried across chapters.
    pub state: QuestState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Quest {
    /// Creates a new ACTIVE quest positioned at chapter 1, not yet posted.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        short_id: String,
        conversation_id: String,
        origin_tweet_id: String,
        reply_target: String,
        author_handle: String,
        state: QuestState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            short_id,
            conversation_id,
            origin_tweet_id,
            reply_target,
            author_handle,
            status: QuestStatus::Active,
            current_chapter_number: 1,
            chapter_deadline: None,
            last_posted_message_id: None,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns `true` if the quest is ACTIVE.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == QuestStatus::Active
    }

    /// The message the next chapter should reply to.
    #[must_use]
    pub fn reply_anchor(&self) -> &str {
        self.last_posted_message_id
            .as_deref()
            .unwrap_or(&self.reply_target)
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::Validation(format!(
                "quest {} is {}, not ACTIVE",
                self.id, self.status
            )))
        }
    }

    fn ensure_not_behind(&self, chapter_number: u32) -> Result<(), DomainError> {
        if chapter_number < self.current_chapter_number {
            return Err(DomainError::Validation(format!(
                "chapter {chapter_number} is behind quest progress ({})",
                self.current_chapter_number
            )));
        }
        Ok(())
    }

    /// Moves the quest to `chapter_number`, posted as `message_id`, with votes
    /// closing at `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the quest is not ACTIVE or the
    /// chapter is behind the quest's progress.
    pub fn await_votes(
        &mut self,
        chapter_number: u32,
        message_id: String,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.ensure_not_behind(chapter_number)?;
        self.current_chapter_number = chapter_number;
        self.last_posted_message_id = Some(message_id);
        self.chapter_deadline = Some(deadline);
        self.updated_at = now;
        Ok(())
    }

    /// Marks the quest COMPLETED after the terminal chapter was posted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the quest is not ACTIVE or the
    /// chapter is behind the quest's progress.
    pub fn complete(
        &mut self,
        chapter_number: u32,
        message_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.ensure_not_behind(chapter_number)?;
        self.current_chapter_number = chapter_number;
        self.last_posted_message_id = Some(message_id);
        self.chapter_deadline = None;
        self.status = QuestStatus::Completed;
        self.updated_at = now;
        Ok(())
    }

    /// Halts the quest out of band.
    pub fn archive(&mut self, now: DateTime<Utc>) {
        self.status = QuestStatus::Archived;
        self.chapter_deadline = None;
        self.updated_at = now;
    }
}
