//! Quest store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;
use crate::model::{Chapter, NewVote, Quest, Vote};

/// Durable persistence for quests, chapters, votes and voters.
#[async_trait]
pub trait QuestStore: Send + Sync {
    /// Persists a new quest together with its opening chapter, atomically.
    ///
    /// Fails with `DomainError::QuestAlreadyActive` if the conversation
    /// already has an ACTIVE quest.
    async fn create_quest(&self, quest: &Quest, opening_chapter: &Chapter)
    -> Result<(), DomainError>;

    /// Loads a quest by id.
    async fn get_quest(&self, quest_id: Uuid) -> Result<Option<Quest>, DomainError>;

    /// Loads the ACTIVE quest for a conversation, if any.
    async fn find_active_quest_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Quest>, DomainError>;

    /// Lists every ACTIVE quest.
    async fn list_active_quests(&self) -> Result<Vec<Quest>, DomainError>;

    /// Overwrites a quest's mutable fields, provided the stored
    /// `current_chapter_number` still equals `expected_chapter_number`.
    ///
    /// Fails with `DomainError::ConcurrencyConflict` otherwise.
    async fn update_quest(
        &self,
        quest: &Quest,
        expected_chapter_number: u32,
    ) -> Result<(), DomainError>;

    /// Lists a quest's chapters ordered by chapter number.
    async fn list_chapters(&self, quest_id: Uuid) -> Result<Vec<Chapter>, DomainError>;

    /// Inserts a chapter unless one with the same (quest, number) exists.
    /// Returns `true` if this call created it.
    async fn create_chapter_if_absent(&self, chapter: &Chapter) -> Result<bool, DomainError>;

    /// Records the message id a chapter was posted as.
    async fn mark_chapter_posted(
        &self,
        chapter_id: Uuid,
        message_id: &str,
    ) -> Result<(), DomainError>;

    /// Records a vote, creating the voter if unknown.
    ///
    /// Fails with `DomainError::AlreadyVoted` if the voter already has a vote
    /// on the chapter; the existing vote is left untouched.
    async fn record_vote(&self, vote: &NewVote, now: DateTime<Utc>) -> Result<Vote, DomainError>;

    /// Lists the votes recorded on a chapter.
    async fn list_votes(&self, chapter_id: Uuid) -> Result<Vec<Vote>, DomainError>;
}
