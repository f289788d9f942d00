//! Test stores — in-memory `QuestStore` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use threadquest_core::error::DomainError;
use threadquest_core::model::{Chapter, NewVote, Quest, QuestStatus, Vote, Voter};
use threadquest_core::store::QuestStore;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    quests: HashMap<Uuid, Quest>,
    chapters: Vec<Chapter>,
    voters: HashMap<String, Voter>,
    votes: Vec<Vote>,
    quest_updates: usize,
}

/// A `QuestStore` held in memory that enforces the same constraints as the
/// Postgres store: one ACTIVE quest per conversation, unique chapter numbers
/// per quest, one vote per voter per chapter, and conditional quest updates.
#[derive(Debug, Default)]
pub struct InMemoryQuestStore {
    inner: Mutex<Inner>,
}

impl InMemoryQuestStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a quest directly, bypassing the uniqueness checks.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_quest(&self, quest: Quest) {
        self.inner.lock().unwrap().quests.insert(quest.id, quest);
    }

    /// Seeds a chapter directly.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_chapter(&self, chapter: Chapter) {
        self.inner.lock().unwrap().chapters.push(chapter);
    }

    /// Returns a snapshot of a quest.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn quest(&self, quest_id: Uuid) -> Option<Quest> {
        self.inner.lock().unwrap().quests.get(&quest_id).cloned()
    }

    /// Returns every stored quest.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn quests(&self) -> Vec<Quest> {
        self.inner.lock().unwrap().quests.values().cloned().collect()
    }

    /// Returns a quest's chapters ordered by number.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn chapters(&self, quest_id: Uuid) -> Vec<Chapter> {
        let inner = self.inner.lock().unwrap();
        let mut chapters: Vec<Chapter> = inner
            .chapters
            .iter()
            .filter(|c| c.quest_id == quest_id)
            .cloned()
            .collect();
        chapters.sort_by_key(|c| c.chapter_number);
        chapters
    }

    /// Returns every stored vote.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn votes(&self) -> Vec<Vote> {
        self.inner.lock().unwrap().votes.clone()
    }

    /// Number of successful `update_quest` calls.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn quest_updates(&self) -> usize {
        self.inner.lock().unwrap().quest_updates
    }
}

#[async_trait]
impl QuestStore for InMemoryQuestStore {
    async fn create_quest(
        &self,
        quest: &Quest,
        opening_chapter: &Chapter,
    ) -> Result<(), DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let conflict = inner.quests.values().any(|q| {
            q.status == QuestStatus::Active && q.conversation_id == quest.conversation_id
        });
        if conflict {
            return Err(DomainError::QuestAlreadyActive {
                conversation_id: quest.conversation_id.clone(),
            });
        }
        inner.quests.insert(quest.id, quest.clone());
        inner.chapters.push(opening_chapter.clone());
        Ok(())
    }

    async fn get_quest(&self, quest_id: Uuid) -> Result<Option<Quest>, DomainError> {
        Ok(self.quest(quest_id))
    }

    async fn find_active_quest_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Quest>, DomainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .quests
            .values()
            .find(|q| q.status == QuestStatus::Active && q.conversation_id == conversation_id)
            .cloned())
    }

    async fn list_active_quests(&self) -> Result<Vec<Quest>, DomainError> {
        let inner = self.inner.lock().unwrap();
        let mut quests: Vec<Quest> = inner
            .quests
            .values()
            .filter(|q| q.status == QuestStatus::Active)
            .cloned()
            .collect();
        quests.sort_by_key(|q| q.created_at);
        Ok(quests)
    }

    async fn update_quest(
        &self,
        quest: &Quest,
        expected_chapter_number: u32,
    ) -> Result<(), DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let stored = inner
            .quests
            .get_mut(&quest.id)
            .ok_or(DomainError::QuestNotFound(quest.id))?;
        if stored.current_chapter_number != expected_chapter_number {
            return Err(DomainError::ConcurrencyConflict {
                quest_id: quest.id,
                expected: expected_chapter_number,
                actual: stored.current_chapter_number,
            });
        }
        *stored = quest.clone();
        inner.quest_updates += 1;
        Ok(())
    }

    async fn list_chapters(&self, quest_id: Uuid) -> Result<Vec<Chapter>, DomainError> {
        Ok(self.chapters(quest_id))
    }

    async fn create_chapter_if_absent(&self, chapter: &Chapter) -> Result<bool, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let exists = inner.chapters.iter().any(|c| {
            c.quest_id == chapter.quest_id && c.chapter_number == chapter.chapter_number
        });
        if exists {
            return Ok(false);
        }
        inner.chapters.push(chapter.clone());
        Ok(true)
    }

    async fn mark_chapter_posted(
        &self,
        chapter_id: Uuid,
        message_id: &str,
    ) -> Result<(), DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let chapter = inner
            .chapters
            .iter_mut()
            .find(|c| c.id == chapter_id)
            .ok_or_else(|| DomainError::Infrastructure(format!("no chapter {chapter_id}")))?;
        message_id.clone_into(&mut chapter.posted_message_id);
        Ok(())
    }

    async fn record_vote(&self, vote: &NewVote, now: DateTime<Utc>) -> Result<Vote, DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let voter = inner
            .voters
            .entry(vote.voter_handle.clone())
            .or_insert_with(|| Voter {
                id: Uuid::new_v4(),
                handle: vote.voter_handle.clone(),
                created_at: now,
            })
            .clone();
        let duplicate = inner
            .votes
            .iter()
            .any(|v| v.chapter_id == vote.chapter_id && v.voter_id == voter.id);
        if duplicate {
            return Err(DomainError::AlreadyVoted {
                chapter_id: vote.chapter_id,
                voter_handle: vote.voter_handle.clone(),
            });
        }
        let recorded = Vote {
            id: Uuid::new_v4(),
            chapter_id: vote.chapter_id,
            voter_id: voter.id,
            voter_handle: voter.handle,
            selected_option: vote.selected_option,
            weight: vote.weight,
            reply_text: vote.reply_text.clone(),
            reply_message_id: vote.reply_message_id.clone(),
            note: vote.note.clone(),
            recorded_at: now,
        };
        inner.votes.push(recorded.clone());
        Ok(recorded)
    }

    async fn list_votes(&self, chapter_id: Uuid) -> Result<Vec<Vote>, DomainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .votes
            .iter()
            .filter(|v| v.chapter_id == chapter_id)
            .cloned()
            .collect())
    }
}

/// A quest store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingQuestStore;

fn connection_refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

#[async_trait]
impl QuestStore for FailingQuestStore {
    async fn create_quest(&self, _quest: &Quest, _chapter: &Chapter) -> Result<(), DomainError> {
        Err(connection_refused())
    }

    async fn get_quest(&self, _quest_id: Uuid) -> Result<Option<Quest>, DomainError> {
        Err(connection_refused())
    }

    async fn find_active_quest_by_conversation(
        &self,
        _conversation_id: &str,
    ) -> Result<Option<Quest>, DomainError> {
        Err(connection_refused())
    }

    async fn list_active_quests(&self) -> Result<Vec<Quest>, DomainError> {
        Err(connection_refused())
    }

    async fn update_quest(&self, _quest: &Quest, _expected: u32) -> Result<(), DomainError> {
        Err(connection_refused())
    }

    async fn list_chapters(&self, _quest_id: Uuid) -> Result<Vec<Chapter>, DomainError> {
        Err(connection_refused())
    }

    async fn create_chapter_if_absent(&self, _chapter: &Chapter) -> Result<bool, DomainError> {
        Err(connection_refused())
    }

    async fn mark_chapter_posted(&self, _id: Uuid, _message_id: &str) -> Result<(), DomainError> {
        Err(connection_refused())
    }

    async fn record_vote(&self, _vote: &NewVote, _now: DateTime<Utc>) -> Result<Vote, DomainError> {
        Err(connection_refused())
    }

    async fn list_votes(&self, _chapter_id: Uuid) -> Result<Vec<Vote>, DomainError> {
        Err(connection_refused())
    }
}
