//! Query handlers for the Quest Progression context.
//!
//! Read-only views assembled straight from the store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use threadquest_core::error::DomainError;
use threadquest_core::model::{Chapter, PathStep, Quest};
use threadquest_core::store::QuestStore;
use uuid::Uuid;

/// Read-only view of one chapter.
#[derive(Debug, Serialize)]
pub struct ChapterView {
    pub chapter_number: u32,
    pub title: String,
    pub content: String,
    pub options: Vec<String>,
    pub sources: Vec<String>,
    /// Empty until the chapter is posted.
    pub posted_message_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<Chapter> for ChapterView {
    fn from(chapter: Chapter) -> Self {
        Self {
            chapter_number: chapter.chapter_number,
            title: chapter.title,
            content: chapter.content,
            options: chapter.options.to_vec(),
            sources: chapter.sources,
            posted_message_id: chapter.posted_message_id,
            created_at: chapter.created_at,
        }
    }
}

/// Read-only view of a quest and its chapters.
#[derive(Debug, Serialize)]
pub struct QuestView {
    /// The quest identifier.
    pub quest_id: Uuid,
    /// Short public id.
    pub short_id: String,
    pub conversation_id: String,
    pub author_handle: String,
    /// `ACTIVE`, `COMPLETED` or `ARCHIVED`.
    pub status: String,
    pub current_chapter_number: u32,
    pub chapter_deadline: Option<DateTime<Utc>>,
    pub title: String,
    /// Resolved votes in chapter order.
    pub path: Vec<PathStep>,
    pub chapters: Vec<ChapterView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn to_view(quest: Quest, chapters: Vec<Chapter>) -> QuestView {
    QuestView {
        quest_id: quest.id,
        short_id: quest.short_id,
        conversation_id: quest.conversation_id,
        author_handle: quest.author_handle,
        status: quest.status.as_str().to_owned(),
        current_chapter_number: quest.current_chapter_number,
        chapter_deadline: quest.chapter_deadline,
        title: quest.state.title,
        path: quest.state.path,
        chapters: chapters.into_iter().map(ChapterView::from).collect(),
        created_at: quest.created_at,
        updated_at: quest.updated_at,
    }
}

/// Retrieves a quest with its chapters.
///
/// # Errors
///
/// Returns `DomainError::QuestNotFound` if no quest has the ID, and any
/// store failure.
pub async fn get_quest_by_id(
    quest_id: Uuid,
    store: &dyn QuestStore,
) -> Result<QuestView, DomainError> {
    let quest = store
        .get_quest(quest_id)
        .await?
        .ok_or(DomainError::QuestNotFound(quest_id))?;
    let chapters = store.list_chapters(quest_id).await?;
    Ok(to_view(quest, chapters))
}

/// Lists every ACTIVE quest, oldest first, without chapters.
///
/// # Errors
///
/// Returns any store failure.
pub async fn list_active_quests(store: &dyn QuestStore) -> Result<Vec<QuestView>, DomainError> {
    Ok(store
        .list_active_quests()
        .await?
        .into_iter()
        .map(|q| to_view(q, Vec::new()))
        .collect())
}
