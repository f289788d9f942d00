//! `PostgreSQL` implementation of the `QuestStore` trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use threadquest_core::error::DomainError;
use threadquest_core::model::{
    Chapter, ChapterOptions, NewVote, Quest, QuestState, QuestStatus, Vote,
};
use threadquest_core::store::QuestStore;

const ACTIVE_CONVERSATION_INDEX: &str = "uq_quests_active_conversation";

const SELECT_QUEST: &str = r"
SELECT id, short_id, conversation_id, origin_tweet_id, reply_target, author_handle,
       status, current_chapter_number, chapter_deadline, last_posted_message_id,
       state, created_at, updated_at
FROM quests";

const SELECT_CHAPTER: &str = r"
SELECT id, quest_id, chapter_number, title, content, options, sources,
       posted_message_id, created_at
FROM chapters";

/// PostgreSQL-backed quest store.
#[derive(Debug, Clone)]
pub struct PgQuestStore {
    pool: PgPool,
}

impl PgQuestStore {
    /// Creates a new `PgQuestStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(e: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(format!("database error: {e}"))
}

fn is_violation_of(e: &sqlx::Error, constraint: &str) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn to_db_int(value: u32, column: &str) -> Result<i32, DomainError> {
    i32::try_from(value)
        .map_err(|_| DomainError::Validation(format!("{column} {value} out of range")))
}

fn from_db_int(value: i32, column: &str) -> Result<u32, DomainError> {
    u32::try_from(value)
        .map_err(|_| DomainError::Infrastructure(format!("negative {column}: {value}")))
}

fn quest_from_row(row: &PgRow) -> Result<Quest, DomainError> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let current: i32 = row.try_get("current_chapter_number").map_err(db_error)?;
    let state: serde_json::Value = row.try_get("state").map_err(db_error)?;
    Ok(Quest {
        id: row.try_get("id").map_err(db_error)?,
        short_id: row.try_get("short_id").map_err(db_error)?,
        conversation_id: row.try_get("conversation_id").map_err(db_error)?,
        origin_tweet_id: row.try_get("origin_tweet_id").map_err(db_error)?,
        reply_target: row.try_get("reply_target").map_err(db_error)?,
        author_handle: row.try_get("author_handle").map_err(db_error)?,
        status: status.parse::<QuestStatus>()?,
        current_chapter_number: from_db_int(current, "current_chapter_number")?,
        chapter_deadline: row.try_get("chapter_deadline").map_err(db_error)?,
        last_posted_message_id: row.try_get("last_posted_message_id").map_err(db_error)?,
        state: QuestState::from_json(state)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

fn chapter_from_row(row: &PgRow) -> Result<Chapter, DomainError> {
    let number: i32 = row.try_get("chapter_number").map_err(db_error)?;
    let Json(options): Json<ChapterOptions> = row.try_get("options").map_err(db_error)?;
    let Json(sources): Json<Vec<String>> = row.try_get("sources").map_err(db_error)?;
    Ok(Chapter {
        id: row.try_get("id").map_err(db_error)?,
        quest_id: row.try_get("quest_id").map_err(db_error)?,
        chapter_number: from_db_int(number, "chapter_number")?,
        title: row.try_get("title").map_err(db_error)?,
        content: row.try_get("content").map_err(db_error)?,
        options,
        sources,
        posted_message_id: row.try_get("posted_message_id").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
    })
}

fn vote_from_row(row: &PgRow) -> Result<Vote, DomainError> {
    let selected: i16 = row.try_get("selected_option").map_err(db_error)?;
    Ok(Vote {
        id: row.try_get("id").map_err(db_error)?,
        chapter_id: row.try_get("chapter_id").map_err(db_error)?,
        voter_id: row.try_get("voter_id").map_err(db_error)?,
        voter_handle: row.try_get("handle").map_err(db_error)?,
        selected_option: u8::try_from(selected).map_err(|_| {
            DomainError::Infrastructure(format!("selected_option out of range: {selected}"))
        })?,
        weight: row.try_get("weight").map_err(db_error)?,
        reply_text: row.try_get("reply_text").map_err(db_error)?,
        reply_message_id: row.try_get("reply_message_id").map_err(db_error)?,
        note: row.try_get("note").map_err(db_error)?,
        recorded_at: row.try_get("recorded_at").map_err(db_error)?,
    })
}

#[async_trait]
impl QuestStore for PgQuestStore {
    async fn create_quest(
        &self,
        quest: &Quest,
        opening_chapter: &Chapter,
    ) -> Result<(), DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO quests
                (id, short_id, conversation_id, origin_tweet_id, reply_target, author_handle,
                 status, current_chapter_number, chapter_deadline, last_posted_message_id,
                 state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(quest.id)
        .bind(&quest.short_id)
        .bind(&quest.conversation_id)
        .bind(&quest.origin_tweet_id)
        .bind(&quest.reply_target)
        .bind(&quest.author_handle)
        .bind(quest.status.as_str())
        .bind(to_db_int(quest.current_chapter_number, "current_chapter_number")?)
        .bind(quest.chapter_deadline)
        .bind(&quest.last_posted_message_id)
        .bind(quest.state.to_json())
        .bind(quest.created_at)
        .bind(quest.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_violation_of(&e, ACTIVE_CONVERSATION_INDEX) {
                return Err(DomainError::QuestAlreadyActive {
                    conversation_id: quest.conversation_id.clone(),
                });
            }
            return Err(db_error(e));
        }

        insert_chapter(&mut *tx, opening_chapter).await?;
        tx.commit().await.map_err(db_error)?;
        debug!(quest_id = %quest.id, "quest created");
        Ok(())
    }

    async fn get_quest(&self, quest_id: Uuid) -> Result<Option<Quest>, DomainError> {
        let row = sqlx::query(&format!("{SELECT_QUEST} WHERE id = $1"))
            .bind(quest_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(quest_from_row).transpose()
    }

    async fn find_active_quest_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Quest>, DomainError> {
        let row = sqlx::query(&format!(
            "{SELECT_QUEST} WHERE conversation_id = $1 AND status = 'ACTIVE'"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(quest_from_row).transpose()
    }

    async fn list_active_quests(&self) -> Result<Vec<Quest>, DomainError> {
        let rows = sqlx::query(&format!(
            "{SELECT_QUEST} WHERE status = 'ACTIVE' ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(quest_from_row).collect()
    }

    async fn update_quest(
        &self,
        quest: &Quest,
        expected_chapter_number: u32,
    ) -> Result<(), DomainError> {
        let expected = to_db_int(expected_chapter_number, "expected_chapter_number")?;
        let result = sqlx::query(
            r"
            UPDATE quests
            SET status = $2,
                current_chapter_number = $3,
                chapter_deadline = $4,
                last_posted_message_id = $5,
                state = $6,
                updated_at = $7
            WHERE id = $1 AND current_chapter_number = $8
            ",
        )
        .bind(quest.id)
        .bind(quest.status.as_str())
        .bind(to_db_int(quest.current_chapter_number, "current_chapter_number")?)
        .bind(quest.chapter_deadline)
        .bind(&quest.last_posted_message_id)
        .bind(quest.state.to_json())
        .bind(quest.updated_at)
        .bind(expected)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let actual: Option<i32> =
            sqlx::query_scalar("SELECT current_chapter_number FROM quests WHERE id = $1")
                .bind(quest.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        match actual {
            None => Err(DomainError::QuestNotFound(quest.id)),
            Some(actual) => Err(DomainError::ConcurrencyConflict {
                quest_id: quest.id,
                expected: expected_chapter_number,
                actual: from_db_int(actual, "current_chapter_number")?,
            }),
        }
    }

    async fn list_chapters(&self, quest_id: Uuid) -> Result<Vec<Chapter>, DomainError> {
        let rows = sqlx::query(&format!(
            "{SELECT_CHAPTER} WHERE quest_id = $1 ORDER BY chapter_number"
        ))
        .bind(quest_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(chapter_from_row).collect()
    }

    async fn create_chapter_if_absent(&self, chapter: &Chapter) -> Result<bool, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        insert_chapter(&mut *conn, chapter).await
    }

    async fn mark_chapter_posted(
        &self,
        chapter_id: Uuid,
        message_id: &str,
    ) -> Result<(), DomainError> {
        let result = sqlx::query("UPDATE chapters SET posted_message_id = $2 WHERE id = $1")
            .bind(chapter_id)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(DomainError::Infrastructure(format!(
                "chapter {chapter_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn record_vote(&self, vote: &NewVote, now: DateTime<Utc>) -> Result<Vote, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // The no-op update makes RETURNING yield the existing row too.
        let voter_id: Uuid = sqlx::query_scalar(
            r"
            INSERT INTO voters (id, handle, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (handle) DO UPDATE SET handle = EXCLUDED.handle
            RETURNING id
            ",
        )
        .bind(Uuid::new_v4())
        .bind(&vote.voter_handle)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        let vote_id = Uuid::new_v4();
        let inserted = sqlx::query(
            r"
            INSERT INTO votes
                (id, chapter_id, voter_id, selected_option, weight, reply_text,
                 reply_message_id, note, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (chapter_id, voter_id) DO NOTHING
            ",
        )
        .bind(vote_id)
        .bind(vote.chapter_id)
        .bind(voter_id)
        .bind(i16::from(vote.selected_option))
        .bind(vote.weight)
        .bind(&vote.reply_text)
        .bind(&vote.reply_message_id)
        .bind(&vote.note)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(db_error)?;
            return Err(DomainError::AlreadyVoted {
                chapter_id: vote.chapter_id,
                voter_handle: vote.voter_handle.clone(),
            });
        }
        tx.commit().await.map_err(db_error)?;

        Ok(Vote {
            id: vote_id,
            chapter_id: vote.chapter_id,
            voter_id,
            voter_handle: vote.voter_handle.clone(),
            selected_option: vote.selected_option,
            weight: vote.weight,
            reply_text: vote.reply_text.clone(),
            reply_message_id: vote.reply_message_id.clone(),
            note: vote.note.clone(),
            recorded_at: now,
        })
    }

    async fn list_votes(&self, chapter_id: Uuid) -> Result<Vec<Vote>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT v.id, v.chapter_id, v.voter_id, r.handle, v.selected_option, v.weight,
                   v.reply_text, v.reply_message_id, v.note, v.recorded_at
            FROM votes v
            JOIN voters r ON r.id = v.voter_id
            WHERE v.chapter_id = $1
            ORDER BY v.recorded_at, v.id
            ",
        )
        .bind(chapter_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(vote_from_row).collect()
    }
}

/// Inserts a chapter unless one with the same number exists. Returns
/// whether a row was written.
async fn insert_chapter(
    conn: &mut sqlx::PgConnection,
    chapter: &Chapter,
) -> Result<bool, DomainError> {
    let result = sqlx::query(
        r"
        INSERT INTO chapters
            (id, quest_id, chapter_number, title, content, options, sources,
             posted_message_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (quest_id, chapter_number) DO NOTHING
        ",
    )
    .bind(chapter.id)
    .bind(chapter.quest_id)
    .bind(to_db_int(chapter.chapter_number, "chapter_number")?)
    .bind(&chapter.title)
    .bind(&chapter.content)
    .bind(Json(&chapter.options))
    .bind(Json(&chapter.sources))
    .bind(&chapter.posted_message_id)
    .bind(chapter.created_at)
    .execute(conn)
    .await
    .map_err(db_error)?;
    Ok(result.rows_affected() == 1)
}
