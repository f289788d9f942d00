//! Routes for the Quest Progression context.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use threadquest_quest::application::QuestProgression;
use threadquest_quest::application::query_handlers::{self, QuestView};
use threadquest_quest::domain::commands::{AdvanceOutcome, StartOutcome, StartQuest};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /quests.
#[derive(Debug, Deserialize)]
pub struct StartQuestRequest {
    /// The message that asked for the quest.
    pub origin_tweet_id: String,
    /// Conversation of the message; defaults to `origin_tweet_id`.
    pub conversation_id: Option<String>,
    /// Message chapter 1 replies to; defaults to `origin_tweet_id`.
    pub reply_target: Option<String>,
    /// Parent of the message, if it was itself a reply.
    pub in_reply_to: Option<String>,
    pub seed_text: String,
    pub author_handle: String,
}

/// Request body for POST /quests/{quest_id}/advance.
#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    /// The chapter whose voting round should close.
    pub chapter_number: u32,
}

/// POST /
#[instrument(skip(state, request), fields(origin_tweet_id = %request.origin_tweet_id))]
async fn start_quest(
    State(state): State<AppState>,
    Json(request): Json<StartQuestRequest>,
) -> Result<(StatusCode, Json<StartOutcome>), ApiError> {
    let command = StartQuest {
        correlation_id: Uuid::new_v4(),
        conversation_id: request
            .conversation_id
            .unwrap_or_else(|| request.origin_tweet_id.clone()),
        reply_target: request
            .reply_target
            .unwrap_or_else(|| request.origin_tweet_id.clone()),
        origin_tweet_id: request.origin_tweet_id,
        in_reply_to: request.in_reply_to,
        seed_text: request.seed_text,
        author_handle: request.author_handle,
    };

    info!(correlation_id = %command.correlation_id, "handling start_quest command");

    let outcome = state.engine.start_quest(&command).await?;
    let status = match outcome {
        StartOutcome::Started { .. } => StatusCode::CREATED,
        StartOutcome::AlreadyActive { .. } | StartOutcome::IgnoredVoteReply { .. } => {
            StatusCode::OK
        }
    };
    Ok((status, Json(outcome)))
}

/// GET /
#[instrument(skip(state))]
async fn list_active_quests(
    State(state): State<AppState>,
) -> Result<Json<Vec<QuestView>>, ApiError> {
    let quests = query_handlers::list_active_quests(&*state.store).await?;
    Ok(Json(quests))
}

/// GET /{quest_id}
#[instrument(skip(state))]
async fn get_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<Uuid>,
) -> Result<Json<QuestView>, ApiError> {
    let quest = query_handlers::get_quest_by_id(quest_id, &*state.store).await?;
    Ok(Json(quest))
}

/// POST /{quest_id}/advance
#[instrument(skip(state, request), fields(chapter_number = request.chapter_number))]
async fn advance_quest(
    State(state): State<AppState>,
    Path(quest_id): Path<Uuid>,
    Json(request): Json<AdvanceRequest>,
) -> Result<Json<AdvanceOutcome>, ApiError> {
    info!(%quest_id, "handling manual advance");
    let outcome = state
        .engine
        .advance(quest_id, request.chapter_number)
        .await?;
    Ok(Json(outcome))
}

/// Returns the router for the quest context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_quest).get(list_active_quests))
        .route("/{quest_id}", get(get_quest))
        .route("/{quest_id}/advance", post(advance_quest))
}
