//! Liveness and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

/// Liveness body.
#[derive(Serialize)]
pub struct HealthResponse {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness body. `active_quests` is absent when the store is unreachable.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_quests: Option<usize>,
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "threadquest",
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /health/ready
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    match state.store.list_active_quests().await {
        Ok(quests) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                active_quests: Some(quests.len()),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "unavailable",
                    active_quests: None,
                }),
            )
        }
    }
}

/// Returns the probe router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
}
