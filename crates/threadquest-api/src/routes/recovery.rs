//! Manual recovery trigger.

use axum::extract::State;
use axum::{Json, Router, routing::post};
use threadquest_quest::application::RecoveryReport;
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /run
#[instrument(skip(state))]
async fn run_recovery(State(state): State<AppState>) -> Result<Json<RecoveryReport>, ApiError> {
    let report = state.recovery.run().await?;
    Ok(Json(report))
}

/// Returns the router for recovery operations.
pub fn router() -> Router<AppState> {
    Router::new().route("/run", post(run_recovery))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use threadquest_test_support::InMemoryQuestStore;
    use tower::ServiceExt;

    use crate::routes::test_state::app_state_with;

    #[tokio::test]
    async fn test_run_recovery_on_empty_store_reports_nothing() {
        // Arrange
        let app = router().with_state(app_state_with(Arc::new(InMemoryQuestStore::new())));
        let request = Request::builder()
            .method("POST")
            .uri("/run")
            .body(Body::empty())
            .unwrap();

        // Act
        let response = app.oneshot(request).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["scanned"], 0);
        assert_eq!(json["failed"], 0);
    }
}
