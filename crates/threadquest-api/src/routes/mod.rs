//! Route modules.

use axum::Router;

use crate::state::AppState;

pub mod health;
pub mod quests;
pub mod recovery;

/// Returns the full application router, without state or middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/v1/quests", quests::router())
        .nest("/api/v1/recovery", recovery::router())
}
