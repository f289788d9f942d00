//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use threadquest_core::clock::Clock;
use threadquest_core::rng::DeterministicRng;
use threadquest_core::store::QuestStore;
use threadquest_quest::application::{QuestEngine, RecoveryScanner};
use threadquest_quest::domain::config::ProgressionConfig;
use threadquest_store::PgQuestStore;
use threadquest_test_support::{
    FixedClock, MockRng, RecordingScheduler, RecordingSocialClient, ScriptedGenerator,
};
use tower::ServiceExt;

use threadquest_api::routes;
use threadquest_api::state::AppState;

/// Collaborators a test may inspect after a request.
pub struct TestApp {
    pub router: Router,
    pub social: Arc<RecordingSocialClient>,
    pub scheduler: Arc<RecordingScheduler>,
}

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// Build the full app router over a real `PgQuestStore` with scripted
/// generator, social client and scheduler.
pub fn build_test_app(pool: PgPool) -> TestApp {
    let clock = fixed_clock();
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MockRng));
    let store: Arc<dyn QuestStore> = Arc::new(PgQuestStore::new(pool));
    let social = Arc::new(RecordingSocialClient::new());
    let scheduler = Arc::new(RecordingScheduler::new());
    let config = ProgressionConfig::default();

    let engine = Arc::new(
        QuestEngine::new(
            store.clone(),
            Arc::new(ScriptedGenerator::new()),
            social.clone(),
            scheduler.clone(),
            clock.clone(),
            rng,
            config,
        )
        .with_bot_handle("threadquestbot"),
    );
    let recovery = Arc::new(RecoveryScanner::new(
        store.clone(),
        engine.clone(),
        clock,
        config,
    ));
    let app_state = AppState::new(engine, store, recovery);

    TestApp {
        router: routes::router().with_state(app_state),
        social,
        scheduler,
    }
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}
