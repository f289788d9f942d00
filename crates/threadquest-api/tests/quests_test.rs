//! Integration tests for the quest routes.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::PgPool;
use threadquest_core::social::Reply;

fn start_body() -> serde_json::Value {
    json!({
        "origin_tweet_id": "tweet-1",
        "conversation_id": "conv-1",
        "seed_text": "a cartographer mapping a city that moves at night",
        "author_handle": "alice"
    })
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_start_quest_round_trip(pool: PgPool) {
    let app = common::build_test_app(pool.clone());

    // POST /api/v1/quests
    let (status, json) = common::post_json(app.router, "/api/v1/quests", &start_body()).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["outcome"], "started");
    let quest_id = json["quest_id"].as_str().unwrap().to_owned();
    assert_eq!(app.social.posts().len(), 1);
    assert_eq!(app.scheduler.calls().len(), 1);

    // GET /api/v1/quests/{quest_id} — verify persisted state
    let app = common::build_test_app(pool);
    let (status, json) = common::get_json(app.router, &format!("/api/v1/quests/{quest_id}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ACTIVE");
    assert_eq!(json["current_chapter_number"], 1);
    assert!(json["chapter_deadline"].is_string());
    let chapters = json["chapters"].as_array().unwrap();
    assert_eq!(chapters.len(), 1);
    assert_eq!(chapters[0]["options"].as_array().unwrap().len(), 2);
    assert_eq!(chapters[0]["posted_message_id"], "posted-1");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_second_start_in_conversation_is_rejected_softly(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    common::post_json(app.router, "/api/v1/quests", &start_body()).await;

    let app = common::build_test_app(pool);
    let (status, json) = common::post_json(app.router, "/api/v1/quests", &start_body()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "already_active");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_manual_advance_tallies_votes_and_posts_next_chapter(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let (_, json) = common::post_json(app.router, "/api/v1/quests", &start_body()).await;
    let quest_id = json["quest_id"].as_str().unwrap().to_owned();

    let app = common::build_test_app(pool.clone());
    app.social.seed_replies(
        "posted-1",
        vec![
            Reply {
                author_handle: "bob".into(),
                text: "2 for sure".into(),
                message_id: "r-1".into(),
            },
            Reply {
                author_handle: "threadquestbot".into(),
                text: "1".into(),
                message_id: "r-2".into(),
            },
        ],
    );

    // POST /api/v1/quests/{quest_id}/advance
    let (status, json) = common::post_json(
        app.router,
        &format!("/api/v1/quests/{quest_id}/advance"),
        &json!({ "chapter_number": 1 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "advanced");
    assert_eq!(json["chapter_number"], 2);
    assert_eq!(json["winning_option"], 2);

    // A repeat of the same trigger is absorbed.
    let app = common::build_test_app(pool.clone());
    let (status, json) = common::post_json(
        app.router,
        &format!("/api/v1/quests/{quest_id}/advance"),
        &json!({ "chapter_number": 1 }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "already_advanced");

    let app = common::build_test_app(pool);
    let (_, json) = common::get_json(app.router, &format!("/api/v1/quests/{quest_id}")).await;
    assert_eq!(json["current_chapter_number"], 2);
    assert_eq!(json["path"][0]["winning_option"], 2);
    assert_eq!(json["chapters"].as_array().unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_advance_of_missing_chapter_returns_404(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let (_, json) = common::post_json(app.router, "/api/v1/quests", &start_body()).await;
    let quest_id = json["quest_id"].as_str().unwrap().to_owned();

    let app = common::build_test_app(pool);
    let (status, json) = common::post_json(
        app.router,
        &format!("/api/v1/quests/{quest_id}/advance"),
        &json!({ "chapter_number": 4 }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "chapter_not_found");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_list_active_quests(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    common::post_json(app.router, "/api/v1/quests", &start_body()).await;

    let app = common::build_test_app(pool);
    let (status, json) = common::get_json(app.router, "/api/v1/quests").await;

    assert_eq!(status, StatusCode::OK);
    let quests = json.as_array().unwrap();
    assert_eq!(quests.len(), 1);
    assert_eq!(quests[0]["conversation_id"], "conv-1");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_recovery_run_reschedules_awaiting_quest(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    common::post_json(app.router, "/api/v1/quests", &start_body()).await;

    let app = common::build_test_app(pool);
    let (status, json) = common::post_json(app.router, "/api/v1/recovery/run", &json!({})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["scanned"], 1);
    assert_eq!(json["rescheduled"], 1);
    assert_eq!(app.scheduler.calls().len(), 1);
}
