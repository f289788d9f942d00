//! Scheduler callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use threadquest_core::error::DomainError;
use threadquest_core::scheduler::{DueTask, TaskHandler};
use tracing::{info, instrument, warn};

use crate::application::engine::QuestProgression;
use crate::domain::tasks::CollectVotesPayload;

/// Handles `collect-votes` tasks by advancing the quest.
///
/// Errors worth retrying (external services, storage, lost races) are
/// returned so the scheduler redelivers the task. Anything else is logged
/// and the task is acknowledged, since redelivery would fail the same way.
pub struct CollectVotesHandler {
    progression: Arc<dyn QuestProgression>,
}

impl CollectVotesHandler {
    #[must_use]
    pub fn new(progression: Arc<dyn QuestProgression>) -> Self {
        Self { progression }
    }
}

#[async_trait]
impl TaskHandler for CollectVotesHandler {
    #[instrument(skip(self, task), fields(task_id = %task.task_id, attempt = task.attempt))]
    async fn handle(&self, task: &DueTask) -> Result<(), DomainError> {
        let payload = match CollectVotesPayload::from_json(&task.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping malformed collect-votes task");
                return Ok(());
            }
        };

        match self
            .progression
            .advance(payload.quest_id, payload.chapter_number)
            .await
        {
            Ok(outcome) => {
                info!(quest_id = %payload.quest_id, ?outcome, "collect-votes handled");
                Ok(())
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!(quest_id = %payload.quest_id, error = %e, "collect-votes task dropped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use threadquest_core::rng::DeterministicRng;
    use threadquest_core::scheduler::Scheduler;
    use threadquest_core::social::Reply;
    use threadquest_test_support::{
        InMemoryQuestStore, ManualClock, MockRng, RecordingScheduler, RecordingSocialClient,
        ScriptedGenerator,
    };
    use uuid::Uuid;

    use super::*;
    use crate::application::engine::QuestEngine;
    use crate::domain::commands::{StartOutcome, StartQuest};
    use crate::domain::config::ProgressionConfig;
    use crate::domain::tasks::COLLECT_VOTES;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    struct Harness {
        store: Arc<InMemoryQuestStore>,
        social: Arc<RecordingSocialClient>,
        generator: Arc<ScriptedGenerator>,
        scheduler: Arc<RecordingScheduler>,
        clock: Arc<ManualClock>,
        engine: Arc<QuestEngine>,
    }

    fn harness(total_chapters: u32) -> Harness {
        let store = Arc::new(InMemoryQuestStore::new());
        let social = Arc::new(RecordingSocialClient::new());
        let generator = Arc::new(ScriptedGenerator::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let clock = Arc::new(ManualClock::new(fixed_now()));
        let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MockRng));
        let engine = Arc::new(QuestEngine::new(
            store.clone(),
            generator.clone(),
            social.clone(),
            scheduler.clone(),
            clock.clone(),
            rng,
            ProgressionConfig {
                total_chapters,
                ..ProgressionConfig::default()
            },
        ));
        scheduler.on_due(COLLECT_VOTES, Arc::new(CollectVotesHandler::new(engine.clone())));
        Harness {
            store,
            social,
            generator,
            scheduler,
            clock,
            engine,
        }
    }

    async fn start(harness: &Harness) -> Uuid {
        let command = StartQuest {
            correlation_id: Uuid::new_v4(),
            origin_tweet_id: "tweet-1".into(),
            conversation_id: "conv-1".into(),
            reply_target: "tweet-1".into(),
            in_reply_to: None,
            seed_text: "a dragon who collects teapots".into(),
            author_handle: "alice".into(),
        };
        match harness.engine.start_quest(&command).await.unwrap() {
            StartOutcome::Started { quest_id, .. } => quest_id,
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quest_runs_to_completion_through_scheduled_tasks() {
        // Arrange
        let harness = harness(3);
        let quest_id = start(&harness).await;

        // Act
        for round in 0..2 {
            let call = harness.scheduler.calls()[round].clone();
            let message_id = harness
                .store
                .quest(quest_id)
                .unwrap()
                .last_posted_message_id
                .unwrap();
            harness.social.seed_replies(
                &message_id,
                vec![Reply {
                    author_handle: format!("voter{round}"),
                    text: "2".into(),
                    message_id: format!("vote-{round}"),
                }],
            );
            harness.clock.advance(TimeDelta::seconds(180));
            harness.scheduler.fire(&call, 1).await.unwrap();
        }

        // Assert
        let quest = harness.store.quest(quest_id).unwrap();
        assert!(!quest.is_active());
        assert_eq!(quest.current_chapter_number, 3);
        assert_eq!(quest.chapter_deadline, None);
        assert_eq!(quest.state.path.len(), 2);
        assert!(quest.state.path.iter().all(|s| s.winning_option == 2));
        assert_eq!(harness.scheduler.calls().len(), 2);
        assert_eq!(harness.store.chapters(quest_id).len(), 3);
    }

    #[tokio::test]
    async fn test_redelivered_task_is_absorbed() {
        // Arrange
        let harness = harness(5);
        let quest_id = start(&harness).await;
        let call = harness.scheduler.calls()[0].clone();
        harness.clock.advance(TimeDelta::seconds(180));

        // Act
        harness.scheduler.fire(&call, 1).await.unwrap();
        harness.scheduler.fire(&call, 2).await.unwrap();

        // Assert
        assert_eq!(harness.store.chapters(quest_id).len(), 2);
        assert_eq!(harness.generator.next_prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_is_retried() {
        // Arrange
        let harness = harness(5);
        start(&harness).await;
        let call = harness.scheduler.calls()[0].clone();
        harness.generator.set_failing(true);

        // Act
        let result = harness.scheduler.fire(&call, 1).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Generation(_))));
    }

    #[tokio::test]
    async fn test_unknown_quest_is_acknowledged() {
        // Arrange
        let harness = harness(5);
        let handler = CollectVotesHandler::new(harness.engine.clone());
        let task = DueTask {
            task_id: Uuid::new_v4(),
            kind: COLLECT_VOTES.into(),
            payload: CollectVotesPayload {
                quest_id: Uuid::new_v4(),
                chapter_number: 1,
            }
            .to_json(),
            attempt: 1,
            execute_after: fixed_now(),
        };

        // Act
        let result = handler.handle(&task).await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acknowledged() {
        // Arrange
        let harness = harness(5);
        let handler = CollectVotesHandler::new(harness.engine.clone());
        let task = DueTask {
            task_id: Uuid::new_v4(),
            kind: COLLECT_VOTES.into(),
            payload: serde_json::json!({ "nope": true }),
            attempt: 1,
            execute_after: fixed_now(),
        };

        // Act
        let result = handler.handle(&task).await;

        // Assert
        assert!(result.is_ok());
    }
}
