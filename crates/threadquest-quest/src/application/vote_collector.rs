//! Vote collection for a posted chapter.
//!
//! Fetches the replies to a chapter, has the narrative generator read them
//! as votes, persists one vote row per interpreted reply and tallies the
//! weights.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use threadquest_core::clock::Clock;
use threadquest_core::error::DomainError;
use threadquest_core::generator::NarrativeGenerator;
use threadquest_core::model::{Chapter, MatchKind, NewVote, clamp_weight};
use threadquest_core::social::{Reply, SocialClient, sort_oldest_first};
use threadquest_core::store::QuestStore;
use tracing::{debug, info, instrument, warn};

use crate::domain::tally::{DEFAULT_WINNING_OPTION, Tally, tally};

/// One interpreted reply.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteRecord {
    /// The reply as fetched.
    pub reply: Reply,
    /// 1-based option the reply supports.
    pub selected_option: u8,
    /// Confidence weight in `[0.1, 1.0]`.
    pub weight: f64,
    /// How the option was recognised.
    pub match_kind: MatchKind,
    /// Interpretation note.
    pub note: String,
    /// False when the store rejected the row as a repeat vote.
    pub persisted: bool,
}

/// Result of collecting votes on a chapter.
#[derive(Debug, Clone, PartialEq)]
pub struct TallyOutcome {
    /// Every counted reply.
    pub records: Vec<VoteRecord>,
    /// The winning 1-based option.
    pub winning_option: u8,
    /// Per-option totals.
    pub tally: Tally,
}

/// Collects and tallies votes.
pub struct VoteCollector {
    store: Arc<dyn QuestStore>,
    generator: Arc<dyn NarrativeGenerator>,
    social: Arc<dyn SocialClient>,
    clock: Arc<dyn Clock>,
    bot_handle: Option<String>,
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_lowercase()
}

impl VoteCollector {
    /// Creates a collector.
    #[must_use]
    pub fn new(
        store: Arc<dyn QuestStore>,
        generator: Arc<dyn NarrativeGenerator>,
        social: Arc<dyn SocialClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            generator,
            social,
            clock,
            bot_handle: None,
        }
    }

    /// Ignores replies written by `handle`, the bot's own account.
    #[must_use]
    pub fn with_bot_handle(mut self, handle: impl AsRef<str>) -> Self {
        self.bot_handle = Some(normalize_handle(handle.as_ref()));
        self
    }

    fn is_bot(&self, reply: &Reply) -> bool {
        self.bot_handle
            .as_deref()
            .is_some_and(|bot| normalize_handle(&reply.author_handle) == bot)
    }

    /// Collects the replies to `chapter` posted before `deadline` and
    /// tallies them.
    ///
    /// With no replies option 1 wins and the generator is not called.
    /// Repeat votes by one voter all count toward the tally, but only the
    /// earliest is persisted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an unposted or terminal
    /// chapter, and propagates fetch, interpretation and store failures
    /// other than `AlreadyVoted`.
    #[instrument(skip(self, chapter), fields(quest_id = %chapter.quest_id, chapter_number = chapter.chapter_number))]
    pub async fn collect_and_tally(
        &self,
        chapter: &Chapter,
        deadline: DateTime<Utc>,
    ) -> Result<TallyOutcome, DomainError> {
        if chapter.options.is_terminal() {
            return Err(DomainError::Validation(format!(
                "chapter {} has no options to vote on",
                chapter.chapter_number
            )));
        }
        if !chapter.is_posted() {
            return Err(DomainError::Validation(format!(
                "chapter {} was never posted",
                chapter.chapter_number
            )));
        }
        let option_count = u8::try_from(chapter.options.len()).unwrap_or(u8::MAX);

        let mut replies: Vec<Reply> = self
            .social
            .fetch_replies(&chapter.posted_message_id, deadline)
            .await?
            .into_iter()
            .filter(|r| !self.is_bot(r))
            .collect();
        sort_oldest_first(&mut replies);

        if replies.is_empty() {
            info!("no replies, defaulting to option {DEFAULT_WINNING_OPTION}");
            return Ok(TallyOutcome {
                records: Vec::new(),
                winning_option: DEFAULT_WINNING_OPTION,
                tally: tally(Vec::new(), option_count),
            });
        }

        let options = chapter.options.to_vec();
        let interpretation = self.generator.interpret_votes(&replies, &options).await?;
        if interpretation.per_reply.len() != replies.len() {
            warn!(
                replies = replies.len(),
                interpreted = interpretation.per_reply.len(),
                "interpretation count does not match reply count"
            );
        }

        let now = self.clock.now();
        let mut records = Vec::with_capacity(replies.len());
        for (reply, reading) in replies.into_iter().zip(interpretation.per_reply) {
            if reading.selected_option == 0 || reading.selected_option > option_count {
                warn!(
                    message_id = %reply.message_id,
                    selected_option = reading.selected_option,
                    "interpreted option out of range, skipping reply"
                );
                continue;
            }
            let weight = clamp_weight(reading.weight);
            let vote = NewVote {
                chapter_id: chapter.id,
                voter_handle: reply.author_handle.clone(),
                selected_option: reading.selected_option,
                weight,
                reply_text: reply.text.clone(),
                reply_message_id: reply.message_id.clone(),
                note: reading.note.clone(),
            };
            let persisted = match self.store.record_vote(&vote, now).await {
                Ok(_) => true,
                Err(DomainError::AlreadyVoted { voter_handle, .. }) => {
                    debug!(%voter_handle, persisted = false, "repeat vote not stored");
                    false
                }
                Err(e) => return Err(e),
            };
            records.push(VoteRecord {
                reply,
                selected_option: reading.selected_option,
                weight,
                match_kind: reading.match_kind,
                note: reading.note,
                persisted,
            });
        }

        let result = tally(
            records.iter().map(|r| (r.selected_option, r.weight)),
            option_count,
        );
        info!(
            counted = result.counted,
            winning_option = result.winning_option,
            "votes tallied"
        );
        Ok(TallyOutcome {
            winning_option: result.winning_option,
            records,
            tally: result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use threadquest_core::generator::{ReplyInterpretation, VoteInterpretation};
    use threadquest_core::model::ChapterOptions;
    use threadquest_test_support::{
        FixedClock, InMemoryQuestStore, RecordingSocialClient, ScriptedGenerator,
    };
    use uuid::Uuid;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn posted_chapter() -> Chapter {
        let mut chapter = Chapter::new(
            Uuid::new_v4(),
            1,
            5,
            "The Beginning".into(),
            "A door creaks.".into(),
            ChapterOptions::choices("Open it", "Walk away"),
            vec![],
            fixed_now(),
        )
        .unwrap();
        chapter.posted_message_id = "msg-1".into();
        chapter
    }

    fn reply(handle: &str, text: &str, id: &str) -> Reply {
        Reply {
            author_handle: handle.into(),
            text: text.into(),
            message_id: id.into(),
        }
    }

    fn reading(option: u8, weight: f64, match_kind: MatchKind) -> ReplyInterpretation {
        ReplyInterpretation {
            selected_option: option,
            weight,
            match_kind,
            note: String::new(),
        }
    }

    struct Fixture {
        store: Arc<InMemoryQuestStore>,
        generator: Arc<ScriptedGenerator>,
        social: Arc<RecordingSocialClient>,
    }

    impl Fixture {
        fn new(generator: ScriptedGenerator) -> Self {
            Self {
                store: Arc::new(InMemoryQuestStore::new()),
                generator: Arc::new(generator),
                social: Arc::new(RecordingSocialClient::new()),
            }
        }

        fn collector(&self) -> VoteCollector {
            VoteCollector::new(
                self.store.clone(),
                self.generator.clone(),
                self.social.clone(),
                Arc::new(FixedClock(fixed_now())),
            )
            .with_bot_handle("@QuestBot")
        }
    }

    #[tokio::test]
    async fn test_zero_replies_defaults_to_option_one_without_generator() {
        // Arrange
        let fixture = Fixture::new(ScriptedGenerator::new());
        let chapter = posted_chapter();

        // Act
        let outcome = fixture
            .collector()
            .collect_and_tally(&chapter, fixed_now())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome.winning_option, 1);
        assert!(outcome.records.is_empty());
        assert_eq!(fixture.generator.interpret_calls(), 0);
        assert_eq!(fixture.social.fetches(), vec![("msg-1".to_owned(), fixed_now())]);
    }

    #[tokio::test]
    async fn test_weighted_sum_picks_winner() {
        // Arrange
        let interpretation = VoteInterpretation {
            per_reply: vec![
                reading(1, 1.0, MatchKind::ExplicitNumber),
                reading(1, 1.0, MatchKind::ExplicitNumber),
                reading(2, 0.8, MatchKind::Keyword),
            ],
        };
        let fixture = Fixture::new(ScriptedGenerator::new().with_interpretation(interpretation));
        fixture.social.seed_replies(
            "msg-1",
            vec![
                reply("alice", "1", "r1"),
                reply("bob", "one!", "r2"),
                reply("carol", "walk away", "r3"),
            ],
        );

        // Act
        let outcome = fixture
            .collector()
            .collect_and_tally(&posted_chapter(), fixed_now())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome.winning_option, 1);
        assert!((outcome.tally.total(1) - 2.0).abs() < 1e-9);
        assert!((outcome.tally.total(2) - 0.8).abs() < 1e-9);
        assert_eq!(fixture.store.votes().len(), 3);
    }

    #[tokio::test]
    async fn test_repeat_voter_counts_but_is_stored_once() {
        // Arrange
        let fixture = Fixture::new(ScriptedGenerator::new());
        fixture.social.seed_replies(
            "msg-1",
            vec![
                reply("alice", "2", "r1"),
                reply("alice", "2 again", "r2"),
                reply("bob", "1", "r3"),
            ],
        );

        // Act
        let outcome = fixture
            .collector()
            .collect_and_tally(&posted_chapter(), fixed_now())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome.winning_option, 2);
        assert_eq!(outcome.records.len(), 3);
        assert!(outcome.records[0].persisted);
        assert!(!outcome.records[1].persisted);
        let stored = fixture.store.votes();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|v| v.reply_message_id == "r1"));
        assert!(!stored.iter().any(|v| v.reply_message_id == "r2"));
    }

    #[tokio::test]
    async fn test_earliest_reply_is_stored_when_fetched_newest_first() {
        // Arrange
        let fixture = Fixture::new(ScriptedGenerator::new());
        fixture.social.seed_replies(
            "msg-1",
            vec![reply("bob", "2", "1002"), reply("bob", "1", "1001")],
        );

        // Act
        let outcome = fixture
            .collector()
            .collect_and_tally(&posted_chapter(), fixed_now())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome.records[0].reply.message_id, "1001");
        assert!(outcome.records[0].persisted);
        assert!(!outcome.records[1].persisted);
        let stored = fixture.store.votes();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].reply_message_id, "1001");
        assert_eq!(stored[0].selected_option, 1);
    }

    #[tokio::test]
    async fn test_bot_replies_and_invalid_options_are_skipped() {
        // Arrange
        let interpretation = VoteInterpretation {
            per_reply: vec![
                reading(3, 1.0, MatchKind::ExplicitNumber),
                reading(2, 5.0, MatchKind::ExplicitNumber),
            ],
        };
        let fixture = Fixture::new(ScriptedGenerator::new().with_interpretation(interpretation));
        fixture.social.seed_replies(
            "msg-1",
            vec![
                reply("questbot", "Chapter 2/5...", "b1"),
                reply("alice", "3", "r1"),
                reply("bob", "2", "r2"),
            ],
        );

        // Act
        let outcome = fixture
            .collector()
            .collect_and_tally(&posted_chapter(), fixed_now())
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].reply.author_handle, "bob");
        assert!((outcome.records[0].weight - 1.0).abs() < f64::EPSILON);
        assert_eq!(outcome.winning_option, 2);
    }

    #[tokio::test]
    async fn test_terminal_chapter_is_rejected() {
        // Arrange
        let fixture = Fixture::new(ScriptedGenerator::new());
        let mut chapter = Chapter::new(
            Uuid::new_v4(),
            5,
            5,
            "The End".into(),
            "Fin.".into(),
            ChapterOptions::Terminal,
            vec![],
            fixed_now(),
        )
        .unwrap();
        chapter.posted_message_id = "msg-5".into();

        // Act
        let result = fixture.collector().collect_and_tally(&chapter, fixed_now()).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        // Arrange
        let fixture = Fixture::new(ScriptedGenerator::new());
        fixture.social.set_fail_fetches(true);

        // Act
        let result = fixture
            .collector()
            .collect_and_tally(&posted_chapter(), fixed_now())
            .await;

        // Assert
        assert!(matches!(result, Err(DomainError::Social(_))));
        assert!(fixture.store.votes().is_empty());
    }
}
