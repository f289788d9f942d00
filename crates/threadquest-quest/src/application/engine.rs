//! The quest progression engine.
//!
//! Owns every Quest and Chapter mutation: starting a quest, advancing it
//! once per voting round, and finishing transitions that a crash left
//! half done. Each call is a short unit of work; nothing is held per quest
//! between calls. Duplicate triggers are absorbed by the guards in
//! [`QuestEngine::advance`] and by conditional store writes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use threadquest_core::clock::Clock;
use threadquest_core::error::DomainError;
use threadquest_core::generator::{
    ChapterHistoryEntry, NarrativeGenerator, NextChapterPrompt, OpeningPrompt,
};
use threadquest_core::model::{Chapter, ChapterOptions, PathStep, Quest, QuestState};
use threadquest_core::rng::DeterministicRng;
use threadquest_core::scheduler::{Scheduler, TaskHandle};
use threadquest_core::social::SocialClient;
use threadquest_core::store::QuestStore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::application::vote_collector::VoteCollector;
use crate::domain::commands::{AdvanceOutcome, StartOutcome, StartQuest};
use crate::domain::config::ProgressionConfig;
use crate::domain::short_id::generate_short_id;
use crate::domain::tally::{DEFAULT_WINNING_OPTION, tally};
use crate::domain::tasks::{COLLECT_VOTES, CollectVotesPayload};

/// Result of [`QuestProgression::resume_publication`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The latest chapter had never been posted; it is now.
    Published {
        /// The chapter posted.
        chapter_number: u32,
    },
    /// The latest chapter was posted but the quest row lagged; it was
    /// brought up to date.
    Repaired {
        /// The chapter the quest now points at.
        chapter_number: u32,
    },
    /// The quest was consistent.
    NothingToDo,
}

/// Progression operations used by the task handler and recovery.
#[async_trait]
pub trait QuestProgression: Send + Sync {
    /// Resolves the votes on `chapter_number` and moves the quest on.
    async fn advance(
        &self,
        quest_id: Uuid,
        chapter_number: u32,
    ) -> Result<AdvanceOutcome, DomainError>;

    /// Finishes a transition interrupted between chapter creation and the
    /// quest row update.
    async fn resume_publication(&self, quest_id: Uuid) -> Result<ResumeOutcome, DomainError>;

    /// Submits the collect-votes task for the quest's current chapter.
    async fn reschedule_collection(&self, quest: &Quest) -> Result<TaskHandle, DomainError>;
}

/// Drives quests through their chapters.
pub struct QuestEngine {
    store: Arc<dyn QuestStore>,
    generator: Arc<dyn NarrativeGenerator>,
    social: Arc<dyn SocialClient>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    config: ProgressionConfig,
    collector: VoteCollector,
}

impl QuestEngine {
    /// Wires the engine to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn QuestStore>,
        generator: Arc<dyn NarrativeGenerator>,
        social: Arc<dyn SocialClient>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        rng: Arc<Mutex<dyn DeterministicRng + Send>>,
        config: ProgressionConfig,
    ) -> Self {
        let collector = VoteCollector::new(
            store.clone(),
            generator.clone(),
            social.clone(),
            clock.clone(),
        );
        Self {
            store,
            generator,
            social,
            scheduler,
            clock,
            rng,
            config,
            collector,
        }
    }

    /// Excludes the bot's own replies from vote collection.
    #[must_use]
    pub fn with_bot_handle(mut self, handle: impl AsRef<str>) -> Self {
        self.collector = self.collector.with_bot_handle(handle);
        self
    }

    /// The timing settings in use.
    #[must_use]
    pub fn config(&self) -> &ProgressionConfig {
        &self.config
    }

    /// Starts a quest for a conversation, or explains why not.
    ///
    /// The opening chapter is generated before anything is stored. If
    /// posting it fails the new quest is archived and the error returned.
    /// A scheduling failure after a successful post is only logged;
    /// recovery re-submits the task.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an empty seed, and any
    /// generator, store or social failure.
    #[instrument(skip(self, command), fields(correlation_id = %command.correlation_id, conversation_id = %command.conversation_id))]
    pub async fn start_quest(&self, command: &StartQuest) -> Result<StartOutcome, DomainError> {
        let seed_text = command.seed_text.trim();
        if seed_text.is_empty() {
            return Err(DomainError::Validation(
                "seed text must not be empty".to_owned(),
            ));
        }

        if let Some(existing) = self
            .store
            .find_active_quest_by_conversation(&command.conversation_id)
            .await?
        {
            return self.answer_existing(&existing, command).await;
        }

        let generated = self
            .generator
            .generate_opening_chapter(&OpeningPrompt {
                seed_text: seed_text.to_owned(),
                author_handle: command.author_handle.clone(),
                total_chapters: self.config.total_chapters,
            })
            .await?;
        let options = ChapterOptions::from_generated(generated.options, false)?;

        let short_id = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|e| DomainError::Infrastructure(format!("RNG mutex poisoned: {e}")))?;
            generate_short_id(&mut *rng)
        };

        let now = self.clock.now();
        let state = QuestState::new(
            generated.title.clone(),
            seed_text.to_owned(),
            generated.content.clone(),
        );
        let mut quest = Quest::new(
            Uuid::new_v4(),
            short_id,
            command.conversation_id.clone(),
            command.origin_tweet_id.clone(),
            command.reply_target.clone(),
            command.author_handle.clone(),
            state,
            now,
        );
        let mut chapter = Chapter::new(
            quest.id,
            1,
            self.config.total_chapters,
            generated.title,
            generated.content,
            options,
            generated.sources,
            now,
        )?;

        match self.store.create_quest(&quest, &chapter).await {
            Ok(()) => {}
            Err(DomainError::QuestAlreadyActive { .. }) => {
                // Lost a race with another start for the same conversation.
                if let Some(existing) = self
                    .store
                    .find_active_quest_by_conversation(&command.conversation_id)
                    .await?
                {
                    return self.answer_existing(&existing, command).await;
                }
                return Err(DomainError::QuestAlreadyActive {
                    conversation_id: command.conversation_id.clone(),
                });
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.finish_publication(&mut quest, &mut chapter, 1).await {
            error!(quest_id = %quest.id, error = %e, "chapter 1 not published, archiving quest");
            let mut archived = quest.clone();
            archived.archive(self.clock.now());
            if let Err(archive_err) = self
                .store
                .update_quest(&archived, archived.current_chapter_number)
                .await
            {
                error!(quest_id = %quest.id, error = %archive_err, "failed to archive quest");
            }
            return Err(e);
        }

        if let Err(e) = self.schedule_collection(&quest).await {
            error!(quest_id = %quest.id, error = %e, "collect-votes task not scheduled");
        }

        info!(quest_id = %quest.id, short_id = %quest.short_id, "quest started");
        Ok(StartOutcome::Started {
            quest_id: quest.id,
            short_id: quest.short_id,
        })
    }

    async fn answer_existing(
        &self,
        existing: &Quest,
        command: &StartQuest,
    ) -> Result<StartOutcome, DomainError> {
        if let Some(parent) = command.in_reply_to.as_deref() {
            let chapters = self.store.list_chapters(existing.id).await?;
            let is_vote = chapters
                .iter()
                .any(|c| c.is_posted() && c.posted_message_id == parent);
            if is_vote {
                debug!(quest_id = %existing.id, "message is a vote reply, ignoring");
                return Ok(StartOutcome::IgnoredVoteReply {
                    quest_id: existing.id,
                });
            }
        }

        let notice = format!(
            "A quest ({}) is already underway in this thread. Reply to the latest chapter to vote!",
            existing.short_id
        );
        if let Err(e) = self
            .social
            .post(&command.origin_tweet_id, &notice, None)
            .await
        {
            warn!(quest_id = %existing.id, error = %e, "could not send quest-in-progress notice");
        }
        Ok(StartOutcome::AlreadyActive {
            quest_id: existing.id,
        })
    }

    /// Posts `chapter` if needed and moves the quest onto it.
    ///
    /// The quest row is written only if its stored chapter number is still
    /// `expected`.
    async fn finish_publication(
        &self,
        quest: &mut Quest,
        chapter: &mut Chapter,
        expected: u32,
    ) -> Result<(), DomainError> {
        if !chapter.is_posted() {
            let text = chapter.render_post(self.config.total_chapters);
            let message_id = self.social.post(quest.reply_anchor(), &text, None).await?;
            self.store
                .mark_chapter_posted(chapter.id, &message_id)
                .await?;
            chapter.posted_message_id = message_id;
        }

        let now = self.clock.now();
        let message_id = chapter.posted_message_id.clone();
        if chapter.options.is_terminal() {
            quest.complete(chapter.chapter_number, message_id, now)?;
        } else {
            let deadline = self.clock.after(self.config.voting_window);
            quest.await_votes(chapter.chapter_number, message_id, deadline, now)?;
        }
        self.store.update_quest(quest, expected).await?;
        info!(
            quest_id = %quest.id,
            chapter_number = chapter.chapter_number,
            status = %quest.status,
            "chapter published"
        );
        Ok(())
    }

    async fn schedule_collection(&self, quest: &Quest) -> Result<TaskHandle, DomainError> {
        let deadline = quest.chapter_deadline.ok_or_else(|| {
            DomainError::Validation(format!("quest {} has no voting deadline", quest.id))
        })?;
        let grace = TimeDelta::from_std(self.config.grace()).unwrap_or(TimeDelta::zero());
        let due = deadline.checked_add_signed(grace).unwrap_or(deadline);
        let delay = (due - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let payload = CollectVotesPayload {
            quest_id: quest.id,
            chapter_number: quest.current_chapter_number,
        };
        let handle = self
            .scheduler
            .schedule(COLLECT_VOTES, payload.to_json(), delay)
            .await?;
        debug!(
            quest_id = %quest.id,
            task_id = %handle.task_id,
            deduplicated = handle.deduplicated,
            "collect-votes scheduled"
        );
        Ok(handle)
    }

    /// Replies to each voter who backed the winning option. Failures are
    /// logged and skipped.
    async fn notify_winners(&self, chapter: &Chapter, winning_option: u8) {
        let votes = match self.store.list_votes(chapter.id).await {
            Ok(votes) => votes,
            Err(e) => {
                warn!(chapter_id = %chapter.id, error = %e, "could not load votes for notifications");
                return;
            }
        };
        let choice = chapter.options.option_text(winning_option).unwrap_or_default();
        for vote in votes
            .iter()
            .filter(|v| v.selected_option == winning_option)
        {
            let text = format!(
                "@{} your pick won! The story continues with: {choice}",
                vote.voter_handle
            );
            if let Err(e) = self
                .social
                .post(&vote.reply_message_id, &text, None)
                .await
            {
                warn!(voter = %vote.voter_handle, error = %e, "winner notification failed");
            }
        }
    }

    /// Publishes `next`, moves the quest past `resolved`, notifies the
    /// winning voters and schedules the next collection.
    async fn conclude_advance(
        &self,
        quest: &mut Quest,
        resolved: &Chapter,
        next: &mut Chapter,
        winning_option: u8,
    ) -> Result<AdvanceOutcome, DomainError> {
        self.finish_publication(quest, next, resolved.chapter_number)
            .await?;

        self.notify_winners(resolved, winning_option).await;

        if !quest.is_active() {
            info!("quest completed");
            return Ok(AdvanceOutcome::Completed {
                chapter_number: next.chapter_number,
            });
        }
        if let Err(e) = self.schedule_collection(quest).await {
            error!(error = %e, "collect-votes task not scheduled");
        }
        Ok(AdvanceOutcome::Advanced {
            chapter_number: next.chapter_number,
            winning_option,
        })
    }

    /// Records the winner of `chapter_number` in the quest path from the
    /// persisted votes, if the path lacks it.
    async fn backfill_choice(
        &self,
        quest: &mut Quest,
        chapters: &[Chapter],
        chapter_number: u32,
    ) -> Result<(), DomainError> {
        if quest.state.winning_option_for(chapter_number).is_some() {
            return Ok(());
        }
        let Some(resolved) = chapters.iter().find(|c| c.chapter_number == chapter_number) else {
            return Ok(());
        };
        let votes = self.store.list_votes(resolved.id).await?;
        let option_count = u8::try_from(resolved.options.len()).unwrap_or(u8::MAX);
        let result = tally(
            votes.iter().map(|v| (v.selected_option, v.weight)),
            option_count,
        );
        quest.state.record_choice(PathStep {
            chapter_number,
            winning_option: result.winning_option,
            choice_text: resolved
                .options
                .option_text(result.winning_option)
                .unwrap_or_default()
                .to_owned(),
        });
        Ok(())
    }
}

fn build_history(
    chapters: &[Chapter],
    state: &QuestState,
    resolved: u32,
    winning_option: u8,
) -> Vec<ChapterHistoryEntry> {
    chapters
        .iter()
        .filter(|c| c.chapter_number <= resolved)
        .map(|c| ChapterHistoryEntry {
            chapter_number: c.chapter_number,
            title: c.title.clone(),
            content: c.content.clone(),
            options: c.options.to_vec(),
            winning_option: if c.chapter_number == resolved {
                Some(winning_option)
            } else {
                state.winning_option_for(c.chapter_number)
            },
        })
        .collect()
}

#[async_trait]
impl QuestProgression for QuestEngine {
    /// Checks, in order: the quest exists, the chapter exists, the quest has
    /// not already moved past the chapter, the quest is ACTIVE, and the
    /// chapter is the current one. Then collects votes, generates and posts
    /// the next chapter, notifies winners and schedules the next round.
    #[instrument(skip(self))]
    async fn advance(
        &self,
        quest_id: Uuid,
        chapter_number: u32,
    ) -> Result<AdvanceOutcome, DomainError> {
        let mut quest = self
            .store
            .get_quest(quest_id)
            .await?
            .ok_or(DomainError::QuestNotFound(quest_id))?;
        let chapters = self.store.list_chapters(quest_id).await?;
        let chapter = chapters
            .iter()
            .find(|c| c.chapter_number == chapter_number)
            .cloned()
            .ok_or(DomainError::ChapterNotFound {
                quest_id,
                chapter_number,
            })?;

        if quest.current_chapter_number > chapter_number {
            info!(
                current = quest.current_chapter_number,
                "quest already past this chapter"
            );
            return Ok(AdvanceOutcome::AlreadyAdvanced);
        }
        if !quest.is_active() {
            info!(status = %quest.status, "quest not active");
            return Ok(AdvanceOutcome::Inactive);
        }
        if chapter_number > quest.current_chapter_number {
            return Err(DomainError::Validation(format!(
                "chapter {chapter_number} is ahead of quest progress ({})",
                quest.current_chapter_number
            )));
        }

        if chapter.options.is_terminal() {
            let mut chapter = chapter;
            self.finish_publication(&mut quest, &mut chapter, chapter_number)
                .await?;
            return Ok(AdvanceOutcome::Completed { chapter_number });
        }
        if !chapter.is_posted() {
            return Err(DomainError::Validation(format!(
                "chapter {chapter_number} has not been posted"
            )));
        }

        let next_number = chapter_number + 1;
        if let Some(existing) = chapters.iter().find(|c| c.chapter_number == next_number) {
            // The quest row still points at `chapter_number`, so an earlier
            // delivery saved the next chapter and then failed mid-transition.
            info!(
                next_number,
                posted = existing.is_posted(),
                "finishing interrupted transition"
            );
            let mut next = existing.clone();
            self.backfill_choice(&mut quest, &chapters, chapter_number)
                .await?;
            let winning_option = quest
                .state
                .winning_option_for(chapter_number)
                .unwrap_or(DEFAULT_WINNING_OPTION);
            return self
                .conclude_advance(&mut quest, &chapter, &mut next, winning_option)
                .await;
        }

        let deadline = quest.chapter_deadline.unwrap_or_else(|| self.clock.now());
        let votes = self.collector.collect_and_tally(&chapter, deadline).await?;
        let winning_option = votes.winning_option;

        let total = self.config.total_chapters;
        let terminal = next_number == total;
        let prompt = NextChapterPrompt {
            premise: quest.state.premise.clone(),
            history: build_history(&chapters, &quest.state, chapter_number, winning_option),
            winning_option,
            chapter_number: next_number,
            total_chapters: total,
        };
        let generated = self.generator.generate_next_chapter(&prompt).await?;
        if terminal && !generated.options.is_empty() {
            warn!(
                count = generated.options.len(),
                "discarding options generated for the final chapter"
            );
        }
        let options = ChapterOptions::from_generated(generated.options, terminal)?;
        let mut next = Chapter::new(
            quest.id,
            next_number,
            total,
            generated.title,
            generated.content,
            options,
            generated.sources,
            self.clock.now(),
        )?;

        if !self.store.create_chapter_if_absent(&next).await? {
            info!(next_number, "next chapter created concurrently");
            return Ok(AdvanceOutcome::AlreadyAdvanced);
        }

        quest.state.record_choice(PathStep {
            chapter_number,
            winning_option,
            choice_text: chapter
                .options
                .option_text(winning_option)
                .unwrap_or_default()
                .to_owned(),
        });
        self.conclude_advance(&mut quest, &chapter, &mut next, winning_option)
            .await
    }

    #[instrument(skip(self))]
    async fn resume_publication(&self, quest_id: Uuid) -> Result<ResumeOutcome, DomainError> {
        let mut quest = self
            .store
            .get_quest(quest_id)
            .await?
            .ok_or(DomainError::QuestNotFound(quest_id))?;
        if !quest.is_active() {
            return Ok(ResumeOutcome::NothingToDo);
        }
        let chapters = self.store.list_chapters(quest_id).await?;
        let Some(mut latest) = chapters.last().cloned() else {
            return Ok(ResumeOutcome::NothingToDo);
        };

        let current = quest.current_chapter_number;
        let ahead = latest.chapter_number > current;
        let lagging = latest.chapter_number == current
            && (!latest.is_posted() || quest.chapter_deadline.is_none());
        if !ahead && !lagging {
            return Ok(ResumeOutcome::NothingToDo);
        }

        if ahead {
            self.backfill_choice(&mut quest, &chapters, latest.chapter_number - 1)
                .await?;
        }
        let was_posted = latest.is_posted();
        self.finish_publication(&mut quest, &mut latest, current)
            .await?;

        if quest.is_active() {
            if let Err(e) = self.schedule_collection(&quest).await {
                error!(error = %e, "collect-votes task not scheduled");
            }
        }

        let chapter_number = latest.chapter_number;
        info!(chapter_number, was_posted, "interrupted transition finished");
        Ok(if was_posted {
            ResumeOutcome::Repaired { chapter_number }
        } else {
            ResumeOutcome::Published { chapter_number }
        })
    }

    async fn reschedule_collection(&self, quest: &Quest) -> Result<TaskHandle, DomainError> {
        self.schedule_collection(quest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use threadquest_core::generator::{ReplyInterpretation, VoteInterpretation};
    use threadquest_core::model::{MatchKind, QuestStatus};
    use threadquest_core::social::Reply;
    use threadquest_test_support::{
        InMemoryQuestStore, ManualClock, MockRng, RecordingScheduler, RecordingSocialClient,
        ScriptedGenerator,
    };

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    struct Harness {
        store: Arc<InMemoryQuestStore>,
        generator: Arc<ScriptedGenerator>,
        social: Arc<RecordingSocialClient>,
        scheduler: Arc<RecordingScheduler>,
        clock: Arc<ManualClock>,
        engine: QuestEngine,
    }

    impl Harness {
        fn with(
            generator: ScriptedGenerator,
            scheduler: RecordingScheduler,
            config: ProgressionConfig,
        ) -> Self {
            let store = Arc::new(InMemoryQuestStore::new());
            let generator = Arc::new(generator);
            let social = Arc::new(RecordingSocialClient::new());
            let scheduler = Arc::new(scheduler);
            let clock = Arc::new(ManualClock::new(fixed_now()));
            let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(MockRng));
            let engine = QuestEngine::new(
                store.clone(),
                generator.clone(),
                social.clone(),
                scheduler.clone(),
                clock.clone(),
                rng,
                config,
            )
            .with_bot_handle("questbot");
            Self {
                store,
                generator,
                social,
                scheduler,
                clock,
                engine,
            }
        }

        fn new() -> Self {
            Self::with(
                ScriptedGenerator::new(),
                RecordingScheduler::new(),
                ProgressionConfig::default(),
            )
        }

        async fn start(&self) -> Uuid {
            match self.engine.start_quest(&start_command(None)).await.unwrap() {
                StartOutcome::Started { quest_id, .. } => quest_id,
                other => panic!("expected Started, got {other:?}"),
            }
        }

        fn quest(&self, quest_id: Uuid) -> Quest {
            self.store.quest(quest_id).unwrap()
        }

        fn pass_deadline(&self) {
            self.clock.advance(TimeDelta::seconds(180));
        }
    }

    fn start_command(in_reply_to: Option<&str>) -> StartQuest {
        StartQuest {
            correlation_id: Uuid::new_v4(),
            origin_tweet_id: "tweet-1".into(),
            conversation_id: "conv-1".into(),
            reply_target: "tweet-1".into(),
            in_reply_to: in_reply_to.map(str::to_owned),
            seed_text: "a lighthouse keeper finds a map".into(),
            author_handle: "alice".into(),
        }
    }

    fn reply(handle: &str, text: &str, id: &str) -> Reply {
        Reply {
            author_handle: handle.into(),
            text: text.into(),
            message_id: id.into(),
        }
    }

    #[tokio::test]
    async fn test_start_quest_posts_chapter_one_and_schedules_collection() {
        // Arrange
        let harness = Harness::new();

        // Act
        let quest_id = harness.start().await;

        // Assert
        let quest = harness.quest(quest_id);
        assert_eq!(quest.status, QuestStatus::Active);
        assert_eq!(quest.current_chapter_number, 1);
        assert_eq!(quest.short_id, "00000000");
        assert_eq!(
            quest.chapter_deadline,
            Some(fixed_now() + TimeDelta::seconds(120))
        );
        assert_eq!(quest.last_posted_message_id.as_deref(), Some("posted-1"));

        let chapters = harness.store.chapters(quest_id);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].options.len(), 2);
        assert_eq!(chapters[0].posted_message_id, "posted-1");

        let posts = harness.social.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].reply_to, "tweet-1");
        assert!(posts[0].text.starts_with("Chapter 1/5: The Beginning"));

        let calls = harness.scheduler.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, COLLECT_VOTES);
        assert_eq!(calls[0].delay, Duration::from_secs(180));
        assert_eq!(
            CollectVotesPayload::from_json(&calls[0].payload).unwrap(),
            CollectVotesPayload {
                quest_id,
                chapter_number: 1
            }
        );
    }

    #[tokio::test]
    async fn test_second_start_in_same_conversation_notifies_once() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        let mut second = start_command(None);
        second.origin_tweet_id = "tweet-2".into();

        // Act
        let outcome = harness.engine.start_quest(&second).await.unwrap();

        // Assert
        assert_eq!(outcome, StartOutcome::AlreadyActive { quest_id });
        assert_eq!(harness.store.quests().len(), 1);
        assert_eq!(harness.generator.opening_calls(), 1);
        let notices: Vec<_> = harness
            .social
            .posts()
            .into_iter()
            .filter(|p| p.reply_to == "tweet-2")
            .collect();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].text.contains("already underway"));
    }

    #[tokio::test]
    async fn test_start_replying_to_posted_chapter_is_ignored() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;

        // Act
        let outcome = harness
            .engine
            .start_quest(&start_command(Some("posted-1")))
            .await
            .unwrap();

        // Assert
        assert_eq!(outcome, StartOutcome::IgnoredVoteReply { quest_id });
        assert_eq!(harness.social.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_blank_seed_is_rejected() {
        // Arrange
        let harness = Harness::new();
        let mut command = start_command(None);
        command.seed_text = "   ".into();

        // Act
        let result = harness.engine.start_quest(&command).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(harness.store.quests().is_empty());
    }

    #[tokio::test]
    async fn test_start_generation_failure_leaves_no_rows() {
        // Arrange
        let harness = Harness::with(
            ScriptedGenerator::failing(),
            RecordingScheduler::new(),
            ProgressionConfig::default(),
        );

        // Act
        let result = harness.engine.start_quest(&start_command(None)).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Generation(_))));
        assert!(harness.store.quests().is_empty());
        assert!(harness.social.posts().is_empty());
    }

    #[tokio::test]
    async fn test_start_post_failure_archives_quest() {
        // Arrange
        let harness = Harness::new();
        harness.social.set_fail_posts(true);

        // Act
        let result = harness.engine.start_quest(&start_command(None)).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Social(_))));
        let quests = harness.store.quests();
        assert_eq!(quests.len(), 1);
        assert_eq!(quests[0].status, QuestStatus::Archived);
        assert!(harness.scheduler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_schedule_failure_still_starts_quest() {
        // Arrange
        let harness = Harness::with(
            ScriptedGenerator::new(),
            RecordingScheduler::failing(),
            ProgressionConfig::default(),
        );

        // Act
        let outcome = harness.engine.start_quest(&start_command(None)).await.unwrap();

        // Assert
        let StartOutcome::Started { quest_id, .. } = outcome else {
            panic!("expected Started, got {outcome:?}");
        };
        let quest = harness.quest(quest_id);
        assert!(quest.is_active());
        assert!(quest.chapter_deadline.is_some());
    }

    #[tokio::test]
    async fn test_advance_picks_weighted_winner_and_posts_next_chapter() {
        // Arrange
        let interpretation = VoteInterpretation {
            per_reply: vec![
                ReplyInterpretation {
                    selected_option: 1,
                    weight: 1.0,
                    match_kind: MatchKind::ExplicitNumber,
                    note: String::new(),
                },
                ReplyInterpretation {
                    selected_option: 1,
                    weight: 1.0,
                    match_kind: MatchKind::ExplicitNumber,
                    note: String::new(),
                },
                ReplyInterpretation {
                    selected_option: 2,
                    weight: 0.8,
                    match_kind: MatchKind::Keyword,
                    note: String::new(),
                },
            ],
        };
        let harness = Harness::with(
            ScriptedGenerator::new().with_interpretation(interpretation),
            RecordingScheduler::new(),
            ProgressionConfig::default(),
        );
        let quest_id = harness.start().await;
        harness.social.seed_replies(
            "posted-1",
            vec![
                reply("bob", "1", "r-bob"),
                reply("carol", "1!", "r-carol"),
                reply("dave", "the second path", "r-dave"),
            ],
        );
        harness.pass_deadline();

        // Act
        let outcome = harness.engine.advance(quest_id, 1).await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                chapter_number: 2,
                winning_option: 1
            }
        );
        let prompts = harness.generator.next_prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].winning_option, 1);
        assert_eq!(prompts[0].history.len(), 1);
        assert_eq!(prompts[0].history[0].winning_option, Some(1));

        let quest = harness.quest(quest_id);
        assert_eq!(quest.current_chapter_number, 2);
        assert_eq!(
            quest.chapter_deadline,
            Some(fixed_now() + TimeDelta::seconds(180 + 120))
        );
        assert_eq!(quest.state.winning_option_for(1), Some(1));
        assert_eq!(quest.state.path[0].choice_text, "Path A1");

        let posts = harness.social.posts();
        let chapter_two = posts
            .iter()
            .find(|p| p.text.starts_with("Chapter 2/5"))
            .unwrap();
        assert_eq!(chapter_two.reply_to, "posted-1");
        let notified: Vec<_> = posts
            .iter()
            .filter(|p| p.text.contains("your pick won"))
            .map(|p| p.reply_to.as_str())
            .collect();
        assert_eq!(notified, vec!["r-bob", "r-carol"]);

        assert_eq!(harness.scheduler.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_advance_without_replies_defaults_to_option_one() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness.pass_deadline();

        // Act
        let outcome = harness.engine.advance(quest_id, 1).await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                chapter_number: 2,
                winning_option: 1
            }
        );
        assert_eq!(harness.generator.interpret_calls(), 0);
    }

    #[tokio::test]
    async fn test_second_advance_for_same_chapter_is_a_no_op() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness.pass_deadline();
        harness.engine.advance(quest_id, 1).await.unwrap();

        // Act
        let outcome = harness.engine.advance(quest_id, 1).await.unwrap();

        // Assert
        assert_eq!(outcome, AdvanceOutcome::AlreadyAdvanced);
        assert_eq!(harness.store.chapters(quest_id).len(), 2);
        assert_eq!(harness.generator.next_prompts().len(), 1);
        assert_eq!(harness.scheduler.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_advances_create_one_chapter() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness.pass_deadline();

        // Act
        let (first, second) = tokio::join!(
            harness.engine.advance(quest_id, 1),
            harness.engine.advance(quest_id, 1)
        );

        // Assert
        let outcomes = [first.unwrap(), second.unwrap()];
        let advanced = outcomes
            .iter()
            .filter(|o| matches!(o, AdvanceOutcome::Advanced { .. }))
            .count();
        assert_eq!(advanced, 1);
        assert!(outcomes.contains(&AdvanceOutcome::AlreadyAdvanced));
        assert_eq!(harness.store.chapters(quest_id).len(), 2);
        assert_eq!(harness.quest(quest_id).current_chapter_number, 2);
    }

    #[tokio::test]
    async fn test_advance_into_final_chapter_completes_quest() {
        // Arrange
        let config = ProgressionConfig {
            total_chapters: 2,
            ..ProgressionConfig::default()
        };
        let harness = Harness::with(ScriptedGenerator::new(), RecordingScheduler::new(), config);
        let quest_id = harness.start().await;
        harness.pass_deadline();

        // Act
        let outcome = harness.engine.advance(quest_id, 1).await.unwrap();

        // Assert
        assert_eq!(outcome, AdvanceOutcome::Completed { chapter_number: 2 });
        let quest = harness.quest(quest_id);
        assert_eq!(quest.status, QuestStatus::Completed);
        assert_eq!(quest.chapter_deadline, None);
        assert_eq!(quest.current_chapter_number, 2);
        assert_eq!(harness.scheduler.calls().len(), 1);
        let last = harness.social.posts().into_iter().last().unwrap();
        assert!(last.text.ends_with("The end."));
    }

    #[tokio::test]
    async fn test_advance_on_final_chapter_completes_without_scheduling() {
        // Arrange
        let config = ProgressionConfig {
            total_chapters: 2,
            ..ProgressionConfig::default()
        };
        let harness = Harness::with(ScriptedGenerator::new(), RecordingScheduler::new(), config);
        let quest_id = harness.start().await;
        let mut quest = harness.quest(quest_id);
        let final_chapter = Chapter::new(
            quest_id,
            2,
            2,
            "The End".into(),
            "All is well.".into(),
            ChapterOptions::Terminal,
            vec![],
            fixed_now(),
        )
        .unwrap();
        harness.store.insert_chapter(final_chapter);
        quest.current_chapter_number = 2;
        harness.store.insert_quest(quest);

        // Act
        let outcome = harness.engine.advance(quest_id, 2).await.unwrap();

        // Assert
        assert_eq!(outcome, AdvanceOutcome::Completed { chapter_number: 2 });
        let quest = harness.quest(quest_id);
        assert_eq!(quest.status, QuestStatus::Completed);
        assert_eq!(quest.chapter_deadline, None);
        assert_eq!(harness.scheduler.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_advance_ahead_of_progress_is_rejected() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness.pass_deadline();
        harness.engine.advance(quest_id, 1).await.unwrap();
        let mut quest = harness.quest(quest_id);
        quest.current_chapter_number = 1;
        harness.store.insert_quest(quest);

        // Act
        let result = harness.engine.advance(quest_id, 2).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_advance_on_archived_quest_is_inactive() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        let mut quest = harness.quest(quest_id);
        quest.archive(fixed_now());
        harness.store.insert_quest(quest);

        // Act
        let outcome = harness.engine.advance(quest_id, 1).await.unwrap();

        // Assert
        assert_eq!(outcome, AdvanceOutcome::Inactive);
    }

    #[tokio::test]
    async fn test_advance_unknown_chapter_is_not_found() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;

        // Act
        let result = harness.engine.advance(quest_id, 4).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::ChapterNotFound {
                chapter_number: 4,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_advance_post_failure_keeps_quest_resumable() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness.pass_deadline();
        harness.social.fail_replies_to("posted-1");

        // Act
        let result = harness.engine.advance(quest_id, 1).await;

        // Assert
        assert!(matches!(result, Err(DomainError::Social(_))));
        let quest = harness.quest(quest_id);
        assert_eq!(quest.current_chapter_number, 1);
        assert!(quest.state.path.is_empty());
        let chapters = harness.store.chapters(quest_id);
        assert_eq!(chapters.len(), 2);
        assert!(!chapters[1].is_posted());
    }

    #[tokio::test]
    async fn test_redelivered_advance_after_post_failure_publishes_next_chapter() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness
            .social
            .seed_replies("posted-1", vec![reply("bob", "2", "r-bob")]);
        harness.pass_deadline();
        harness.social.set_fail_posts(true);
        harness.engine.advance(quest_id, 1).await.unwrap_err();
        harness.social.set_fail_posts(false);

        // Act
        let outcome = harness.engine.advance(quest_id, 1).await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                chapter_number: 2,
                winning_option: 2
            }
        );
        let quest = harness.quest(quest_id);
        assert_eq!(quest.current_chapter_number, 2);
        assert!(quest.chapter_deadline.is_some());
        assert_eq!(quest.state.winning_option_for(1), Some(2));
        let chapters = harness.store.chapters(quest_id);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1].posted_message_id, "posted-2");
        assert_eq!(harness.generator.next_prompts().len(), 1);
        assert_eq!(harness.scheduler.calls().len(), 2);
        assert!(
            harness
                .social
                .posts()
                .iter()
                .any(|p| p.reply_to == "r-bob")
        );
    }

    #[tokio::test]
    async fn test_failed_winner_notification_does_not_abort_advance() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness
            .social
            .seed_replies("posted-1", vec![reply("bob", "2", "r-bob")]);
        harness.social.fail_replies_to("r-bob");
        harness.pass_deadline();

        // Act
        let outcome = harness.engine.advance(quest_id, 1).await.unwrap();

        // Assert
        assert_eq!(
            outcome,
            AdvanceOutcome::Advanced {
                chapter_number: 2,
                winning_option: 2
            }
        );
    }

    #[tokio::test]
    async fn test_resume_publishes_unposted_chapter_and_backfills_path() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        harness
            .social
            .seed_replies("posted-1", vec![reply("bob", "2", "r-bob")]);
        harness.pass_deadline();
        harness.social.set_fail_posts(true);
        harness.engine.advance(quest_id, 1).await.unwrap_err();
        harness.social.set_fail_posts(false);

        // Act
        let outcome = harness.engine.resume_publication(quest_id).await.unwrap();

        // Assert
        assert_eq!(outcome, ResumeOutcome::Published { chapter_number: 2 });
        let quest = harness.quest(quest_id);
        assert_eq!(quest.current_chapter_number, 2);
        assert!(quest.chapter_deadline.is_some());
        assert_eq!(quest.state.winning_option_for(1), Some(2));
        assert_eq!(harness.scheduler.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_repairs_quest_row_behind_posted_chapter() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;
        let mut chapter = Chapter::new(
            quest_id,
            2,
            5,
            "Chapter 2".into(),
            "Onward.".into(),
            ChapterOptions::choices("Left", "Right"),
            vec![],
            fixed_now(),
        )
        .unwrap();
        chapter.posted_message_id = "posted-external".into();
        harness.store.insert_chapter(chapter);

        // Act
        let outcome = harness.engine.resume_publication(quest_id).await.unwrap();

        // Assert
        assert_eq!(outcome, ResumeOutcome::Repaired { chapter_number: 2 });
        let quest = harness.quest(quest_id);
        assert_eq!(quest.current_chapter_number, 2);
        assert_eq!(quest.last_posted_message_id.as_deref(), Some("posted-external"));
        assert_eq!(quest.state.winning_option_for(1), Some(1));
        assert_eq!(harness.social.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_resume_on_consistent_quest_does_nothing() {
        // Arrange
        let harness = Harness::new();
        let quest_id = harness.start().await;

        // Act
        let outcome = harness.engine.resume_publication(quest_id).await.unwrap();

        // Assert
        assert_eq!(outcome, ResumeOutcome::NothingToDo);
        assert_eq!(harness.social.posts().len(), 1);
    }
}
