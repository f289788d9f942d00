//! Startup recovery.
//!
//! Repairs quests whose voting deadline passed while the process was down,
//! re-submits collect-votes tasks that may have been lost, and finishes
//! transitions that stalled mid-flight. Runs once at startup and on demand.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use threadquest_core::clock::Clock;
use threadquest_core::error::DomainError;
use threadquest_core::model::Quest;
use threadquest_core::store::QuestStore;
use tracing::{error, info, instrument, warn};

use crate::application::engine::{QuestProgression, ResumeOutcome};
use crate::domain::commands::AdvanceOutcome;
use crate::domain::config::ProgressionConfig;

/// Counts from one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// ACTIVE quests inspected.
    pub scanned: usize,
    /// Overdue quests advanced directly.
    pub advanced: usize,
    /// Quests whose row lagged a posted chapter.
    pub repaired: usize,
    /// Quests whose collect-votes task was re-submitted.
    pub rescheduled: usize,
    /// Stalled quests whose latest chapter was published.
    pub resumed: usize,
    /// Quests that could not be recovered this pass.
    pub failed: usize,
}

enum Action {
    Advanced,
    Repaired,
    Rescheduled,
    Resumed,
    Skipped,
}

/// Scans ACTIVE quests and brings each back to a consistent, scheduled
/// state.
pub struct RecoveryScanner {
    store: Arc<dyn QuestStore>,
    progression: Arc<dyn QuestProgression>,
    clock: Arc<dyn Clock>,
    config: ProgressionConfig,
}

impl RecoveryScanner {
    #[must_use]
    pub fn new(
        store: Arc<dyn QuestStore>,
        progression: Arc<dyn QuestProgression>,
        clock: Arc<dyn Clock>,
        config: ProgressionConfig,
    ) -> Self {
        Self {
            store,
            progression,
            clock,
            config,
        }
    }

    /// Runs one pass over every ACTIVE quest.
    ///
    /// A failure on one quest is logged and counted; the scan continues.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` only if the ACTIVE quests cannot be listed.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RecoveryReport, DomainError> {
        let now = self.clock.now();
        let quests = self.store.list_active_quests().await?;
        let mut report = RecoveryReport {
            scanned: quests.len(),
            ..RecoveryReport::default()
        };

        for quest in &quests {
            match self.recover(quest, now).await {
                Ok(Action::Advanced) => report.advanced += 1,
                Ok(Action::Repaired) => report.repaired += 1,
                Ok(Action::Rescheduled) => report.rescheduled += 1,
                Ok(Action::Resumed) => report.resumed += 1,
                Ok(Action::Skipped) => {}
                Err(e) => {
                    error!(quest_id = %quest.id, error = %e, "recovery failed for quest");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            advanced = report.advanced,
            repaired = report.repaired,
            rescheduled = report.rescheduled,
            resumed = report.resumed,
            failed = report.failed,
            "recovery pass finished"
        );
        Ok(report)
    }

    async fn recover(&self, quest: &Quest, now: DateTime<Utc>) -> Result<Action, DomainError> {
        match quest.chapter_deadline {
            Some(deadline) if deadline < now => self.recover_overdue(quest).await,
            Some(_) => {
                self.progression.reschedule_collection(quest).await?;
                Ok(Action::Rescheduled)
            }
            None => {
                let stale_after =
                    TimeDelta::from_std(self.config.stale_after).unwrap_or(TimeDelta::MAX);
                if now.signed_duration_since(quest.updated_at) < stale_after {
                    // Probably mid-transition in another worker.
                    return Ok(Action::Skipped);
                }
                warn!(quest_id = %quest.id, "quest stalled without a deadline");
                Ok(resume_action(
                    self.progression.resume_publication(quest.id).await?,
                ))
            }
        }
    }

    async fn recover_overdue(&self, quest: &Quest) -> Result<Action, DomainError> {
        let chapters = self.store.list_chapters(quest.id).await?;
        let latest = chapters.last().map_or(0, |c| c.chapter_number);
        if latest > quest.current_chapter_number {
            info!(
                quest_id = %quest.id,
                latest,
                current = quest.current_chapter_number,
                "deadline is stale, repairing quest row"
            );
            return Ok(resume_action(
                self.progression.resume_publication(quest.id).await?,
            ));
        }

        info!(quest_id = %quest.id, chapter_number = quest.current_chapter_number, "advancing overdue quest");
        match self
            .progression
            .advance(quest.id, quest.current_chapter_number)
            .await?
        {
            AdvanceOutcome::Advanced { .. } | AdvanceOutcome::Completed { .. } => {
                Ok(Action::Advanced)
            }
            AdvanceOutcome::AlreadyAdvanced | AdvanceOutcome::Inactive => Ok(Action::Skipped),
        }
    }
}

fn resume_action(outcome: ResumeOutcome) -> Action {
    match outcome {
        ResumeOutcome::Published { .. } => Action::Resumed,
        ResumeOutcome::Repaired { .. } => Action::Repaired,
        ResumeOutcome::NothingToDo => Action::Skipped,
    }
}
