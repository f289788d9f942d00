//! Timing and length settings for quest progression.

use std::time::Duration;

use threadquest_core::error::DomainError;

/// Settings shared by the engine and the recovery scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressionConfig {
    /// Time between posting a chapter and its voting deadline.
    pub voting_window: Duration,
    /// Delay before the collect-votes task fires; at least `voting_window`.
    pub collection_delay: Duration,
    /// Chapters per quest; the last one has no options.
    pub total_chapters: u32,
    /// How long an ACTIVE quest may sit without a deadline before recovery
    /// treats it as stalled.
    pub stale_after: Duration,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            voting_window: Duration::from_secs(120),
            collection_delay: Duration::from_secs(180),
            total_chapters: 5,
            stale_after: Duration::from_secs(600),
        }
    }
}

impl ProgressionConfig {
    /// Checks the settings are coherent.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the quest would have fewer than
    /// two chapters or the collection task would fire before the deadline.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.total_chapters < 2 {
            return Err(DomainError::Validation(
                "a quest needs at least two chapters".to_owned(),
            ));
        }
        if self.collection_delay < self.voting_window {
            return Err(DomainError::Validation(
                "collection delay must not be shorter than the voting window".to_owned(),
            ));
        }
        Ok(())
    }

    /// Buffer between the voting deadline and the collect-votes task.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.collection_delay.saturating_sub(self.voting_window)
    }
}
