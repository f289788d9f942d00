//! Delayed task payloads.

use serde::{Deserialize, Serialize};
use threadquest_core::error::DomainError;
use uuid::Uuid;

/// Task kind that collects votes on a chapter and advances the quest.
pub const COLLECT_VOTES: &str = "collect-votes";

/// Payload of a `collect-votes` task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectVotesPayload {
    /// The quest to advance.
    pub quest_id: Uuid,
    /// The chapter whose votes are collected.
    pub chapter_number: u32,
}

impl CollectVotesPayload {
    /// Encodes the payload for the scheduler.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("CollectVotesPayload serialization is infallible")
    }

    /// Decodes a payload delivered by the scheduler.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the payload is malformed.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, DomainError> {
        Self::deserialize(value)
            .map_err(|e| DomainError::Validation(format!("invalid collect-votes payload: {e}")))
    }
}
