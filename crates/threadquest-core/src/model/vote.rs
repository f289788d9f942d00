//! Votes and voters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lowest weight an interpreted reply can carry.
pub const MIN_VOTE_WEIGHT: f64 = 0.1;

/// Highest weight an interpreted reply can carry.
pub const MAX_VOTE_WEIGHT: f64 = 1.0;

/// How confidently a reply was mapped to an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// The reply names the option number.
    ExplicitNumber,
    /// The reply echoes words from the option text.
    Keyword,
    /// The reply leans toward an option without saying so.
    Ambiguous,
    /// The reply could not be read as a vote.
    Unclear,
}

impl MatchKind {
    /// Weight conventionally assigned to this kind of match.
    #[must_use]
    pub fn default_weight(self) -> f64 {
        match self {
            Self::ExplicitNumber => 1.0,
            Self::Keyword => 0.8,
            Self::Ambiguous => 0.5,
            Self::Unclear => 0.1,
        }
    }
}

/// Clamps an interpretation weight into `[MIN_VOTE_WEIGHT, MAX_VOTE_WEIGHT]`.
/// Non-finite input falls to the minimum.
#[must_use]
pub fn clamp_weight(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.clamp(MIN_VOTE_WEIGHT, MAX_VOTE_WEIGHT)
    } else {
        MIN_VOTE_WEIGHT
    }
}

/// An external identity that has voted at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voter {
    /// Voter identifier.
    pub id: Uuid,
    /// Handle on the social platform.
    pub handle: String,
    /// When the voter was first seen.
    pub created_at: DateTime<Utc>,
}

/// A vote to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewVote {
    /// The chapter voted on.
    pub chapter_id: Uuid,
    /// Handle of the voter; created lazily if unknown.
    pub voter_handle: String,
    /// 1-based option index.
    pub selected_option: u8,
    /// Interpretation weight.
    pub weight: f64,
    /// Raw reply text.
    pub reply_text: String,
    /// Message id of the reply.
    pub reply_message_id: String,
    /// Interpretation note.
    pub note: String,
}

/// A persisted vote.
#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    /// Vote identifier.
    pub id: Uuid,
    /// The chapter voted on.
    pub chapter_id: Uuid,
    /// The voter.
    pub voter_id: Uuid,
    /// Handle of the voter.
    pub voter_handle: String,
    /// 1-based option index.
    pub selected_option: u8,
    /// Interpretation weight.
    pub weight: f64,
    /// Raw reply text.
    pub reply_text: String,
    /// Message id of the reply.
    pub reply_message_id: String,
    /// Interpretation note.
    pub note: String,
    /// When the vote was recorded.
    pub recorded_at: DateTime<Utc>,
}
