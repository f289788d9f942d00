//! Social platform contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A reply fetched from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    /// Handle of the author.
    pub author_handle: String,
    /// Reply text.
    pub text: String,
    /// Message id of the reply.
    pub message_id: String,
}

/// Orders replies oldest first by numeric message id. Platform ids grow
/// over time; ids that are not numeric sort last in their original order.
pub fn sort_oldest_first(replies: &mut [Reply]) {
    replies.sort_by_key(|r| r.message_id.parse::<u64>().unwrap_or(u64::MAX));
}

/// Media already uploaded to the platform, attached by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Media {
    /// Platform media ids.
    pub media_ids: Vec<String>,
}

/// Reads and posts messages on the social platform.
#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Posts `text` as a reply to `reply_to`, returning the new message id.
    async fn post(
        &self,
        reply_to: &str,
        text: &str,
        media: Option<&Media>,
    ) -> Result<String, DomainError>;

    /// Fetches replies addressed to `message_id` created before `before`,
    /// oldest first.
    async fn fetch_replies(
        &self,
        message_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<Reply>, DomainError>;
}
