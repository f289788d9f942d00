//! Test social client — records posts and serves canned replies.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use threadquest_core::error::DomainError;
use threadquest_core::social::{Media, Reply, SocialClient};

/// A message captured by [`RecordingSocialClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    /// Message id assigned to the post.
    pub message_id: String,
    /// The message replied to.
    pub reply_to: String,
    /// Posted text.
    pub text: String,
}

/// A social client that assigns sequential message ids (`posted-1`,
/// `posted-2`, ...) and returns replies seeded per message id.
#[derive(Debug, Default)]
pub struct RecordingSocialClient {
    posts: Mutex<Vec<PostedMessage>>,
    replies: Mutex<HashMap<String, Vec<Reply>>>,
    failing_reply_targets: Mutex<HashSet<String>>,
    fail_posts: AtomicBool,
    fail_fetches: AtomicBool,
    next_id: AtomicUsize,
    fetches: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl RecordingSocialClient {
    /// Creates a client with no seeded replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the replies returned for `message_id`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn seed_replies(&self, message_id: &str, replies: Vec<Reply>) {
        self.replies
            .lock()
            .unwrap()
            .insert(message_id.to_owned(), replies);
    }

    /// Makes every post fail (or succeed again).
    pub fn set_fail_posts(&self, failing: bool) {
        self.fail_posts.store(failing, Ordering::SeqCst);
    }

    /// Makes every reply fetch fail (or succeed again).
    pub fn set_fail_fetches(&self, failing: bool) {
        self.fail_fetches.store(failing, Ordering::SeqCst);
    }

    /// Makes posts replying to `message_id` fail.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_replies_to(&self, message_id: &str) {
        self.failing_reply_targets
            .lock()
            .unwrap()
            .insert(message_id.to_owned());
    }

    /// Returns a snapshot of all successful posts.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn posts(&self) -> Vec<PostedMessage> {
        self.posts.lock().unwrap().clone()
    }

    /// Returns the `(message_id, before)` pairs passed to `fetch_replies`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fetches(&self) -> Vec<(String, DateTime<Utc>)> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocialClient for RecordingSocialClient {
    async fn post(
        &self,
        reply_to: &str,
        text: &str,
        _media: Option<&Media>,
    ) -> Result<String, DomainError> {
        if self.fail_posts.load(Ordering::SeqCst)
            || self.failing_reply_targets.lock().unwrap().contains(reply_to)
        {
            return Err(DomainError::Social("503 service unavailable".into()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = format!("posted-{n}");
        self.posts.lock().unwrap().push(PostedMessage {
            message_id: message_id.clone(),
            reply_to: reply_to.to_owned(),
            text: text.to_owned(),
        });
        Ok(message_id)
    }

    async fn fetch_replies(
        &self,
        message_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<Reply>, DomainError> {
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(DomainError::Social("429 too many requests".into()));
        }
        self.fetches
            .lock()
            .unwrap()
            .push((message_id.to_owned(), before));
        Ok(self
            .replies
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .unwrap_or_default())
    }
}
