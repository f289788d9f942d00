//! Social client over the X API v2.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use threadquest_core::error::DomainError;
use threadquest_core::social::{Media, Reply, SocialClient, sort_oldest_first};
use tracing::{debug, instrument, warn};

use crate::config::XConfig;

/// Upper bound on search pages read per fetch.
const MAX_REPLY_PAGES: usize = 10;

/// X API v2 client authenticated with a bearer token.
#[derive(Clone)]
pub struct XClient {
    client: Client,
    base_url: String,
    bearer_token: String,
}

#[derive(Debug, Serialize)]
struct CreatePostRequest<'a> {
    text: &'a str,
    reply: ReplySettings<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaSettings<'a>>,
}

#[derive(Debug, Serialize)]
struct ReplySettings<'a> {
    in_reply_to_tweet_id: &'a str,
}

#[derive(Debug, Serialize)]
struct MediaSettings<'a> {
    media_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CreatePostResponse {
    data: CreatedPost,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<SearchPost>,
    #[serde(default)]
    includes: SearchIncludes,
    #[serde(default)]
    meta: SearchMeta,
}

#[derive(Debug, Deserialize)]
struct SearchPost {
    id: String,
    text: String,
    author_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchIncludes {
    #[serde(default)]
    users: Vec<SearchUser>,
}

#[derive(Debug, Deserialize)]
struct SearchUser {
    id: String,
    username: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchMeta {
    next_token: Option<String>,
}

impl XClient {
    /// Creates a client from its connection settings.
    #[must_use]
    pub fn new(config: &XConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            bearer_token: config.bearer_token.clone(),
        }
    }
}

fn transport_error(e: reqwest::Error) -> DomainError {
    DomainError::Social(format!("request failed: {e}"))
}

async fn status_error(response: reqwest::Response) -> DomainError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return DomainError::Social("rate limited by X API".to_owned());
    }
    let body = response.text().await.unwrap_or_default();
    DomainError::Social(format!("X API returned {status}: {body}"))
}

fn post_request<'a>(
    reply_to: &'a str,
    text: &'a str,
    media: Option<&'a Media>,
) -> CreatePostRequest<'a> {
    CreatePostRequest {
        text,
        reply: ReplySettings {
            in_reply_to_tweet_id: reply_to,
        },
        media: media
            .filter(|m| !m.media_ids.is_empty())
            .map(|m| MediaSettings {
                media_ids: &m.media_ids,
            }),
    }
}

/// Converts a search page into replies, resolving author ids to handles.
fn replies_from_page(page: SearchPage) -> Vec<Reply> {
    let handles: HashMap<String, String> = page
        .includes
        .users
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect();

    page.data
        .into_iter()
        .filter_map(|post| {
            let Some(author_handle) = post.author_id.as_ref().and_then(|id| handles.get(id))
            else {
                warn!(message_id = %post.id, "reply without a resolvable author, skipping");
                return None;
            };
            Some(Reply {
                author_handle: author_handle.clone(),
                text: post.text,
                message_id: post.id,
            })
        })
        .collect()
}

/// Search returns newest first; voting needs the reverse.
fn replies_oldest_first(pages: Vec<SearchPage>) -> Vec<Reply> {
    let mut replies: Vec<Reply> = pages.into_iter().flat_map(replies_from_page).collect();
    sort_oldest_first(&mut replies);
    replies
}

#[async_trait]
impl SocialClient for XClient {
    #[instrument(skip(self, text, media))]
    async fn post(
        &self,
        reply_to: &str,
        text: &str,
        media: Option<&Media>,
    ) -> Result<String, DomainError> {
        let response = self
            .client
            .post(format!("{}/2/tweets", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&post_request(reply_to, text, media))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: CreatePostResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Social(format!("invalid response: {e}")))?;
        debug!(message_id = %body.data.id, "posted");
        Ok(body.data.id)
    }

    #[instrument(skip(self))]
    async fn fetch_replies(
        &self,
        message_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<Reply>, DomainError> {
        let query = format!("in_reply_to_tweet_id:{message_id}");
        let end_time = before.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut pages = Vec::new();
        let mut next_token: Option<String> = None;

        for _ in 0..MAX_REPLY_PAGES {
            let mut params = vec![
                ("query", query.clone()),
                ("end_time", end_time.clone()),
                ("max_results", "100".to_owned()),
                ("expansions", "author_id".to_owned()),
                ("tweet.fields", "author_id".to_owned()),
                ("user.fields", "username".to_owned()),
            ];
            if let Some(token) = next_token.take() {
                params.push(("next_token", token));
            }

            let response = self
                .client
                .get(format!("{}/2/tweets/search/recent", self.base_url))
                .bearer_auth(&self.bearer_token)
                .query(&params)
                .send()
                .await
                .map_err(transport_error)?;

            if !response.status().is_success() {
                return Err(status_error(response).await);
            }

            let page: SearchPage = response
                .json()
                .await
                .map_err(|e| DomainError::Social(format!("invalid response: {e}")))?;
            next_token = page.meta.next_token.clone();
            pages.push(page);

            if next_token.is_none() {
                break;
            }
        }

        let replies = replies_oldest_first(pages);
        debug!(count = replies.len(), "replies fetched");
        Ok(replies)
    }
}
