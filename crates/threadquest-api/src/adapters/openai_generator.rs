//! Narrative generator over an OpenAI-compatible chat completions API.
//!
//! Every call asks the model for a JSON object and deserializes it straight
//! into the generator contract types.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use threadquest_core::error::DomainError;
use threadquest_core::generator::{
    GeneratedChapter, NarrativeGenerator, NextChapterPrompt, OpeningPrompt, VoteInterpretation,
};
use threadquest_core::social::Reply;
use tracing::{debug, instrument};

use crate::config::GeneratorConfig;

const OPENING_INSTRUCTIONS: &str = "You write short interactive stories told one chapter at a \
time in a social media thread. Given a seed idea, write chapter 1. Respond with a JSON object: \
{\"title\": string, \"content\": string, \"options\": [string, string], \"sources\": [string]}. \
Keep content under 600 characters and each option under 80 characters. `sources` lists any \
real-world references you drew on and may be empty.";

const NEXT_INSTRUCTIONS: &str = "You continue an interactive story told one chapter at a time \
in a social media thread. Readers voted for `winning_option` at the end of the last chapter in \
`history`. Write chapter `chapter_number` of `total_chapters` so it follows from that choice. \
Respond with a JSON object: {\"title\": string, \"content\": string, \"options\": [string, \
string], \"sources\": [string]}. If `chapter_number` equals `total_chapters` this is the ending: \
resolve the story and return an empty `options` array. Keep content under 600 characters.";

const INTERPRET_INSTRUCTIONS: &str = "You read replies to a story chapter and decide which \
numbered option each reply votes for. For every reply, in the same order, return \
{\"selected_option\": 1 or 2, \"weight\": number between 0.1 and 1.0, \"match_kind\": one of \
\"explicit_number\", \"keyword\", \"ambiguous\", \"unclear\", \"note\": string}. Use weight 1.0 \
for an explicit number, 0.8 for a keyword match, 0.5 for an ambiguous lean and 0.1 for replies \
that do not read as a vote. Respond with a JSON object: {\"per_reply\": [...]}.";

/// Generator backed by an OpenAI-compatible `/v1/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct InterpretRequest<'a> {
    options: &'a [String],
    replies: Vec<&'a str>,
}

impl OpenAiGenerator {
    /// Creates a generator from its connection settings.
    #[must_use]
    pub fn new(config: &GeneratorConfig) -> Self {
        // Chapter generation can be slow.
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    async fn complete_json<T: DeserializeOwned>(
        &self,
        instructions: &str,
        input: &impl Serialize,
        temperature: f32,
    ) -> Result<T, DomainError> {
        let input = serde_json::to_string(input)
            .map_err(|e| DomainError::Generation(format!("failed to encode prompt: {e}")))?;
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_owned(),
                    content: Some(instructions.to_owned()),
                },
                ChatMessage {
                    role: "user".to_owned(),
                    content: Some(input),
                },
            ],
            temperature,
            response_format: json!({ "type": "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DomainError::Generation(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::Generation(format!(
                "generator returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| DomainError::Generation(format!("invalid response: {e}")))?;
        parse_completion(body)
    }
}

/// Pulls the JSON object out of the first choice.
fn parse_completion<T: DeserializeOwned>(response: ChatResponse) -> Result<T, DomainError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| DomainError::Generation("no content in generator response".to_owned()))?;

    serde_json::from_str(strip_code_fence(&content))
        .map_err(|e| DomainError::Generation(format!("unparseable generator output: {e}")))
}

/// Some models wrap JSON in a Markdown code fence even when asked not to.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[async_trait]
impl NarrativeGenerator for OpenAiGenerator {
    #[instrument(skip(self, prompt), fields(model = %self.model))]
    async fn generate_opening_chapter(
        &self,
        prompt: &OpeningPrompt,
    ) -> Result<GeneratedChapter, DomainError> {
        let chapter: GeneratedChapter = self.complete_json(OPENING_INSTRUCTIONS, prompt, 0.9).await?;
        debug!(title = %chapter.title, "opening chapter generated");
        Ok(chapter)
    }

    #[instrument(skip(self, prompt), fields(model = %self.model, chapter_number = prompt.chapter_number))]
    async fn generate_next_chapter(
        &self,
        prompt: &NextChapterPrompt,
    ) -> Result<GeneratedChapter, DomainError> {
        let chapter: GeneratedChapter = self.complete_json(NEXT_INSTRUCTIONS, prompt, 0.9).await?;
        debug!(title = %chapter.title, "next chapter generated");
        Ok(chapter)
    }

    #[instrument(skip(self, replies, options), fields(model = %self.model, replies = replies.len()))]
    async fn interpret_votes(
        &self,
        replies: &[Reply],
        options: &[String],
    ) -> Result<VoteInterpretation, DomainError> {
        let input = InterpretRequest {
            options,
            replies: replies.iter().map(|r| r.text.as_str()).collect(),
        };
        self.complete_json(INTERPRET_INSTRUCTIONS, &input, 0.0).await
    }
}
