//! Process configuration read from the environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use threadquest_quest::domain::config::ProgressionConfig;
use threadquest_scheduler::{RetryPolicy, WorkerConfig};

use crate::error::AppError;

/// Default OpenAI-compatible API base URL.
pub const DEFAULT_GENERATOR_BASE_URL: &str = "https://api.openai.com";

/// Default chat model.
pub const DEFAULT_GENERATOR_MODEL: &str = "gpt-4o-mini";

/// Default X API base URL.
pub const DEFAULT_X_API_BASE_URL: &str = "https://api.x.com";

/// Which `Scheduler` implementation runs collect-votes tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerBackend {
    /// Durable `scheduled_tasks` table polled by a worker.
    Postgres,
    /// In-memory tokio timers; tasks are lost on restart.
    InProcess,
}

impl FromStr for SchedulerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "in-process" => Ok(Self::InProcess),
            other => Err(format!("unknown scheduler backend {other:?}")),
        }
    }
}

/// Narrative generator connection settings.
#[derive(Clone)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// X API connection settings.
#[derive(Clone)]
pub struct XConfig {
    pub base_url: String,
    pub bearer_token: String,
}

impl fmt::Debug for XConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XConfig")
            .field("base_url", &self.base_url)
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub database_max_connections: u32,
    pub progression: ProgressionConfig,
    pub scheduler_backend: SchedulerBackend,
    pub worker: WorkerConfig,
    pub generator: GeneratorConfig,
    pub x: XConfig,
    /// The bot's own handle; its replies are never counted as votes.
    pub bot_handle: String,
}

impl AppConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required variable is missing, a value
    /// does not parse, or the quest timings are incoherent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let progression = ProgressionConfig {
            voting_window: Duration::from_secs(parse_or(&lookup, "QUEST_VOTING_WINDOW_SECS", 120)?),
            collection_delay: Duration::from_secs(parse_or(
                &lookup,
                "QUEST_COLLECTION_DELAY_SECS",
                180,
            )?),
            total_chapters: parse_or(&lookup, "QUEST_TOTAL_CHAPTERS", 5)?,
            stale_after: Duration::from_secs(parse_or(&lookup, "QUEST_STALE_AFTER_SECS", 600)?),
        };
        progression
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let max_attempts: u32 = parse_or(&lookup, "SCHEDULER_MAX_ATTEMPTS", 5)?;
        if max_attempts == 0 {
            return Err(AppError::Config(
                "SCHEDULER_MAX_ATTEMPTS must be at least 1".to_owned(),
            ));
        }
        let worker = WorkerConfig {
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "SCHEDULER_POLL_INTERVAL_MS",
                1000,
            )?),
            lease: Duration::from_secs(parse_or(&lookup, "SCHEDULER_LEASE_SECS", 300)?),
            retry: RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
            ..WorkerConfig::default()
        };

        Ok(Self {
            database_url: required(&lookup, "DATABASE_URL")?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_or(&lookup, "PORT", 3000)?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            progression,
            scheduler_backend: parse_or(&lookup, "SCHEDULER_BACKEND", SchedulerBackend::Postgres)?,
            worker,
            generator: GeneratorConfig {
                base_url: lookup("GENERATOR_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GENERATOR_BASE_URL.to_owned()),
                model: lookup("GENERATOR_MODEL")
                    .unwrap_or_else(|| DEFAULT_GENERATOR_MODEL.to_owned()),
                api_key: required(&lookup, "GENERATOR_API_KEY")?,
            },
            x: XConfig {
                base_url: lookup("X_API_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_X_API_BASE_URL.to_owned()),
                bearer_token: required(&lookup, "X_BEARER_TOKEN")?,
            },
            bot_handle: required(&lookup, "BOT_HANDLE")?,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, AppError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Config(format!("{key} environment variable must be set")))
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key} is invalid: {e}"))),
    }
}
