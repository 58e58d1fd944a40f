//! Chat client configuration.
//!
//! [`ChatConfig`] can be deserialized (every field but the credentials has a
//! default) or loaded from the `DIFY_*` environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ChatError, Result};

/// Default end-user identifier reported to the API.
pub const DEFAULT_USER: &str = "web-user";

/// Whether an early agent thought may stand in for the answer text.
///
/// Some agents emit their first reasoning step before (or instead of) any
/// `message` event. With [`ThoughtSeedPolicy::SeedOnFirstPosition`] the first
/// thought at position 1 seeds the reply when no answer text has arrived yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtSeedPolicy {
    /// Seed the reply from the first position-1 thought.
    #[default]
    SeedOnFirstPosition,
    /// Thoughts never touch the reply text.
    Never,
}

/// Bounded retry with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "RetryPolicy::default_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts, in milliseconds.
    #[serde(default = "RetryPolicy::default_delay_ms")]
    pub delay_ms: u64,
}

impl RetryPolicy {
    const fn default_max_retries() -> u32 {
        2
    }

    const fn default_delay_ms() -> u64 {
        2000
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    /// Total number of attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay between attempts as a `Duration`.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::default_max_retries(),
            delay_ms: Self::default_delay_ms(),
        }
    }
}

/// Configuration for a chat session.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Bearer token for the conversational-AI API.
    #[serde(default)]
    pub api_key: String,

    /// API base URL (e.g., `https://api.dify.ai/v1`).
    #[serde(default)]
    pub base_url: String,

    /// Same-origin proxy endpoint. When set, every request is sent to
    /// `{proxy_endpoint}?url=<target>` instead of the target itself.
    #[serde(default)]
    pub proxy_endpoint: Option<String>,

    /// End-user identifier.
    #[serde(default = "ChatConfig::default_user")]
    pub user: String,

    /// Ceiling for receiving response headers, in seconds.
    #[serde(default = "ChatConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Ceiling between two body chunks of a stream, in seconds.
    #[serde(default = "ChatConfig::default_request_timeout")]
    pub stream_idle_timeout_seconds: u64,

    /// Retry policy for suggested questions.
    #[serde(default)]
    pub suggestion_retry: RetryPolicy,

    /// Thought-seed fallback policy.
    #[serde(default)]
    pub thought_seed: ThoughtSeedPolicy,
}

impl ChatConfig {
    fn default_user() -> String {
        DEFAULT_USER.to_string()
    }

    const fn default_request_timeout() -> u64 {
        60
    }

    /// Create a configuration with default tuning.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `DIFY_API_KEY`, `DIFY_BASE_URL`,
    /// `DIFY_PROXY_URL` and `DIFY_USER`.
    ///
    /// Missing variables are left empty; call [`ChatConfig::validate`] before use.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            api_key: std::env::var("DIFY_API_KEY").unwrap_or_default(),
            base_url: std::env::var("DIFY_BASE_URL").unwrap_or_default(),
            proxy_endpoint: std::env::var("DIFY_PROXY_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            ..Self::default()
        };
        if let Ok(user) = std::env::var("DIFY_USER") {
            if !user.trim().is_empty() {
                config.user = user;
            }
        }
        config
    }

    /// Check that credentials and endpoint are present.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] describing the first missing value.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(ChatError::Configuration(
                "API key is not set (DIFY_API_KEY)".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(ChatError::Configuration(
                "API base URL is not set (DIFY_BASE_URL)".to_string(),
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ChatError::Configuration(format!(
                "API base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.user.trim().is_empty() {
            return Err(ChatError::Configuration("user must not be empty".to_string()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Get the header timeout as a `Duration`.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Get the stream idle timeout as a `Duration`.
    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_seconds)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            proxy_endpoint: None,
            user: Self::default_user(),
            request_timeout_seconds: Self::default_request_timeout(),
            stream_idle_timeout_seconds: Self::default_request_timeout(),
            suggestion_retry: RetryPolicy::default(),
            thought_seed: ThoughtSeedPolicy::default(),
        }
    }
}
