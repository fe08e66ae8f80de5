#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{str::FromStr, time::Duration};

use async_openai::types::chat::ReasoningEffort;
use bon::Builder;

/// Default OpenAI-compatible endpoint.
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Limits the Coordinator applies to reasoning service traffic.
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct PipelineConfig {
    /// Upper bound on concurrent calls during visual resolution and task
    /// evaluation.
    #[builder(default = 4)]
    max_concurrency: usize,
    /// Timeout applied to every single reasoning service call.
    #[builder(default = Duration::from_secs(120))]
    call_timeout:    Duration,
    /// Retries of transient failures after the first attempt.
    #[builder(default = 2)]
    max_retries:     u32,
    /// Delay before the first retry; doubled for each further retry.
    #[builder(default = Duration::from_millis(500))]
    retry_backoff:   Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    /// Reads limits from `LABCHECK_*` environment variables, keeping the
    /// default for anything missing or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self::builder()
            .max_concurrency(read_env("LABCHECK_MAX_CONCURRENCY", defaults.max_concurrency))
            .call_timeout(read_timeout_secs(
                "LABCHECK_CALL_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            ))
            .max_retries(read_env("LABCHECK_MAX_RETRIES", defaults.max_retries))
            .retry_backoff(Duration::from_millis(read_env(
                "LABCHECK_RETRY_BACKOFF_MS",
                defaults.retry_backoff.as_millis() as u64,
            )))
            .build()
    }

    /// Concurrency bound for fan-out stages, never below one.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Retries of transient failures.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Initial retry backoff.
    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }
}

/// Parses the optional reasoning-effort environment value into the OpenAI enum,
/// defaulting to `ReasoningEffort::Medium` when unset or unrecognised.
fn parse_reasoning_effort(val: Option<String>) -> ReasoningEffort {
    match val
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
        .unwrap_or("medium")
    {
        "low" => ReasoningEffort::Low,
        "high" => ReasoningEffort::High,
        _ => ReasoningEffort::Medium,
    }
}

/// OpenAI credentials and optional tuning parameters sourced from the
/// environment.
#[derive(Clone)]
pub struct OpenAiEnv {
    /// Base URL for the OpenAI-compatible API endpoint.
    api_base:         String,
    /// API key used to authenticate OpenAI requests.
    api_key:          String,
    /// Model used for structured extraction.
    model:            String,
    /// Image-capable model used for visual description.
    vision_model:     String,
    /// Optional temperature override, if provided.
    temperature:      Option<f32>,
    /// Optional top-p override, if provided.
    top_p:            Option<f32>,
    /// Reasoning effort hint to send with requests.
    reasoning_effort: ReasoningEffort,
}

impl OpenAiEnv {
    /// Construct an `OpenAiEnv` from environment variables; returns `None` if
    /// the API key or model is missing.
    pub fn from_env() -> Option<Self> {
        let api_base = std::env::var("OPENAI_ENDPOINT")
            .map(|value| value.trim().to_owned())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_key = std::env::var("OPENAI_API_KEY").ok()?.trim().to_owned();
        let model = std::env::var("OPENAI_MODEL").ok()?.trim().to_owned();

        if api_key.is_empty() || model.is_empty() {
            return None;
        }

        let vision_model = std::env::var("OPENAI_VISION_MODEL")
            .map(|value| value.trim().to_owned())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| model.clone());
        let temperature = std::env::var("OPENAI_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse::<f32>().ok());
        let top_p = std::env::var("OPENAI_TOP_P")
            .ok()
            .and_then(|s| s.parse::<f32>().ok());
        let reasoning_effort =
            parse_reasoning_effort(std::env::var("OPENAI_REASONING_EFFORT").ok());

        Some(Self {
            api_base,
            api_key,
            model,
            vision_model,
            temperature,
            top_p,
            reasoning_effort,
        })
    }

    /// Returns the API base URL used for OpenAI requests.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Returns the API key used for OpenAI requests.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the model used for structured extraction.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the model used for visual description.
    pub fn vision_model(&self) -> &str {
        &self.vision_model
    }

    /// Returns the configured temperature, if any.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Returns the configured top_p, if any.
    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }

    /// Returns the reasoning effort level (defaults to Medium when
    /// unspecified).
    pub fn reasoning_effort(&self) -> ReasoningEffort {
        self.reasoning_effort.clone()
    }
}

/// Parses an environment variable, falling back to `default` when parsing
/// fails or the variable is missing.
fn read_env<T: FromStr>(env: &str, default: T) -> T {
    std::env::var(env)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    Duration::from_secs(read_env(env, default_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrency(), 4);
        assert_eq!(config.call_timeout(), Duration::from_secs(120));
        assert_eq!(config.max_retries(), 2);
        assert_eq!(config.retry_backoff(), Duration::from_millis(500));
    }

    #[test]
    fn concurrency_is_at_least_one() {
        let config = PipelineConfig::builder().max_concurrency(0).build();
        assert_eq!(config.max_concurrency(), 1);
    }

    #[test]
    fn unparseable_values_fall_back() {
        assert_eq!(read_env("LABCHECK_TEST_UNSET_VARIABLE", 7u32), 7);
    }
}
