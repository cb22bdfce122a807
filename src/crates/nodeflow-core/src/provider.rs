//! Adapter contracts the engine consumes: agent providers, usage sink,
//! file store.
//!
//! nodeflow is an orchestration engine, not an LLM client library. The core
//! defines traits; concrete adapters (Anthropic, OpenAI, local runtimes,
//! databases, object stores) live outside and are registered at startup.
//! Every trait object is `Send + Sync` so handlers can share them across
//! level-parallel tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use std::pin::Pin;

use crate::error::BoxedError;

/// A lazily-produced stream of token chunks. Errors terminate the stream
/// and propagate to the invoking handler (which may fall back to another
/// model).
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, BoxedError>> + Send>>;

/// One chat message handed to an agent provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// Build a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Build an `assistant` message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Parameters an agent node resolves before acquiring a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Model identifier, also the factory's routing key
    pub model: String,
    pub system_prompt: String,
    /// Sampling temperature, clamped to [0.0, 2.0]
    pub temperature: f64,
    /// Maximum completion tokens, at least 1
    pub max_tokens: u64,
}

impl AgentConfig {
    /// Build a config, clamping `temperature` and `max_tokens` into their
    /// valid ranges.
    pub fn new(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f64,
        max_tokens: u64,
    ) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            temperature: temperature.clamp(0.0, 2.0),
            max_tokens: max_tokens.max(1),
        }
    }
}

/// A streaming token producer for one configured model.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Provider family identifier surfaced in usage events
    /// (`anthropic`, `openai`, `local`, …).
    fn provider(&self) -> &str;

    /// Open a token stream for the given conversation. The engine consumes
    /// the stream sequentially on the invoking task.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, BoxedError>;
}

/// Factory resolving an [`AgentConfig`] to a provider adapter. Registered
/// once at engine construction; unknown models should return an error the
/// invoking node's fallback/retry policy can act on.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(&self, config: &AgentConfig) -> Result<Box<dyn AgentProvider>, BoxedError>;
}

/// One usage accounting record, emitted after each agent call.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UsageRecord {
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    /// Always `"workflow"` for engine-originated calls
    pub source: String,
    pub at: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a workflow-sourced record stamped now.
    pub fn workflow(model: impl Into<String>, provider: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            input_tokens: 0,
            output_tokens: 0,
            duration_ms,
            source: "workflow".to_string(),
            at: Utc::now(),
        }
    }
}

/// Best-effort usage accounting sink. Failures are logged and ignored.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn log(&self, record: UsageRecord) -> Result<(), BoxedError>;
}

/// Uploaded-file resolution for `input` nodes carrying a `fileId`.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Resolve a file id to a filesystem path, or `None` when unknown.
    async fn resolve_file_path(&self, file_id: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_clamps() {
        let config = AgentConfig::new("m", "sp", 7.5, 0);
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.max_tokens, 1);

        let config = AgentConfig::new("m", "sp", -1.0, 4096);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 4096);
    }

    #[test]
    fn test_usage_record_shape() {
        let record = UsageRecord::workflow("model-x", "anthropic", 1234);
        assert_eq!(record.source, "workflow");
        assert_eq!(record.duration_ms, 1234);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["provider"], "anthropic");
    }

    #[test]
    fn test_chat_message_builders() {
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::assistant("ok").role, "assistant");
    }
}
