//! Streaming agent invocation
//!
//! Consumes an agent provider's token stream sequentially, accumulating the
//! content while broadcasting throttled `node_streaming` events. On any
//! provider failure the node falls back to `fallbackModel` (when set) after
//! broadcasting a human-readable transition marker; a fallback failure
//! propagates to the retry wrapper.

use std::time::Instant;

use futures::StreamExt;

use crate::engine::{WorkflowEngine, DEFAULT_MODEL};
use crate::error::{EngineError, Result};
use crate::provider::{AgentConfig, ChatMessage};
use crate::text::strip_artifacts;
use crate::workflow::WorkflowNode;

impl WorkflowEngine {
    /// `agent` node handler.
    pub(crate) async fn run_agent_node(&self, node: &WorkflowNode, input: &str) -> Result<String> {
        let data = &node.data;
        let model = data.str_or("model", DEFAULT_MODEL);
        let system_prompt = data.str_or("systemPrompt", "You are a helpful assistant.");
        let temperature = data.f64_or("temperature", 0.7);
        let max_tokens = data.u64_or("maxTokens", 4096);

        // Keep embedded binary payloads away from the model.
        let input = strip_artifacts(input);

        let config = AgentConfig::new(model, system_prompt.clone(), temperature, max_tokens);
        let started = Instant::now();

        match self.stream_agent(&node.id, &config, &input, Some("")).await {
            Ok((content, provider)) => {
                self.log_usage(&config.model, &provider, started.elapsed()).await;
                Ok(content)
            }
            Err(primary_error) => {
                let fallback = data.str_or("fallbackModel", "");
                if fallback.is_empty() {
                    return Err(primary_error);
                }

                let marker = format!("[Fallback: {} → {}]", config.model, fallback);
                self.reset_stream_throttle(&node.id);
                self.emit_stream(&node.id, &marker, &marker).await;

                let fallback_config =
                    AgentConfig::new(fallback, system_prompt, temperature, max_tokens);
                let started = Instant::now();
                let (content, provider) = self
                    .stream_agent(&node.id, &fallback_config, &input, Some(""))
                    .await?;
                self.log_usage(&fallback_config.model, &provider, started.elapsed())
                    .await;
                Ok(content)
            }
        }
    }

    /// Acquire a provider for `config` and consume its token stream on this
    /// task. Returns the accumulated content and the provider identifier.
    ///
    /// `broadcast` controls streaming events: `None` collects silently
    /// (critics, validators); `Some(prefix)` emits throttled
    /// `node_streaming` events whose partial text is `prefix + content`
    /// (the chunker passes already-finished windows as the prefix). The
    /// final complete partial is always emitted.
    pub(crate) async fn stream_agent(
        &self,
        node_id: &str,
        config: &AgentConfig,
        input: &str,
        broadcast: Option<&str>,
    ) -> Result<(String, String)> {
        let factory = self
            .agents
            .as_ref()
            .ok_or_else(|| EngineError::Provider("no agent factory configured".to_string()))?;

        let agent = factory
            .create(config)
            .await
            .map_err(|e| EngineError::Provider(format!("{}: {}", config.model, e)))?;
        let provider = agent.provider().to_string();

        let mut stream = agent
            .stream_chat(vec![ChatMessage::user(input)])
            .await
            .map_err(|e| EngineError::Provider(format!("{}: {}", config.model, e)))?;

        let mut content = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| EngineError::Provider(format!("{}: {}", config.model, e)))?;
            content.push_str(&chunk);
            if let Some(prefix) = broadcast {
                let partial = format!("{}{}", prefix, content);
                self.emit_stream(node_id, &chunk, &partial).await;
            }
        }

        if let Some(prefix) = broadcast {
            self.reset_stream_throttle(node_id);
            let partial = format!("{}{}", prefix, content);
            self.emit_stream(node_id, "", &partial).await;
        }

        Ok((content, provider))
    }
}
