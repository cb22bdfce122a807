//! Shared test doubles: scripted agent providers, tools, usage sink, and a
//! failing broadcaster.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use nodeflow_core::{
    AgentConfig, AgentFactory, AgentProvider, BoxedError, Broadcaster, ChatMessage, Event,
    FileStore, TokenStream, Tool, ToolConfig, UsageRecord, UsageSink,
};

/// How a mock model responds to a streamed chat call.
#[derive(Clone)]
pub enum MockBehavior {
    /// Stream the last message's content back unchanged.
    Echo,
    /// Stream the uppercased input.
    Upper,
    /// Stream the input with a prefix.
    Prefix(String),
    /// Stream a fixed response regardless of input.
    Static(String),
    /// Stream the next scripted response per call; the last one repeats
    /// once the script is exhausted.
    Sequence(Arc<Mutex<VecDeque<String>>>),
    /// Fail when opening the stream.
    Fail(String),
    /// Yield a few chunks, then fail mid-stream.
    FailMidStream(String),
}

impl MockBehavior {
    pub fn sequence<I: IntoIterator<Item = S>, S: Into<String>>(responses: I) -> Self {
        MockBehavior::Sequence(Arc::new(Mutex::new(
            responses.into_iter().map(Into::into).collect(),
        )))
    }
}

struct MockAgent {
    behavior: MockBehavior,
}

/// Stream a response in small character windows so throttling and
/// accumulation paths actually see multiple chunks.
fn tokenize(response: String) -> TokenStream {
    let chunks: Vec<Result<String, BoxedError>> = response
        .chars()
        .collect::<Vec<_>>()
        .chunks(4)
        .map(|c| Ok(c.iter().collect::<String>()))
        .collect();
    futures::stream::iter(chunks).boxed()
}

#[async_trait]
impl AgentProvider for MockAgent {
    fn provider(&self) -> &str {
        "mock"
    }

    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, BoxedError> {
        let input = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let response = match &self.behavior {
            MockBehavior::Echo => input,
            MockBehavior::Upper => input.to_uppercase(),
            MockBehavior::Prefix(prefix) => format!("{}{}", prefix, input),
            MockBehavior::Static(text) => text.clone(),
            MockBehavior::Sequence(script) => {
                let mut script = script.lock();
                if script.len() > 1 {
                    script.pop_front().unwrap_or_default()
                } else {
                    script.front().cloned().unwrap_or_default()
                }
            }
            MockBehavior::Fail(message) => return Err(message.clone().into()),
            MockBehavior::FailMidStream(message) => {
                let message = message.clone();
                return Ok(async_stream::stream! {
                    yield Ok("partial ".to_string());
                    yield Err(BoxedError::from(message));
                }
                .boxed());
            }
        };
        Ok(tokenize(response))
    }
}

/// Factory routing by model name.
#[derive(Default)]
pub struct MockAgentFactory {
    models: HashMap<String, MockBehavior>,
}

impl MockAgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>, behavior: MockBehavior) -> Self {
        self.models.insert(model.into(), behavior);
        self
    }

    pub fn into_arc(self) -> Arc<dyn AgentFactory> {
        Arc::new(self)
    }
}

#[async_trait]
impl AgentFactory for MockAgentFactory {
    async fn create(&self, config: &AgentConfig) -> Result<Box<dyn AgentProvider>, BoxedError> {
        match self.models.get(&config.model) {
            Some(behavior) => Ok(Box::new(MockAgent {
                behavior: behavior.clone(),
            })),
            None => Err(format!("unknown model '{}'", config.model).into()),
        }
    }
}

/// Tool that renders its configuration map, for marshalling assertions.
pub struct ConfigEchoTool;

#[async_trait]
impl Tool for ConfigEchoTool {
    async fn execute(&self, _input: &str, config: &ToolConfig) -> Result<String, BoxedError> {
        Ok(serde_json::to_string(config)?)
    }
}

/// Tool failing a fixed number of times before succeeding.
pub struct FlakyTool {
    failures_left: AtomicU32,
}

impl FlakyTool {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
        }
    }
}

#[async_trait]
impl Tool for FlakyTool {
    async fn execute(&self, input: &str, _config: &ToolConfig) -> Result<String, BoxedError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err("transient failure".into());
        }
        Ok(format!("ok:{}", input))
    }
}

/// Usage sink collecting every record.
#[derive(Default)]
pub struct RecordingUsageSink {
    pub records: Mutex<Vec<UsageRecord>>,
}

impl RecordingUsageSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl UsageSink for RecordingUsageSink {
    async fn log(&self, record: UsageRecord) -> Result<(), BoxedError> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// File store backed by a fixed map.
pub struct MapFileStore {
    pub files: HashMap<String, String>,
}

#[async_trait]
impl FileStore for MapFileStore {
    async fn resolve_file_path(&self, file_id: &str) -> Option<String> {
        self.files.get(file_id).cloned()
    }
}

/// Broadcaster that always errors, to prove runs tolerate it.
pub struct FailingBroadcaster;

#[async_trait]
impl Broadcaster for FailingBroadcaster {
    async fn send(&self, _event: Event) -> Result<(), BoxedError> {
        Err("subscriber went away".into())
    }
}
