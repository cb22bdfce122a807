//! Broadcasting: status snapshots and streaming token events
//!
//! The broadcaster is the sole coupling between the engine and its
//! observers. The engine treats it as a write-only sink: send failures are
//! logged and swallowed, never terminating a run.
//!
//! Two event kinds exist:
//!
//! - `workflow_status` - a snapshot of the run (per-node states, truncated
//!   results, optional error). The terminal emit carries full results.
//! - `node_streaming` - one token chunk plus the accumulated partial text
//!   for a node. Emission is throttled per node (at most one broadcast per
//!   80 ms); the final complete partial is always emitted.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::BoxedError;

/// Minimum spacing between two streaming broadcasts for the same node.
pub const STREAM_THROTTLE: std::time::Duration = std::time::Duration::from_millis(80);

/// Maximum characters of a node result carried in non-terminal snapshots.
pub const SNAPSHOT_RESULT_LIMIT: usize = 500;

/// An event published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Snapshot of the whole run.
    WorkflowStatus {
        workflow_id: String,
        status: String,
        node_statuses: HashMap<String, String>,
        results: HashMap<String, String>,
        error: Option<String>,
    },
    /// One streamed token chunk for a node.
    NodeStreaming {
        workflow_id: String,
        node_id: String,
        chunk: String,
        partial: String,
    },
}

impl Event {
    /// The node a streaming event belongs to, if any.
    pub fn streaming_node(&self) -> Option<&str> {
        match self {
            Event::NodeStreaming { node_id, .. } => Some(node_id),
            Event::WorkflowStatus { .. } => None,
        }
    }
}

/// Write-only sink for engine events.
///
/// Implementations fan the events out to their subscribers (WebSocket
/// sessions, log files, test buffers). Errors are reported back but the
/// engine only logs them; a failing subscriber never fails a run.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver one event.
    async fn send(&self, event: Event) -> Result<(), BoxedError>;
}

/// In-memory broadcaster collecting every event, for tests and local
/// debugging.
#[derive(Default)]
pub struct MemoryBroadcaster {
    events: Mutex<Vec<Event>>,
}

impl MemoryBroadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of every event received so far, in arrival order.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// All streaming chunks received for one node, in arrival order.
    pub fn chunks_for(&self, node: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::NodeStreaming { node_id, chunk, .. } if node_id == node => {
                    Some(chunk.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// The last `workflow_status` event, if any.
    pub fn last_status(&self) -> Option<Event> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| matches!(e, Event::WorkflowStatus { .. }))
            .cloned()
    }
}

#[async_trait]
impl Broadcaster for MemoryBroadcaster {
    async fn send(&self, event: Event) -> Result<(), BoxedError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Broadcaster that forwards events into a bounded channel. Subscribers
/// (WebSocket pumps, SSE writers) consume the receiving end as a stream;
/// if the subscriber hangs up, sends fail and the engine logs and moves on.
pub struct ChannelBroadcaster {
    sender: mpsc::Sender<Event>,
}

impl ChannelBroadcaster {
    /// Create a broadcaster plus the event stream it feeds.
    pub fn channel(buffer: usize) -> (Arc<Self>, ReceiverStream<Event>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Arc::new(Self { sender }), ReceiverStream::new(receiver))
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn send(&self, event: Event) -> Result<(), BoxedError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| BoxedError::from("event subscriber dropped"))
    }
}
