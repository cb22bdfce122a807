//! Workflow execution engine
//!
//! One [`WorkflowEngine`] instance owns one run: it analyzes the definition
//! into topological levels, walks the levels in order, fans active nodes of
//! a level out concurrently, and joins them before advancing. All per-run
//! mutable state lives behind a single mutex with short, await-free lock
//! scopes, so level-parallel peers serialize their writes to
//! `blocked_edges`, `skip_nodes`, `variables`, and the stream-throttle map.
//!
//! ```text
//!  WorkflowDefinition ──► GraphAnalysis ──► levels
//!                                             │
//!          ┌──────────── per level ───────────┘
//!          ▼
//!   filter skip_nodes ─► branch-skip fully-blocked nodes
//!          ▼
//!   mark running ─► dispatch handlers (inline, or join_all fan-out)
//!          ▼
//!   store results ─► write variables ─► broadcast snapshot
//! ```
//!
//! `run` never returns an error: fatal conditions (malformed graph, a node
//! failing under the `stop` policy, the run deadline) set the terminal
//! `error` status, broadcast one final full snapshot, and yield whatever
//! results completed.

mod agent;
mod branch;
mod chunk;
mod dispatch;
mod loops;
mod meta;

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use futures::FutureExt;
use nodeflow_tooling::async_utils::with_deadline;
use nodeflow_tooling::logging::timed;

use crate::broadcast::{Broadcaster, Event, SNAPSHOT_RESULT_LIMIT, STREAM_THROTTLE};
use crate::error::Result;
use crate::graph::GraphAnalysis;
use crate::provider::{AgentFactory, FileStore, UsageRecord, UsageSink};
use crate::retry::{execute_with_retry, RetrySpec};
use crate::text::{substitute_variables, truncate_chars};
use crate::tool::ToolRegistry;
use crate::workflow::{
    NodeId, NodeState, RunStatus, WorkflowDefinition, WorkflowNode,
};

/// Separator between parent results when collecting a node's input.
pub const JOIN_SEPARATOR: &str = "\n\n---\n\n";

/// Model used when an agent-flavored node does not name one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Default run deadline applied by scheduler-launched runs.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// Mutable per-run state. Owned exclusively by one engine for the lifetime
/// of one run; nothing survives across runs.
struct RunState {
    results: HashMap<NodeId, String>,
    node_statuses: HashMap<NodeId, NodeState>,
    blocked_edges: HashSet<String>,
    skip_nodes: HashSet<NodeId>,
    variables: HashMap<String, String>,
    last_stream_emit: HashMap<NodeId, Instant>,
    error: Option<String>,
    status: RunStatus,
}

impl RunState {
    fn new(definition: &WorkflowDefinition) -> Self {
        Self {
            results: HashMap::new(),
            node_statuses: definition
                .nodes
                .iter()
                .map(|n| (n.id.clone(), NodeState::Waiting))
                .collect(),
            blocked_edges: HashSet::new(),
            skip_nodes: HashSet::new(),
            variables: HashMap::new(),
            last_stream_emit: HashMap::new(),
            error: None,
            status: RunStatus::Pending,
        }
    }
}

/// Executes one workflow definition with level-parallel scheduling,
/// streaming broadcasts, retry/fallback semantics, and bounded recursion
/// for sub-workflows.
pub struct WorkflowEngine {
    definition: Arc<WorkflowDefinition>,
    workflow_id: String,
    nodes: HashMap<NodeId, WorkflowNode>,
    agents: Option<Arc<dyn AgentFactory>>,
    tools: Arc<ToolRegistry>,
    files: Option<Arc<dyn FileStore>>,
    usage: Option<Arc<dyn UsageSink>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    state: Mutex<RunState>,
}

impl WorkflowEngine {
    /// Create an engine for one run of `definition`. An empty
    /// `workflow_id` is replaced with a fresh UUID.
    pub fn new(definition: WorkflowDefinition, workflow_id: impl Into<String>) -> Self {
        let workflow_id = {
            let id = workflow_id.into();
            if id.is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                id
            }
        };
        let state = RunState::new(&definition);
        let nodes = definition
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();

        Self {
            definition: Arc::new(definition),
            workflow_id,
            nodes,
            agents: None,
            tools: Arc::new(ToolRegistry::new()),
            files: None,
            usage: None,
            broadcaster: None,
            state: Mutex::new(state),
        }
    }

    /// Install the agent-provider factory. Without one, agent-flavored
    /// nodes fail with a provider error (subject to their retry policy).
    pub fn with_agent_factory(mut self, factory: Arc<dyn AgentFactory>) -> Self {
        self.agents = Some(factory);
        self
    }

    /// Install the tool registry.
    pub fn with_tool_registry(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Install the uploaded-file store.
    pub fn with_file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = Some(files);
        self
    }

    /// Install the usage accounting sink.
    pub fn with_usage_sink(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Install the broadcast sink shared with all observers.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// The id used in every broadcast event of this run.
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Current pipeline-level status.
    pub fn status(&self) -> RunStatus {
        self.state.lock().status
    }

    /// Terminal error message, when the run ended in error.
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// Execute the workflow to completion and return the per-node results.
    ///
    /// Never fails: a malformed graph or a fatal node error is reflected in
    /// the terminal status/error accessors and the final `workflow_status`
    /// event, and the (possibly partial) results map is returned either way.
    pub async fn run(&self, initial_input: impl Into<String>) -> HashMap<NodeId, String> {
        let initial_input = initial_input.into();

        let analysis = match GraphAnalysis::analyze(&self.definition) {
            Ok(analysis) => analysis,
            Err(error) => {
                {
                    let mut state = self.state.lock();
                    state.status = RunStatus::Error;
                    state.error = Some(error.to_string());
                }
                self.fail_pending_nodes();
                self.emit_status(true).await;
                return self.results();
            }
        };

        {
            self.state.lock().status = RunStatus::Running;
        }
        self.emit_status(false).await;

        for level in analysis.levels() {
            if !self.run_level(level, &analysis, &initial_input).await {
                self.fail_pending_nodes();
                self.emit_status(true).await;
                return self.results();
            }
        }

        {
            self.state.lock().status = RunStatus::Completed;
        }
        self.emit_status(true).await;
        self.results()
    }

    /// Type-erased form of [`run`](Self::run), used at the sub-engine call
    /// sites (meta-agent, loop driver) to keep the recursive future finite.
    pub(crate) fn run_boxed(
        &self,
        initial_input: String,
    ) -> futures::future::BoxFuture<'_, HashMap<NodeId, String>> {
        self.run(initial_input).boxed()
    }

    /// Execute under a wall-clock deadline (zero disables it; scheduler
    /// launches use [`DEFAULT_RUN_TIMEOUT`]). On expiry the run is
    /// cancelled cooperatively, which also cancels in-flight sub-engines
    /// and agent streams; the partial results collected so far are
    /// returned after one final error broadcast.
    pub async fn run_with_timeout(
        &self,
        initial_input: impl Into<String>,
        timeout: Duration,
    ) -> HashMap<NodeId, String> {
        match with_deadline(timeout, self.run(initial_input)).await {
            Ok(results) => results,
            Err(deadline) => {
                {
                    let mut state = self.state.lock();
                    state.status = RunStatus::Error;
                    state.error = Some(format!("workflow run timed out: {}", deadline));
                }
                self.fail_pending_nodes();
                self.emit_status(true).await;
                self.results()
            }
        }
    }

    /// Run every active node of one level; returns false on a fatal
    /// failure (a node exhausted its retries under the `stop` policy).
    async fn run_level(
        &self,
        level: &[NodeId],
        analysis: &GraphAnalysis,
        initial_input: &str,
    ) -> bool {
        let mut active: Vec<&WorkflowNode> = Vec::new();

        for node_id in level {
            let Some(node) = self.nodes.get(node_id) else {
                continue;
            };

            {
                let state = self.state.lock();
                if state.skip_nodes.contains(node_id) {
                    // owned by a loop driver; it reports these nodes itself
                    continue;
                }
            }

            let incoming = analysis.incoming(node_id);
            let fully_blocked = {
                let state = self.state.lock();
                !incoming.is_empty()
                    && incoming.iter().all(|e| state.blocked_edges.contains(&e.id))
            };

            if fully_blocked {
                // The branch was not taken: complete with an empty result
                // and block the whole downstream cone.
                {
                    let mut state = self.state.lock();
                    state.results.insert(node_id.clone(), String::new());
                    state.node_statuses.insert(node_id.clone(), NodeState::Done);
                    for edge in analysis.outgoing(node_id) {
                        state.blocked_edges.insert(edge.id.clone());
                    }
                }
                self.emit_status(false).await;
                continue;
            }

            active.push(node);
        }

        if active.is_empty() {
            return true;
        }

        {
            let mut state = self.state.lock();
            for node in &active {
                state.node_statuses.insert(node.id.clone(), NodeState::Running);
            }
        }
        self.emit_status(false).await;

        let outcomes: Vec<(NodeId, Result<String>)> = if active.len() == 1 {
            let node = active[0];
            vec![(
                node.id.clone(),
                self.run_node(node, analysis, initial_input).await,
            )]
        } else {
            debug!(
                workflow = %self.workflow_id,
                nodes = active.len(),
                "running level in parallel"
            );
            futures::future::join_all(active.iter().map(|node| async move {
                (
                    node.id.clone(),
                    self.run_node(node, analysis, initial_input).await,
                )
            }))
            .await
        };

        let mut fatal: Option<(NodeId, String)> = None;
        for (node_id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    let set_variable = self
                        .nodes
                        .get(&node_id)
                        .and_then(|n| n.data.str_of("setVariable"))
                        .filter(|name| !name.is_empty());

                    let mut state = self.state.lock();
                    state.results.insert(node_id.clone(), result.clone());
                    state.node_statuses.insert(node_id.clone(), NodeState::Done);
                    if let Some(name) = set_variable {
                        state.variables.insert(name, result);
                    }
                }
                Err(error) => {
                    let mut state = self.state.lock();
                    state.node_statuses.insert(node_id.clone(), NodeState::Error);
                    if fatal.is_none() {
                        fatal = Some((node_id, error.to_string()));
                    }
                }
            }
        }
        self.emit_status(false).await;

        if let Some((node_id, error)) = fatal {
            let mut state = self.state.lock();
            state.status = RunStatus::Error;
            state.error = Some(format!("Node {}: {}", node_id, error));
            return false;
        }
        true
    }

    /// One node execution: collect input, dispatch the typed handler, all
    /// wrapped in the node's retry/error policy.
    async fn run_node(
        &self,
        node: &WorkflowNode,
        analysis: &GraphAnalysis,
        initial_input: &str,
    ) -> Result<String> {
        let spec = RetrySpec::from_data(&node.data);
        let label = format!("node {}", node.id);
        execute_with_retry(&node.id, &spec, || {
            timed(&label, self.execute_node(node, analysis, initial_input)).boxed()
        })
        .await
    }

    /// Collect a node's input: concatenate unblocked parent results in edge
    /// order, fall back to the run's initial input for roots (or when every
    /// incoming edge is blocked), then substitute `{var:NAME}` references.
    pub(crate) fn collect_input(
        &self,
        node_id: &str,
        analysis: &GraphAnalysis,
        initial_input: &str,
    ) -> String {
        let state = self.state.lock();
        let parts: Vec<String> = analysis
            .incoming(node_id)
            .iter()
            .filter(|e| !state.blocked_edges.contains(&e.id))
            .map(|e| state.results.get(&e.source).cloned().unwrap_or_default())
            .collect();

        let raw = if parts.is_empty() {
            initial_input.to_string()
        } else {
            parts.join(JOIN_SEPARATOR)
        };

        substitute_variables(&raw, &state.variables)
    }

    /// Snapshot of the results map.
    pub(crate) fn results(&self) -> HashMap<NodeId, String> {
        self.state.lock().results.clone()
    }

    /// Mark every non-terminal node as errored. Called on fatal failure
    /// and on timeout so that the run never reports `waiting`/`running`
    /// states after it returned.
    fn fail_pending_nodes(&self) {
        let mut state = self.state.lock();
        for status in state.node_statuses.values_mut() {
            if !status.is_terminal() {
                *status = NodeState::Error;
            }
        }
    }

    /// Emit a `workflow_status` snapshot. Results are truncated except on
    /// the terminal emit. Broadcast failures are logged and swallowed.
    pub(crate) async fn emit_status(&self, full_results: bool) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };

        let event = {
            let state = self.state.lock();
            Event::WorkflowStatus {
                workflow_id: self.workflow_id.clone(),
                status: state.status.to_string(),
                node_statuses: state
                    .node_statuses
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_string()))
                    .collect(),
                results: state
                    .results
                    .iter()
                    .map(|(k, v)| {
                        let text = if full_results {
                            v.clone()
                        } else {
                            truncate_chars(v, SNAPSHOT_RESULT_LIMIT)
                        };
                        (k.clone(), text)
                    })
                    .collect(),
                error: state.error.clone(),
            }
        };

        if let Err(error) = broadcaster.send(event).await {
            warn!(workflow = %self.workflow_id, "status broadcast failed: {}", error);
        }
    }

    /// Emit a `node_streaming` event, throttled to one broadcast per node
    /// per [`STREAM_THROTTLE`]. The caller resets the throttle before the
    /// final complete emit so it is never dropped.
    pub(crate) async fn emit_stream(&self, node_id: &str, chunk: &str, partial: &str) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };

        {
            let mut state = self.state.lock();
            let now = Instant::now();
            if let Some(last) = state.last_stream_emit.get(node_id) {
                if now.duration_since(*last) < STREAM_THROTTLE {
                    return;
                }
            }
            state.last_stream_emit.insert(node_id.to_string(), now);
        }

        let event = Event::NodeStreaming {
            workflow_id: self.workflow_id.clone(),
            node_id: node_id.to_string(),
            chunk: chunk.to_string(),
            partial: partial.to_string(),
        };

        if let Err(error) = broadcaster.send(event).await {
            warn!(workflow = %self.workflow_id, node = node_id, "stream broadcast failed: {}", error);
        }
    }

    /// Forget the throttle timestamp for a node so the next streaming emit
    /// always goes out.
    pub(crate) fn reset_stream_throttle(&self, node_id: &str) {
        self.state.lock().last_stream_emit.remove(node_id);
    }

    /// Record a node's custom progress string (e.g. `chunk 2/5`).
    pub(crate) fn set_progress(&self, node_id: &str, progress: String) {
        self.state
            .lock()
            .node_statuses
            .insert(node_id.to_string(), NodeState::Progress(progress));
    }

    /// Hand a node set over to a loop driver: the top-level scheduler will
    /// not execute these nodes.
    pub(crate) fn own_loop_body(&self, body: &HashSet<NodeId>) {
        let mut state = self.state.lock();
        state.skip_nodes.extend(body.iter().cloned());
    }

    /// Install a loop body's final-iteration results and mark the body
    /// nodes done, so downstream collectors see them and every body node
    /// reports a terminal state.
    pub(crate) fn adopt_loop_results(
        &self,
        body: &HashSet<NodeId>,
        final_results: &HashMap<NodeId, String>,
    ) {
        let mut state = self.state.lock();
        for node_id in body {
            if let Some(result) = final_results.get(node_id) {
                state.results.insert(node_id.clone(), result.clone());
            }
            state.node_statuses.insert(node_id.clone(), NodeState::Done);
        }
    }

    /// Block a set of edges (branching handlers). Monotone-add only.
    pub(crate) fn block_edges<I: IntoIterator<Item = String>>(&self, edge_ids: I) {
        let mut state = self.state.lock();
        state.blocked_edges.extend(edge_ids);
    }

    /// All outgoing edges of a node in the original definition (including
    /// back-edges), in declaration order. Branching handlers block along
    /// these.
    pub(crate) fn outgoing_edges(&self, node_id: &str) -> Vec<crate::workflow::WorkflowEdge> {
        self.definition
            .edges
            .iter()
            .filter(|e| e.source == node_id)
            .cloned()
            .collect()
    }

    /// Results of unblocked incoming edges, in edge order (aggregator).
    pub(crate) fn unblocked_parent_results(
        &self,
        node_id: &str,
        analysis: &GraphAnalysis,
    ) -> Vec<String> {
        let state = self.state.lock();
        analysis
            .incoming(node_id)
            .iter()
            .filter(|e| !state.blocked_edges.contains(&e.id))
            .map(|e| state.results.get(&e.source).cloned().unwrap_or_default())
            .collect()
    }

    /// Spawn a nested engine sharing this run's collaborators (broadcaster
    /// included, as an interface, never a duplicated subscription list).
    pub(crate) fn sub_engine(
        &self,
        definition: WorkflowDefinition,
        workflow_id: String,
    ) -> WorkflowEngine {
        let mut engine = WorkflowEngine::new(definition, workflow_id);
        engine.agents = self.agents.clone();
        engine.tools = self.tools.clone();
        engine.files = self.files.clone();
        engine.usage = self.usage.clone();
        engine.broadcaster = self.broadcaster.clone();
        engine
    }

    /// Log a usage record, best-effort.
    pub(crate) async fn log_usage(&self, model: &str, provider: &str, duration: Duration) {
        if let Some(sink) = &self.usage {
            let record = UsageRecord::workflow(model, provider, duration.as_millis() as u64);
            if let Err(error) = sink.log(record).await {
                warn!(workflow = %self.workflow_id, "usage sink failed: {}", error);
            }
        }
    }
}
