//! Workflow definition model
//!
//! The engine interprets an immutable pair of node and edge lists. Nodes are
//! typed processing units carrying a free-form configuration map; edges are
//! directed and optionally labeled (branch labels such as `true` / `false` /
//! `pass` / `fail`, switch case values, or `default`).
//!
//! Definitions arrive as JSON from the workflow builder (or YAML when loaded
//! from disk); [`WorkflowDefinition::from_json_str`] and
//! [`WorkflowDefinition::from_yaml_str`] are lossless over every field the
//! engine consumes.
//!
//! Configuration keys historically appear in both camelCase (the builder
//! frontend) and snake_case (legacy definitions). [`NodeData`] exposes a
//! single canonical accessor that tries the camelCase name first and derives
//! the snake_case alias automatically, so handler code reads exactly one
//! name.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Node identifier - unique within one workflow definition.
pub type NodeId = String;

/// The closed set of node kinds the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Source node: default value, uploaded file, or database read
    Input,
    /// Sink node: passes its collected input through unchanged
    Output,
    /// Streaming AI-model call
    Agent,
    /// External tool invocation
    Tool,
    /// Join results of multiple parents
    Aggregator,
    /// Two-way branch on a predicate
    Condition,
    /// Multi-way branch on edge labels
    Switch,
    /// Graph-level loop over a back-edge subgraph, or generate/critique loop
    Loop,
    /// Agent-judged pass/fail branch
    Validator,
    /// Fixed sleep, input passed through
    Delay,
    /// Fixed-size window splitter with per-window agent calls
    Chunker,
    /// Recursive sub-workflow
    MetaAgent,
}

/// Free-form node configuration.
///
/// A thin wrapper over a JSON object that performs the
/// camelCase-then-snake_case lookup in one place. All typed accessors coerce
/// scalars the way the workflow builder produces them (numbers may arrive as
/// strings, booleans as numbers, and so on).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeData(pub Map<String, Value>);

impl NodeData {
    /// Create an empty configuration map.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Look up `key`, trying the exact spelling first, then the snake_case
    /// or camelCase alias of it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(key) {
            return Some(v);
        }
        let alias = if key.contains('_') {
            snake_to_camel(key)
        } else {
            camel_to_snake(key)
        };
        self.0.get(&alias)
    }

    /// True when the key (or its alias) is present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value under the exact key given.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// String value of `key`; numbers and booleans are rendered, other
    /// shapes (arrays, objects, null) yield `None`.
    pub fn str_of(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// String value of `key`, or `default` when absent or empty.
    pub fn str_or(&self, key: &str, default: &str) -> String {
        match self.str_of(key) {
            Some(s) if !s.is_empty() => s,
            _ => default.to_string(),
        }
    }

    /// Floating-point value of `key` (accepts numeric strings).
    pub fn f64_of(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Floating-point value of `key`, or `default`.
    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.f64_of(key).unwrap_or(default)
    }

    /// Unsigned integer value of `key` (accepts numeric strings and floats).
    pub fn u64_of(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
            Value::String(s) => {
                let t = s.trim();
                t.parse::<u64>().ok().or_else(|| t.parse::<f64>().ok().map(|f| f.max(0.0) as u64))
            }
            _ => None,
        }
    }

    /// Unsigned integer value of `key`, or `default`.
    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.u64_of(key).unwrap_or(default)
    }
}

/// Presentational canvas coordinates. Ignored by the engine but preserved
/// through (de)serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

/// One node of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique node id
    pub id: NodeId,
    /// Node kind driving handler dispatch
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Free-form configuration map
    #[serde(default)]
    pub data: NodeData,
    /// Canvas position (presentational)
    #[serde(default)]
    pub position: Position,
}

impl WorkflowNode {
    /// Build a node with the given id, kind and configuration entries.
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: NodeData::new(),
            position: Position::default(),
        }
    }

    /// Builder-style data entry, convenient in tests and templates.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key, value);
        self
    }
}

/// One directed edge of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    /// Unique edge id
    pub id: String,
    /// Source node id
    pub source: NodeId,
    /// Target node id
    pub target: NodeId,
    /// Branch label: empty, `true`/`false`, `pass`/`fail`, a switch case
    /// value, or `default`
    #[serde(default)]
    pub label: String,
}

impl WorkflowEdge {
    /// Build an unlabeled edge.
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: String::new(),
        }
    }

    /// Build a labeled edge.
    pub fn labeled(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            label: label.into(),
        }
    }
}

/// An immutable workflow definition: the `(Nodes, Edges)` pair the engine
/// interprets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
}

impl WorkflowDefinition {
    /// Build a definition from node and edge lists.
    pub fn new(nodes: Vec<WorkflowNode>, edges: Vec<WorkflowEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse a definition from its external JSON form.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a definition from a JSON value (e.g. an embedded
    /// `workflowDefinition` payload).
    pub fn from_json_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Render the definition back to JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a definition from YAML (workflow files on disk).
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Find a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Per-node execution state. `Waiting` and `Running` are transient; every
/// node ends in `Done` or `Error` by the time a run returns. `Progress`
/// carries handler-specific progress strings (e.g. `chunk 2/5`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    Running,
    Done,
    Error,
    Progress(String),
}

impl NodeState {
    /// The wire form used in status snapshots.
    pub fn as_str(&self) -> &str {
        match self {
            NodeState::Waiting => "waiting",
            NodeState::Running => "running",
            NodeState::Done => "done",
            NodeState::Error => "error",
            NodeState::Progress(s) => s.as_str(),
        }
    }

    /// True for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::Error)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline-level run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl RunStatus {
    /// The wire form used in status snapshots.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
