//! Graph analysis: back-edge detection, topological levels, loop bodies
//!
//! User-drawn workflows may contain cycles, always introduced deliberately
//! as a loop's back-edge. Analysis separates those back-edges from the
//! acyclic remainder, orders the remainder into topological levels
//! (generations of Kahn's algorithm), and can carve out the node set a loop
//! driver owns.
//!
//! ```text
//!             ┌─────────── back-edge (G → L) ───────────┐
//!             ▼                                         │
//!   I ────► L:loop ────► draft ────► critique ────► G:score
//!             │
//!             └── levels over DAG edges: [I] [L] [draft] [critique] [G]
//! ```
//!
//! Determinism matters here: the DFS walks nodes in their defined order and
//! successors in edge-declaration order, so the same definition always
//! yields the same back-edge set and therefore the same loop bodies.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, Result};
use crate::workflow::{NodeId, WorkflowDefinition, WorkflowEdge};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// The analyzed form of a workflow definition: back-edges, DAG-only
/// adjacency, and topological levels.
#[derive(Debug, Clone)]
pub struct GraphAnalysis {
    /// Edges whose presence would make the graph cyclic, in discovery order.
    back_edges: Vec<WorkflowEdge>,
    /// Ids of the back-edges, for O(1) membership tests.
    back_edge_ids: HashSet<String>,
    /// DAG-only incoming adjacency, per node, in edge-declaration order.
    incoming: HashMap<NodeId, Vec<WorkflowEdge>>,
    /// DAG-only outgoing adjacency, per node, in edge-declaration order.
    outgoing: HashMap<NodeId, Vec<WorkflowEdge>>,
    /// Topological levels: one set of mutually-unordered nodes per wave.
    levels: Vec<Vec<NodeId>>,
}

impl GraphAnalysis {
    /// Analyze a definition.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedGraph`] when a node id is duplicated,
    /// an edge references an unknown node, or a cycle survives back-edge
    /// removal.
    pub fn analyze(definition: &WorkflowDefinition) -> Result<Self> {
        let mut node_order: Vec<&str> = Vec::with_capacity(definition.nodes.len());
        let mut seen = HashSet::new();
        for node in &definition.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(EngineError::MalformedGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
            node_order.push(node.id.as_str());
        }

        for edge in &definition.edges {
            if !seen.contains(edge.source.as_str()) {
                return Err(EngineError::MalformedGraph(format!(
                    "edge '{}' references unknown source node '{}'",
                    edge.id, edge.source
                )));
            }
            if !seen.contains(edge.target.as_str()) {
                return Err(EngineError::MalformedGraph(format!(
                    "edge '{}' references unknown target node '{}'",
                    edge.id, edge.target
                )));
            }
        }

        let back_edge_ids = detect_back_edges(&node_order, &definition.edges);
        let back_edges: Vec<WorkflowEdge> = definition
            .edges
            .iter()
            .filter(|e| back_edge_ids.contains(&e.id))
            .cloned()
            .collect();

        let mut incoming: HashMap<NodeId, Vec<WorkflowEdge>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<WorkflowEdge>> = HashMap::new();
        for edge in &definition.edges {
            if back_edge_ids.contains(&edge.id) {
                continue;
            }
            incoming.entry(edge.target.clone()).or_default().push(edge.clone());
            outgoing.entry(edge.source.clone()).or_default().push(edge.clone());
        }

        let levels = topological_levels(&node_order, &incoming)?;

        Ok(Self {
            back_edges,
            back_edge_ids,
            incoming,
            outgoing,
            levels,
        })
    }

    /// All detected back-edges, in DFS discovery order.
    pub fn back_edges(&self) -> &[WorkflowEdge] {
        &self.back_edges
    }

    /// True when the edge id was classified as a back-edge.
    pub fn is_back_edge(&self, edge_id: &str) -> bool {
        self.back_edge_ids.contains(edge_id)
    }

    /// The first back-edge targeting `node_id`, if any. A loop node with
    /// such an edge drives a graph-level loop over its body subgraph.
    pub fn back_edge_into(&self, node_id: &str) -> Option<&WorkflowEdge> {
        self.back_edges.iter().find(|e| e.target == node_id)
    }

    /// DAG-only incoming edges of a node, in edge-declaration order.
    pub fn incoming(&self, node_id: &str) -> &[WorkflowEdge] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// DAG-only outgoing edges of a node, in edge-declaration order.
    pub fn outgoing(&self, node_id: &str) -> &[WorkflowEdge] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological levels over the DAG. Nodes within one level have no
    /// ordering constraints between them.
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    /// The node set owned by a graph-level loop: every node reachable from
    /// the loop node (excluding it) that can also reach the back-edge source
    /// along DAG edges.
    pub fn loop_body(&self, loop_node: &str, back_edge_source: &str) -> HashSet<NodeId> {
        let mut forward = HashSet::new();
        let mut stack: Vec<&str> = vec![loop_node];
        while let Some(current) = stack.pop() {
            for edge in self.outgoing(current) {
                if edge.target != loop_node && forward.insert(edge.target.clone()) {
                    stack.push(edge.target.as_str());
                }
            }
        }

        let mut backward = HashSet::new();
        backward.insert(back_edge_source.to_string());
        let mut stack: Vec<&str> = vec![back_edge_source];
        while let Some(current) = stack.pop() {
            for edge in self.incoming(current) {
                if edge.source != loop_node && backward.insert(edge.source.clone()) {
                    stack.push(edge.source.as_str());
                }
            }
        }

        forward.intersection(&backward).cloned().collect()
    }
}

/// Classify back-edges with a deterministic 3-coloring DFS: nodes are
/// visited in defined order, successors in edge-declaration order, and an
/// edge into a gray node is a back-edge.
fn detect_back_edges<'a>(node_order: &[&'a str], edges: &'a [WorkflowEdge]) -> HashSet<String> {
    let mut out: HashMap<&str, Vec<&'a WorkflowEdge>> = HashMap::new();
    for edge in edges {
        out.entry(edge.source.as_str()).or_default().push(edge);
    }

    let mut colors: HashMap<&'a str, Color> = HashMap::new();
    let mut back = HashSet::new();

    for root in node_order.iter().copied() {
        if colors.get(root).copied().unwrap_or(Color::White) != Color::White {
            continue;
        }
        // Iterative DFS: (node, index of the next out-edge to explore).
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        colors.insert(root, Color::Gray);

        while let Some(&(node, edge_idx)) = stack.last() {
            let next = out.get(node).and_then(|succ| succ.get(edge_idx).copied());
            match next {
                Some(edge) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match colors.get(edge.target.as_str()).copied().unwrap_or(Color::White) {
                        Color::White => {
                            colors.insert(edge.target.as_str(), Color::Gray);
                            stack.push((edge.target.as_str(), 0));
                        }
                        Color::Gray => {
                            back.insert(edge.id.clone());
                        }
                        Color::Black => {}
                    }
                }
                None => {
                    stack.pop();
                    colors.insert(node, Color::Black);
                }
            }
        }
    }

    back
}

/// Kahn's algorithm by generations: level 0 holds the zero-in-degree nodes,
/// level k the nodes whose predecessors all sit in earlier levels. Node
/// order within a level follows the definition order.
fn topological_levels(
    node_order: &[&str],
    incoming: &HashMap<NodeId, Vec<WorkflowEdge>>,
) -> Result<Vec<Vec<NodeId>>> {
    let mut in_degree: HashMap<&str, usize> = node_order
        .iter()
        .map(|id| (*id, incoming.get(*id).map(Vec::len).unwrap_or(0)))
        .collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut levels: Vec<Vec<NodeId>> = Vec::new();

    while placed.len() < node_order.len() {
        let wave: Vec<&str> = node_order
            .iter()
            .copied()
            .filter(|id| !placed.contains(id) && in_degree[id] == 0)
            .collect();

        if wave.is_empty() {
            let stuck: Vec<&str> = node_order
                .iter()
                .copied()
                .filter(|id| !placed.contains(id))
                .collect();
            return Err(EngineError::MalformedGraph(format!(
                "cycle remains after back-edge removal, involving: {}",
                stuck.join(", ")
            )));
        }

        for id in &wave {
            placed.insert(*id);
        }
        // Lower in-degrees of successors; edges out of the wave are the
        // incoming edges of every not-yet-placed node whose source is here.
        for (target, edges) in incoming {
            if placed.contains(target.as_str()) {
                continue;
            }
            let satisfied = edges.iter().filter(|e| wave.contains(&e.source.as_str())).count();
            if satisfied > 0 {
                if let Some(degree) = in_degree.get_mut(target.as_str()) {
                    *degree -= satisfied;
                }
            }
        }

        levels.push(wave.into_iter().map(String::from).collect());
    }

    Ok(levels)
}
