//! Meta-agent: recursive sub-workflow execution
//!
//! A `meta_agent` node embeds a complete workflow definition in its data
//! and runs it through a fresh sub-engine sharing this run's collaborators.
//! Recursion is bounded: `_currentDepth` is injected into nested meta-agent
//! nodes and checked against `maxDepth` before spawning, so a
//! self-referential definition bottoms out with a textual result instead of
//! unbounded recursion.

use serde_json::Value;

use crate::engine::{WorkflowEngine, JOIN_SEPARATOR};
use crate::error::{EngineError, Result};
use crate::workflow::{NodeKind, RunStatus, WorkflowDefinition, WorkflowNode};

impl WorkflowEngine {
    /// `meta_agent` node handler.
    pub(crate) async fn run_meta_agent_node(
        &self,
        node: &WorkflowNode,
        input: &str,
    ) -> Result<String> {
        let data = &node.data;

        let Some(raw_definition) = data.get("workflowDefinition").cloned() else {
            return Ok("[Meta-Agent: no sub-workflow definition configured]".to_string());
        };

        let max_depth = data.u64_or("maxDepth", 3);
        let current_depth = data.u64_or("_currentDepth", 0);
        if current_depth >= max_depth {
            return Ok(format!(
                "[Meta-Agent: max recursion depth ({}) reached]",
                max_depth
            ));
        }

        let mut sub_definition = match WorkflowDefinition::from_json_value(raw_definition) {
            Ok(definition) => definition,
            Err(_) => return Ok("[Meta-Agent: invalid workflow definition]".to_string()),
        };

        // Nested meta-agents inherit the incremented depth.
        for sub_node in &mut sub_definition.nodes {
            if sub_node.kind == NodeKind::MetaAgent {
                sub_node
                    .data
                    .insert("_currentDepth", Value::from(current_depth + 1));
            }
        }

        let sub_engine = self.sub_engine(
            sub_definition.clone(),
            format!("{}_sub_{}", self.workflow_id(), node.id),
        );
        let results = sub_engine.run_boxed(input.to_string()).await;

        if sub_engine.status() == RunStatus::Error {
            return Err(EngineError::sub_workflow(
                &node.id,
                sub_engine
                    .error()
                    .unwrap_or_else(|| "sub-workflow failed".to_string()),
            ));
        }

        // Prefer the output-typed node results; fall back to everything.
        let outputs: Vec<String> = sub_definition
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Output)
            .filter_map(|n| results.get(&n.id).cloned())
            .collect();

        if !outputs.is_empty() {
            return Ok(outputs.join(JOIN_SEPARATOR));
        }

        let all: Vec<String> = sub_definition
            .nodes
            .iter()
            .filter_map(|n| results.get(&n.id).cloned())
            .collect();
        Ok(all.join(JOIN_SEPARATOR))
    }
}
