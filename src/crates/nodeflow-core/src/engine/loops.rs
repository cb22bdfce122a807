//! Loop driver
//!
//! Two loop modes hang off the `loop` node kind:
//!
//! **Graph-level loop** - a back-edge targets the loop node. The driver
//! owns the loop-body subgraph (the scheduler skips those nodes), builds a
//! sub-workflow from the body, and re-runs a fresh sub-engine per
//! iteration, feeding the back-edge source's result forward as the next
//! iteration's initial input. Bounded by `maxIterations` with optional
//! early-exit conditions.
//!
//! **Generate/critique loop** - no back-edge. Two ad-hoc agents sharing
//! the node's model alternate: the generator streams a draft, the critic
//! either approves with the stop token or returns feedback folded into the
//! next generator prompt.

use std::collections::HashMap;

use crate::engine::{WorkflowEngine, DEFAULT_MODEL};
use crate::error::{EngineError, Result};
use crate::graph::GraphAnalysis;
use crate::provider::AgentConfig;
use crate::text::{last_number, prefix_chars};
use crate::workflow::{NodeId, RunStatus, WorkflowDefinition, WorkflowEdge, WorkflowNode};

impl WorkflowEngine {
    /// `loop` node handler: choose the mode by the presence of a back-edge
    /// into this node.
    pub(crate) async fn run_loop_node(
        &self,
        node: &WorkflowNode,
        analysis: &GraphAnalysis,
        input: &str,
    ) -> Result<String> {
        match analysis.back_edge_into(&node.id) {
            Some(back_edge) => {
                let back_edge = back_edge.clone();
                self.run_graph_loop(node, analysis, &back_edge, input).await
            }
            None => self.run_refinement_loop(node, input).await,
        }
    }

    /// Graph-level loop over the back-edge subgraph.
    async fn run_graph_loop(
        &self,
        node: &WorkflowNode,
        analysis: &GraphAnalysis,
        back_edge: &WorkflowEdge,
        input: &str,
    ) -> Result<String> {
        let data = &node.data;
        let max_iterations = data.u64_or("maxIterations", 3).max(1);
        let exit_type = data.str_or("exitConditionType", "always");
        let exit_value = data.str_or("exitValue", "");

        let body = analysis.loop_body(&node.id, &back_edge.source);
        self.own_loop_body(&body);

        // Sub-workflow: the body nodes plus their internal DAG edges.
        let sub_nodes: Vec<WorkflowNode> = self
            .definition
            .nodes
            .iter()
            .filter(|n| body.contains(&n.id))
            .cloned()
            .collect();
        let sub_edges: Vec<WorkflowEdge> = self
            .definition
            .edges
            .iter()
            .filter(|e| {
                body.contains(&e.source) && body.contains(&e.target) && !analysis.is_back_edge(&e.id)
            })
            .cloned()
            .collect();
        let sub_definition = WorkflowDefinition::new(sub_nodes, sub_edges);

        let mut rounds: Vec<String> = Vec::new();
        let mut current_input = input.to_string();
        let mut final_results: HashMap<NodeId, String> = HashMap::new();

        for iteration in 1..=max_iterations {
            let sub_engine = self.sub_engine(
                sub_definition.clone(),
                format!("{}_loop_{}", self.workflow_id(), node.id),
            );
            let results = sub_engine.run_boxed(current_input.clone()).await;

            if sub_engine.status() == RunStatus::Error {
                return Err(EngineError::sub_workflow(
                    &node.id,
                    sub_engine
                        .error()
                        .unwrap_or_else(|| "loop body failed".to_string()),
                ));
            }

            let exit_result = results.get(&back_edge.source).cloned().unwrap_or_default();
            rounds.push(format!("[Round {}]\n{}", iteration, exit_result));
            final_results = results;

            let stop = match exit_type.as_str() {
                "keyword" => {
                    let needle = if exit_value.is_empty() {
                        "APPROVED".to_string()
                    } else {
                        exit_value.to_uppercase()
                    };
                    prefix_chars(&exit_result, 500).to_uppercase().contains(&needle)
                }
                // compares against this iteration's input, i.e. the prior
                // loop input, not the prior exit result
                "no_change" => iteration >= 2 && exit_result.trim() == current_input.trim(),
                "score" => {
                    let threshold: f64 = exit_value.parse().unwrap_or(7.0);
                    last_number(&exit_result).map(|s| s >= threshold).unwrap_or(false)
                }
                // "always" and anything unknown: run out the budget
                _ => false,
            };

            current_input = exit_result;
            if stop {
                break;
            }
        }

        self.adopt_loop_results(&body, &final_results);

        Ok(rounds.join("\n\n"))
    }

    /// Internal generate/critique loop.
    async fn run_refinement_loop(&self, node: &WorkflowNode, input: &str) -> Result<String> {
        let data = &node.data;
        let max_iterations = data.u64_or("maxIterations", 3).max(1);
        let stop_value = data.str_or("exitValue", "APPROVED");
        let stop_token = stop_value.to_uppercase();
        let refinement_prompt =
            data.str_or("refinementPrompt", "Improve the content based on the feedback.");
        let model = data.str_or("model", DEFAULT_MODEL);

        let generator = AgentConfig::new(
            model.clone(),
            "Generate the best possible output for the given task.",
            0.7,
            4096,
        );
        let critic = AgentConfig::new(
            model,
            format!(
                "Review the output. If it meets quality standards, respond with {}. \
                 Otherwise, provide specific feedback for improvement.",
                stop_value
            ),
            0.7,
            4096,
        );

        let mut current = input.to_string();
        let mut generated = String::new();

        for _ in 0..max_iterations {
            let (content, _provider) = self
                .stream_agent(&node.id, &generator, &current, Some(""))
                .await?;
            generated = content;

            let review_prompt = format!("Review this:\n\n{}", generated);
            let (feedback, _provider) = self
                .stream_agent(&node.id, &critic, &review_prompt, None)
                .await?;

            if prefix_chars(&feedback, 100).to_uppercase().contains(&stop_token) {
                return Ok(generated);
            }

            current = format!(
                "Original: {}\n\nPrevious output:\n{}\n\nFeedback:\n{}\n\n{}",
                input, generated, feedback, refinement_prompt
            );
        }

        Ok(generated)
    }
}
