//! Node dispatch and the simple handlers (input, output, aggregator, delay)
//!
//! Every node kind maps to exactly one handler. Handlers return domain
//! outcomes as plain strings; only unexpected adapter failures come back as
//! errors and reach the retry wrapper.

use std::time::Duration;

use crate::engine::{WorkflowEngine, JOIN_SEPARATOR};
use crate::error::{EngineError, Result};
use crate::graph::GraphAnalysis;
use crate::tool::build_tool_config;
use crate::workflow::{NodeKind, WorkflowNode};

impl WorkflowEngine {
    /// Dispatch one node to its typed handler with its collected input.
    pub(crate) async fn execute_node(
        &self,
        node: &WorkflowNode,
        analysis: &GraphAnalysis,
        initial_input: &str,
    ) -> Result<String> {
        let input = self.collect_input(&node.id, analysis, initial_input);

        match node.kind {
            NodeKind::Input => self.run_input_node(node, &input).await,
            NodeKind::Output => Ok(input),
            NodeKind::Agent => self.run_agent_node(node, &input).await,
            NodeKind::Tool => self.run_tool_node(node, &input).await,
            NodeKind::Aggregator => Ok(self.run_aggregator_node(node, analysis)),
            NodeKind::Condition => Ok(self.run_condition_node(node, &input)),
            NodeKind::Switch => Ok(self.run_switch_node(node, &input)),
            NodeKind::Validator => self.run_validator_node(node, &input).await,
            NodeKind::Delay => self.run_delay_node(node, input).await,
            NodeKind::Loop => self.run_loop_node(node, analysis, &input).await,
            NodeKind::Chunker => self.run_chunker_node(node, &input).await,
            NodeKind::MetaAgent => self.run_meta_agent_node(node, &input).await,
        }
    }

    /// `input` node: an uploaded file, a bounded database read, or a
    /// literal value (collected input, `defaultValue`, `source`, `label`
    /// in that order).
    async fn run_input_node(&self, node: &WorkflowNode, collected: &str) -> Result<String> {
        let data = &node.data;

        let file_id = data.str_or("fileId", "");
        if !file_id.is_empty() {
            if let Some(files) = &self.files {
                if let Some(path) = files.resolve_file_path(&file_id).await {
                    return Ok(path);
                }
            }
        }

        let source = data.str_or("source", "");
        if source == "database" {
            return self.run_database_input(node, collected).await;
        }

        if !collected.is_empty() {
            return Ok(collected.to_string());
        }
        let default = data.str_or("defaultValue", "");
        if !default.is_empty() {
            return Ok(default);
        }
        if !source.is_empty() {
            return Ok(source);
        }
        Ok(data.str_or("label", ""))
    }

    /// Database-typed input: a read-only query routed through the tool
    /// invoker; row caps are the adapter's contract.
    async fn run_database_input(&self, node: &WorkflowNode, input: &str) -> Result<String> {
        const TOOL: &str = "database_tool";

        let Some(tool) = self.tools.get(TOOL) else {
            return Ok(format!("[Tool '{}' not found]", TOOL));
        };
        let config = build_tool_config(TOOL, &node.data, input);
        tool.execute(input, &config)
            .await
            .map_err(|e| EngineError::tool(TOOL, e.to_string()))
    }

    /// `tool` node: marshal node data into the tool's configuration record
    /// and call the adapter. Unknown names yield a literal result, not an
    /// error.
    async fn run_tool_node(&self, node: &WorkflowNode, input: &str) -> Result<String> {
        let data = &node.data;
        let tool_name = {
            let name = data.str_or("tool", "");
            if name.is_empty() {
                // legacy definitions
                data.str_or("tool_name", "")
            } else {
                name
            }
        };

        let Some(tool) = self.tools.get(&tool_name) else {
            return Ok(format!("[Tool '{}' not found]", tool_name));
        };

        let config = build_tool_config(&tool_name, data, input);
        tool.execute(input, &config)
            .await
            .map_err(|e| EngineError::tool(&tool_name, e.to_string()))
    }

    /// `aggregator` node: join unblocked parent results with the
    /// configured separator. `summarize` is identical to `concatenate`
    /// at this layer (a downstream agent does the summarizing); `custom`
    /// expands an `{inputs}` template.
    fn run_aggregator_node(&self, node: &WorkflowNode, analysis: &GraphAnalysis) -> String {
        let data = &node.data;
        let strategy = data.str_or("strategy", "concatenate");
        let separator = data.str_or("separator", JOIN_SEPARATOR);

        let parts = self.unblocked_parent_results(&node.id, analysis);
        let combined = parts.join(&separator);

        match strategy.as_str() {
            "custom" => {
                let template = data.str_or("customTemplate", "{inputs}");
                template.replace("{inputs}", &combined)
            }
            _ => combined,
        }
    }

    /// `delay` node: suspend for `delaySeconds` (clamped to [0, 300]) and
    /// pass the input through.
    async fn run_delay_node(&self, node: &WorkflowNode, input: String) -> Result<String> {
        let seconds = node.data.f64_or("delaySeconds", 1.0).clamp(0.0, 300.0);
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(input)
    }
}
