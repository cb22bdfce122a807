//! Chunker: fixed-size windows fed through an agent one at a time
//!
//! Long inputs are split into overlapping character windows. Each window is
//! streamed through an agent with a `[Chunk i/n]` prompt header; the
//! streamed partial shown to observers is the join of the finished windows
//! plus the one in flight, so progress reads contiguously. The node's
//! status carries a `chunk i/n` progress string between windows.

use crate::engine::{WorkflowEngine, DEFAULT_MODEL, JOIN_SEPARATOR};
use crate::error::Result;
use crate::provider::AgentConfig;
use crate::text::split_chunks;
use crate::workflow::WorkflowNode;

impl WorkflowEngine {
    /// `chunker` node handler.
    pub(crate) async fn run_chunker_node(&self, node: &WorkflowNode, input: &str) -> Result<String> {
        let data = &node.data;
        let chunk_size = data.u64_or("chunkSize", 2000) as usize;
        let overlap = data.u64_or("overlap", 200) as usize;
        let model = data.str_or("model", DEFAULT_MODEL);
        let system_prompt = data.str_or("systemPrompt", "Process the following chunk of text:");
        let separator = data.str_or("separator", JOIN_SEPARATOR);

        let windows = split_chunks(input, chunk_size, overlap);
        let total = windows.len();
        let config = AgentConfig::new(model, system_prompt, 0.7, 4096);

        let mut finished: Vec<String> = Vec::new();
        for (index, window) in windows.iter().enumerate() {
            let prompt = format!("[Chunk {}/{}]\n\n{}", index + 1, total, window);

            let prefix = if finished.is_empty() {
                String::new()
            } else {
                format!("{}{}", finished.join(&separator), separator)
            };
            let (content, _provider) = self
                .stream_agent(&node.id, &config, &prompt, Some(prefix.as_str()))
                .await?;
            finished.push(content);

            self.set_progress(&node.id, format!("chunk {}/{}", index + 1, total));
            self.emit_status(false).await;
        }

        Ok(finished.join(&separator))
    }
}
