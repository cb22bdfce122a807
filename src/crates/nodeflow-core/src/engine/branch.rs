//! Branching handlers: condition, switch, validator
//!
//! Branching never removes nodes; it blocks the losing outgoing edges.
//! A node whose incoming edges end up fully blocked is branch-skipped by
//! the scheduler, which blocks its own out-edges in turn, so the whole
//! losing cone collapses to empty results.

use regex::RegexBuilder;
use serde_json::Value;
use tracing::warn;

use crate::engine::{WorkflowEngine, DEFAULT_MODEL};
use crate::error::Result;
use crate::provider::AgentConfig;
use crate::text::{last_number, prefix_chars, strip_artifacts};
use crate::workflow::{NodeData, WorkflowNode};

/// Parsed verdict of a validator agent.
#[derive(Debug, Clone, PartialEq)]
struct Verdict {
    valid: bool,
    reason: String,
    score: f64,
}

impl WorkflowEngine {
    /// `condition` node: evaluate the predicate, block the losing `true` /
    /// `false` edge, pass the input through to the taken branch.
    pub(crate) fn run_condition_node(&self, node: &WorkflowNode, input: &str) -> String {
        let outcome = evaluate_condition(&node.data, input);

        let losers: Vec<String> = self
            .outgoing_edges(&node.id)
            .into_iter()
            .filter(|edge| {
                let label = edge.label.trim().to_ascii_lowercase();
                (outcome && label == "false") || (!outcome && label == "true")
            })
            .map(|edge| edge.id)
            .collect();
        self.block_edges(losers);

        input.to_string()
    }

    /// `switch` node: the first outgoing edge whose non-empty, non-default
    /// label matches wins; every other such labeled edge is blocked.
    /// `default` and unlabeled edges are never blocked, so they carry the
    /// input when nothing matches.
    pub(crate) fn run_switch_node(&self, node: &WorkflowNode, input: &str) -> String {
        let switch_type = node.data.str_or("switchType", "keyword");
        let outgoing = self.outgoing_edges(&node.id);

        let is_default =
            |label: &str| label.trim().is_empty() || label.trim().eq_ignore_ascii_case("default");

        let winner = outgoing
            .iter()
            .find(|edge| {
                !is_default(&edge.label) && label_matches(&switch_type, edge.label.trim(), input)
            })
            .map(|edge| edge.id.clone());

        let losers: Vec<String> = outgoing
            .into_iter()
            .filter(|edge| !is_default(&edge.label) && Some(&edge.id) != winner.as_ref())
            .map(|edge| edge.id)
            .collect();
        self.block_edges(losers);

        input.to_string()
    }

    /// `validator` node: ask an agent for a strict JSON verdict, block the
    /// `pass` or `fail` edge, and append a human-readable report to the
    /// passed-through input. Parse failures count as invalid.
    pub(crate) async fn run_validator_node(
        &self,
        node: &WorkflowNode,
        input: &str,
    ) -> Result<String> {
        let data = &node.data;
        let validation_prompt = data.str_or(
            "validationPrompt",
            "Validate that the input meets quality standards.",
        );
        let strictness = data.u64_or("strictness", 5).clamp(1, 10);
        let model = data.str_or("model", DEFAULT_MODEL);

        let system_prompt = format!(
            "You are a strict validator (strictness {}/10). {} Respond ONLY with a JSON object: \
             {{\"valid\": true|false, \"reason\": \"...\", \"score\": 0-10}}",
            strictness, validation_prompt
        );
        let config = AgentConfig::new(model, system_prompt, 0.0, 1024);

        let stripped = strip_artifacts(input);
        let (response, _provider) = self.stream_agent(&node.id, &config, &stripped, None).await?;
        let verdict = parse_verdict(&response);

        let losing_label = if verdict.valid { "fail" } else { "pass" };
        let losers: Vec<String> = self
            .outgoing_edges(&node.id)
            .into_iter()
            .filter(|edge| edge.label.trim().eq_ignore_ascii_case(losing_label))
            .map(|edge| edge.id)
            .collect();
        self.block_edges(losers);

        let outcome = if verdict.valid { "PASS" } else { "FAIL" };
        Ok(format!(
            "{}\n\n---\n\nValidation: {} (score {}/10) - {}",
            input, outcome, verdict.score, verdict.reason
        ))
    }
}

/// Evaluate a condition predicate over the node input. Unknown kinds are
/// true (the branch is taken).
fn evaluate_condition(data: &NodeData, input: &str) -> bool {
    let kind = data.str_or("conditionType", "contains");
    let value = data.str_or("conditionValue", "");

    match kind.as_str() {
        "contains" => input.to_lowercase().contains(&value.to_lowercase()),
        "not_contains" => !input.to_lowercase().contains(&value.to_lowercase()),
        "score_threshold" => {
            let Some(score) = last_number(input) else {
                return false;
            };
            let threshold: f64 = value.parse().unwrap_or(7.0);
            match data.str_or("operator", "gte").as_str() {
                "gt" => score > threshold,
                "lte" => score <= threshold,
                "lt" => score < threshold,
                "eq" => score == threshold,
                _ => score >= threshold,
            }
        }
        "keyword" => prefix_chars(input, 500)
            .to_uppercase()
            .contains(&value.to_uppercase()),
        "regex" => match RegexBuilder::new(&value).build() {
            Ok(re) => re.is_match(input),
            Err(error) => {
                warn!("invalid condition regex '{}': {}", value, error);
                false
            }
        },
        "length_above" => input.chars().count() > value.parse().unwrap_or(0),
        "length_below" => input.chars().count() < value.parse().unwrap_or(1000),
        _ => true,
    }
}

/// Does a switch-case label match the input under the given switch type?
fn label_matches(switch_type: &str, label: &str, input: &str) -> bool {
    match switch_type {
        "regex" => match RegexBuilder::new(label).case_insensitive(true).build() {
            Ok(re) => re.is_match(input),
            Err(error) => {
                warn!("invalid switch regex '{}': {}", label, error);
                false
            }
        },
        "score" => match (last_number(input), label.parse::<f64>()) {
            (Some(score), Ok(threshold)) => score >= threshold,
            _ => false,
        },
        // keyword (default)
        _ => input.to_lowercase().contains(&label.to_lowercase()),
    }
}

/// Tolerant extraction of the validator's JSON verdict: take the outermost
/// brace-delimited span, parse it, and read the fields with defaults.
fn parse_verdict(response: &str) -> Verdict {
    let invalid = |reason: &str| Verdict {
        valid: false,
        reason: reason.to_string(),
        score: 0.0,
    };

    let Some(start) = response.find('{') else {
        return invalid("could not parse validator response");
    };
    let Some(end) = response.rfind('}') else {
        return invalid("could not parse validator response");
    };
    if end < start {
        return invalid("could not parse validator response");
    }

    match serde_json::from_str::<Value>(&response[start..=end]) {
        Ok(parsed) => Verdict {
            valid: parsed.get("valid").and_then(Value::as_bool).unwrap_or(false),
            reason: parsed
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            score: parsed.get("score").and_then(Value::as_f64).unwrap_or(0.0),
        },
        Err(_) => invalid("could not parse validator response"),
    }
}
