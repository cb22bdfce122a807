//! Control-flow behavior: switches, validators, retry policies, chunking,
//! refinement loops, and streaming event ordering.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;

use nodeflow_core::{
    Event, MemoryBroadcaster, NodeKind, RunStatus, ToolRegistry, WorkflowDefinition, WorkflowEdge,
    WorkflowEngine, WorkflowNode, SKIPPED_RESULT,
};

fn input_node(id: &str, value: &str) -> WorkflowNode {
    WorkflowNode::new(id, NodeKind::Input).with_data("defaultValue", json!(value))
}

fn switch_def(input: &str) -> WorkflowDefinition {
    WorkflowDefinition::new(
        vec![
            input_node("I", input),
            WorkflowNode::new("S", NodeKind::Switch).with_data("switchType", json!("keyword")),
            WorkflowNode::new("BILL", NodeKind::Output),
            WorkflowNode::new("SALES", NodeKind::Output),
            WorkflowNode::new("OTHER", NodeKind::Output),
        ],
        vec![
            WorkflowEdge::new("e1", "I", "S"),
            WorkflowEdge::labeled("e2", "S", "BILL", "billing"),
            WorkflowEdge::labeled("e3", "S", "SALES", "sales"),
            WorkflowEdge::labeled("e4", "S", "OTHER", "default"),
        ],
    )
}

#[tokio::test]
async fn test_switch_first_matching_label_wins() {
    let engine = WorkflowEngine::new(switch_def("a billing question"), "wf");
    let results = engine.run("").await;

    assert_eq!(results["BILL"], "a billing question");
    assert_eq!(results["SALES"], "");
    // default edges are never blocked by a switch
    assert_eq!(results["OTHER"], "a billing question");
}

#[tokio::test]
async fn test_switch_without_match_takes_default_only() {
    let engine = WorkflowEngine::new(switch_def("nothing relevant"), "wf");
    let results = engine.run("").await;

    assert_eq!(results["BILL"], "");
    assert_eq!(results["SALES"], "");
    assert_eq!(results["OTHER"], "nothing relevant");
}

#[tokio::test]
async fn test_switch_score_labels() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "overall score: 9"),
            WorkflowNode::new("S", NodeKind::Switch).with_data("switchType", json!("score")),
            WorkflowNode::new("HIGH", NodeKind::Output),
            WorkflowNode::new("LOW", NodeKind::Output),
        ],
        vec![
            WorkflowEdge::new("e1", "I", "S"),
            WorkflowEdge::labeled("e2", "S", "HIGH", "8"),
            WorkflowEdge::labeled("e3", "S", "LOW", "0"),
        ],
    );
    let engine = WorkflowEngine::new(def, "wf");
    let results = engine.run("").await;

    assert_eq!(results["HIGH"], "overall score: 9");
    assert_eq!(results["LOW"], "");
}

#[tokio::test]
async fn test_validator_blocks_fail_edge_and_reports() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "the draft"),
            WorkflowNode::new("V", NodeKind::Validator)
                .with_data("model", json!("judge"))
                .with_data("validationPrompt", json!("Check completeness."))
                .with_data("strictness", json!(8)),
            WorkflowNode::new("P", NodeKind::Output),
            WorkflowNode::new("F", NodeKind::Output),
        ],
        vec![
            WorkflowEdge::new("e1", "I", "V"),
            WorkflowEdge::labeled("e2", "V", "P", "pass"),
            WorkflowEdge::labeled("e3", "V", "F", "fail"),
        ],
    );

    let engine = WorkflowEngine::new(def, "wf").with_agent_factory(
        MockAgentFactory::new()
            .with_model(
                "judge",
                MockBehavior::Static(
                    "{\"valid\": true, \"reason\": \"complete\", \"score\": 9}".to_string(),
                ),
            )
            .into_arc(),
    );
    let results = engine.run("").await;

    assert!(results["V"].starts_with("the draft"));
    assert!(results["V"].contains("Validation: PASS (score 9/10)"));
    assert!(results["V"].contains("complete"));
    assert_eq!(results["P"], results["V"]);
    assert_eq!(results["F"], "");
}

#[tokio::test]
async fn test_validator_parse_failure_fails_validation() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "draft"),
            WorkflowNode::new("V", NodeKind::Validator).with_data("model", json!("judge")),
            WorkflowNode::new("P", NodeKind::Output),
            WorkflowNode::new("F", NodeKind::Output),
        ],
        vec![
            WorkflowEdge::new("e1", "I", "V"),
            WorkflowEdge::labeled("e2", "V", "P", "pass"),
            WorkflowEdge::labeled("e3", "V", "F", "fail"),
        ],
    );

    let engine = WorkflowEngine::new(def, "wf").with_agent_factory(
        MockAgentFactory::new()
            .with_model("judge", MockBehavior::Static("gibberish".to_string()))
            .into_arc(),
    );
    let results = engine.run("").await;

    assert!(results["V"].contains("Validation: FAIL"));
    assert!(results["V"].contains("could not parse validator response"));
    assert_eq!(results["P"], "");
    assert_eq!(results["F"], results["V"]);
}

#[tokio::test]
async fn test_branch_skip_propagates_through_chain() {
    // condition false blocks the true edge; the whole downstream chain of
    // the losing branch completes empty
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "nope"),
            WorkflowNode::new("C", NodeKind::Condition)
                .with_data("conditionType", json!("keyword"))
                .with_data("conditionValue", json!("READY")),
            WorkflowNode::new("T1", NodeKind::Output),
            WorkflowNode::new("T2", NodeKind::Output),
            WorkflowNode::new("F1", NodeKind::Output),
        ],
        vec![
            WorkflowEdge::new("e1", "I", "C"),
            WorkflowEdge::labeled("e2", "C", "T1", "true"),
            WorkflowEdge::new("e3", "T1", "T2"),
            WorkflowEdge::labeled("e4", "C", "F1", "false"),
        ],
    );

    let engine = WorkflowEngine::new(def, "wf");
    let results = engine.run("").await;

    assert_eq!(results["T1"], "");
    assert_eq!(results["T2"], "");
    assert_eq!(results["F1"], "nope");
}

#[tokio::test(start_paused = true)]
async fn test_tool_retry_recovers() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "x"),
            WorkflowNode::new("T", NodeKind::Tool)
                .with_data("tool", json!("flaky"))
                .with_data("retryCount", json!(2))
                .with_data("retryDelay", json!(0.01)),
        ],
        vec![WorkflowEdge::new("e1", "I", "T")],
    );

    let mut tools = ToolRegistry::new();
    tools.register("flaky", Arc::new(FlakyTool::failing(2)));
    let engine = WorkflowEngine::new(def, "wf").with_tool_registry(tools);
    let results = engine.run("").await;

    assert_eq!(results["T"], "ok:x");
    assert_eq!(engine.status(), RunStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_on_error_skip_yields_literal() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "x"),
            WorkflowNode::new("T", NodeKind::Tool)
                .with_data("tool", json!("flaky"))
                .with_data("retryCount", json!(1))
                .with_data("retryDelay", json!(0.01))
                .with_data("onError", json!("skip")),
            WorkflowNode::new("O", NodeKind::Output),
        ],
        vec![
            WorkflowEdge::new("e1", "I", "T"),
            WorkflowEdge::new("e2", "T", "O"),
        ],
    );

    let mut tools = ToolRegistry::new();
    tools.register("flaky", Arc::new(FlakyTool::failing(10)));
    let engine = WorkflowEngine::new(def, "wf").with_tool_registry(tools);
    let results = engine.run("").await;

    assert_eq!(results["T"], SKIPPED_RESULT);
    assert_eq!(results["O"], SKIPPED_RESULT);
    assert_eq!(engine.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_on_error_fallback_value() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "x"),
            WorkflowNode::new("A", NodeKind::Agent)
                .with_data("model", json!("missing"))
                .with_data("onError", json!("fallback"))
                .with_data("fallbackValue", json!("stand-in")),
        ],
        vec![WorkflowEdge::new("e1", "I", "A")],
    );

    let engine =
        WorkflowEngine::new(def, "wf").with_agent_factory(MockAgentFactory::new().into_arc());
    let results = engine.run("").await;

    assert_eq!(results["A"], "stand-in");
    assert_eq!(engine.status(), RunStatus::Completed);
}

#[tokio::test]
async fn test_chunker_windows_and_progress() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "abcdefghij"),
            WorkflowNode::new("CH", NodeKind::Chunker)
                .with_data("chunkSize", json!(4))
                .with_data("overlap", json!(2))
                .with_data("model", json!("upper"))
                .with_data("separator", json!(" | ")),
        ],
        vec![WorkflowEdge::new("e1", "I", "CH")],
    );

    let broadcaster = MemoryBroadcaster::new();
    let engine = WorkflowEngine::new(def, "wf")
        .with_agent_factory(
            MockAgentFactory::new()
                .with_model("upper", MockBehavior::Upper)
                .into_arc(),
        )
        .with_broadcaster(broadcaster.clone());
    let results = engine.run("").await;

    // windows: abcd, cdef, efgh, ghij, each processed by the upper agent
    // with its chunk header
    let chunked = &results["CH"];
    assert_eq!(chunked.matches(" | ").count(), 3);
    assert!(chunked.contains("[CHUNK 1/4]"));
    assert!(chunked.contains("ABCD"));
    assert!(chunked.contains("GHIJ"));

    let progressed = broadcaster.events().iter().any(|e| match e {
        Event::WorkflowStatus { node_statuses, .. } => {
            node_statuses.get("CH").map(String::as_str) == Some("chunk 2/4")
        }
        _ => false,
    });
    assert!(progressed, "expected chunk progress snapshots");
}

#[tokio::test]
async fn test_refinement_loop_stops_on_approval() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "write a haiku"),
            WorkflowNode::new("L", NodeKind::Loop)
                .with_data("model", json!("writer"))
                .with_data("maxIterations", json!(3)),
        ],
        vec![WorkflowEdge::new("e1", "I", "L")],
    );

    // generator and critic share the model, so calls interleave:
    // draft 1, feedback, draft 2, approval
    let engine = WorkflowEngine::new(def, "wf").with_agent_factory(
        MockAgentFactory::new()
            .with_model(
                "writer",
                MockBehavior::sequence(["draft one", "too plain, add imagery", "draft two", "APPROVED"]),
            )
            .into_arc(),
    );
    let results = engine.run("").await;

    assert_eq!(results["L"], "draft two");
}

#[tokio::test]
async fn test_refinement_loop_returns_last_draft_when_never_approved() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "topic"),
            WorkflowNode::new("L", NodeKind::Loop)
                .with_data("model", json!("writer"))
                .with_data("maxIterations", json!(2)),
        ],
        vec![WorkflowEdge::new("e1", "I", "L")],
    );

    let engine = WorkflowEngine::new(def, "wf").with_agent_factory(
        MockAgentFactory::new()
            .with_model(
                "writer",
                MockBehavior::sequence(["d1", "no", "d2", "still no"]),
            )
            .into_arc(),
    );
    let results = engine.run("").await;

    assert_eq!(results["L"], "d2");
}

#[tokio::test]
async fn test_streaming_chunks_arrive_in_order_with_final_partial() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "a fairly long response body"),
            WorkflowNode::new("A", NodeKind::Agent).with_data("model", json!("echo")),
        ],
        vec![WorkflowEdge::new("e1", "I", "A")],
    );

    let broadcaster = MemoryBroadcaster::new();
    let engine = WorkflowEngine::new(def, "wf")
        .with_agent_factory(
            MockAgentFactory::new()
                .with_model("echo", MockBehavior::Echo)
                .into_arc(),
        )
        .with_broadcaster(broadcaster.clone());
    let results = engine.run("").await;

    let partials: Vec<String> = broadcaster
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::NodeStreaming { node_id, partial, .. } if node_id == "A" => {
                Some(partial.clone())
            }
            _ => None,
        })
        .collect();

    assert!(!partials.is_empty());
    // partials are prefixes of one another in arrival order (throttling may
    // drop intermediates but never reorders)
    for pair in partials.windows(2) {
        assert!(pair[1].starts_with(&pair[0]) || pair[1] == pair[0]);
    }
    // the final complete partial always arrives
    assert_eq!(partials.last().unwrap(), &results["A"]);
}

#[tokio::test]
async fn test_snapshot_results_truncate_but_terminal_emit_is_full() {
    let long_value = "z".repeat(800);
    let def = WorkflowDefinition::new(
        vec![
            WorkflowNode::new("I", NodeKind::Input).with_data("defaultValue", json!(long_value)),
            WorkflowNode::new("O", NodeKind::Output),
        ],
        vec![WorkflowEdge::new("e1", "I", "O")],
    );

    let broadcaster = MemoryBroadcaster::new();
    let engine = WorkflowEngine::new(def, "wf").with_broadcaster(broadcaster.clone());
    engine.run("").await;

    let events = broadcaster.events();
    let mid_run = events.iter().find_map(|e| match e {
        Event::WorkflowStatus { status, results, .. } if status == "running" => {
            results.get("I").cloned()
        }
        _ => None,
    });
    assert_eq!(mid_run.unwrap().chars().count(), 500);

    match broadcaster.last_status().unwrap() {
        Event::WorkflowStatus { results, status, .. } => {
            assert_eq!(status, "completed");
            assert_eq!(results["I"].chars().count(), 800);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_tool_config_reaches_adapter() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "tokio"),
            WorkflowNode::new("T", NodeKind::Tool)
                .with_data("tool", json!("web_search"))
                .with_data("queryTemplate", json!("docs for {input}")),
        ],
        vec![WorkflowEdge::new("e1", "I", "T")],
    );

    let mut tools = ToolRegistry::new();
    tools.register("web_search", Arc::new(ConfigEchoTool));
    let engine = WorkflowEngine::new(def, "wf").with_tool_registry(tools);
    let results = engine.run("").await;

    let config: serde_json::Value = serde_json::from_str(&results["T"]).unwrap();
    assert_eq!(config["query"], "docs for tokio");
}

#[tokio::test(start_paused = true)]
async fn test_graph_loop_no_change_exit() {
    let def = WorkflowDefinition::new(
        vec![
            input_node("I", "seed"),
            WorkflowNode::new("L", NodeKind::Loop)
                .with_data("maxIterations", json!(5))
                .with_data("exitConditionType", json!("no_change")),
            WorkflowNode::new("G", NodeKind::Agent).with_data("model", json!("gen")),
        ],
        vec![
            WorkflowEdge::new("e1", "I", "L"),
            WorkflowEdge::new("e2", "L", "G"),
            WorkflowEdge::new("back", "G", "L"),
        ],
    );

    // stabilizes at "steady" on round 2: round 3 reproduces its input
    let engine = WorkflowEngine::new(def, "wf").with_agent_factory(
        MockAgentFactory::new()
            .with_model("gen", MockBehavior::sequence(["steady", "steady"]))
            .into_arc(),
    );
    let results = engine.run("").await;

    let rounds = results["L"].matches("[Round").count();
    assert_eq!(rounds, 2);
}
