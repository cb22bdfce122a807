//! Property tests over the analyzer and the chunk windowing.

use proptest::prelude::*;
use std::collections::HashMap;

use nodeflow_core::text::split_chunks;
use nodeflow_core::{GraphAnalysis, NodeKind, WorkflowDefinition, WorkflowEdge, WorkflowNode};

/// Random DAGs: nodes n0..n{count}, edges only from lower to higher index.
fn arb_dag() -> impl Strategy<Value = WorkflowDefinition> {
    (2usize..8).prop_flat_map(|count| {
        let pairs: Vec<(usize, usize)> = (0..count)
            .flat_map(|i| ((i + 1)..count).map(move |j| (i, j)))
            .collect();
        proptest::sample::subsequence(pairs.clone(), 0..=pairs.len()).prop_map(move |chosen| {
            let nodes = (0..count)
                .map(|i| WorkflowNode::new(format!("n{}", i), NodeKind::Agent))
                .collect();
            let edges = chosen
                .iter()
                .enumerate()
                .map(|(k, (i, j))| {
                    WorkflowEdge::new(format!("e{}", k), format!("n{}", i), format!("n{}", j))
                })
                .collect();
            WorkflowDefinition::new(nodes, edges)
        })
    })
}

proptest! {
    #[test]
    fn prop_acyclic_graphs_have_no_back_edges(def in arb_dag()) {
        let analysis = GraphAnalysis::analyze(&def).unwrap();
        prop_assert!(analysis.back_edges().is_empty());
    }

    #[test]
    fn prop_levels_respect_edge_direction(def in arb_dag()) {
        let analysis = GraphAnalysis::analyze(&def).unwrap();

        let mut level_of: HashMap<String, usize> = HashMap::new();
        for (index, level) in analysis.levels().iter().enumerate() {
            for node in level {
                level_of.insert(node.clone(), index);
            }
        }

        // every node is placed exactly once
        prop_assert_eq!(level_of.len(), def.nodes.len());

        for edge in &def.edges {
            prop_assert!(level_of[&edge.source] < level_of[&edge.target]);
        }
    }

    #[test]
    fn prop_chunks_cover_the_text(
        text in "[a-z ]{0,400}",
        chunk_size in 1usize..64,
        overlap in 0usize..64,
    ) {
        let chunks = split_chunks(&text, chunk_size, overlap);

        prop_assert!(!chunks.is_empty());
        // every window fits the configured size (single-window inputs
        // are returned whole)
        if text.chars().count() > chunk_size {
            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= chunk_size);
            }
        }
        // first window starts the text, last window ends it
        prop_assert!(text.starts_with(chunks.first().unwrap().as_str()));
        prop_assert!(text.ends_with(chunks.last().unwrap().as_str()));
    }

    #[test]
    fn prop_consecutive_chunks_overlap(
        text in "[a-z]{80,200}",
        chunk_size in 8usize..32,
        overlap in 1usize..8,
    ) {
        let chunks = split_chunks(&text, chunk_size, overlap);

        for pair in chunks.windows(2) {
            let prev = &pair[0];
            let next = &pair[1];
            if prev.chars().count() == chunk_size {
                // the next window re-reads the previous window's tail
                let tail: String = prev.chars().skip(chunk_size - overlap).collect();
                prop_assert!(next.starts_with(&tail));
            }
        }
    }
}
