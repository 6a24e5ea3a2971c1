//! Integration tests for the end-to-end seed scenarios in spec.md §8.
//!
//! Each test below is named after its scenario letter and exercises the
//! engine the way a real client would: through `Engine::commit_batch`
//! across process-lifetime boundaries (drop + reopen), not through any
//! single shard or segment in isolation.

use rgdb::storage::engine::{BatchInput, Direction, EdgeInput, Engine, NodeInput};

fn node(semantic_id: &str, file: &str) -> NodeInput {
    NodeInput {
        semantic_id: semantic_id.to_string(),
        node_type: "FUNCTION".to_string(),
        name: semantic_id.to_string(),
        file: file.to_string(),
        exported: true,
        metadata: "{}".to_string(),
    }
}

fn edge(edge_type: &str, src: &str, dst: &str) -> EdgeInput {
    EdgeInput {
        edge_type: edge_type.to_string(),
        src_semantic_id: src.to_string(),
        dst_semantic_id: dst.to_string(),
        metadata: "{}".to_string(),
    }
}

/// Scenario A: count invariance across flush. 100 nodes committed, then
/// force-flushed, then the same 100 semantic ids re-committed under the
/// same `changed_files` — the count must stay at 100, not double.
#[test]
fn scenario_a_count_invariance_across_flush() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::create(dir.path(), 4, 2).unwrap();

    let nodes: Vec<NodeInput> = (0..100).map(|i| node(&format!("n{i}"), "f")).collect();
    engine
        .commit_batch(BatchInput {
            nodes,
            edges: vec![],
            changed_files: vec!["f".to_string()],
            file_context: None,
        })
        .unwrap();
    assert_eq!(engine.stats().total_nodes, 100);

    engine.flush_all().unwrap();

    let nodes: Vec<NodeInput> = (0..100).map(|i| node(&format!("n{i}"), "f")).collect();
    engine
        .commit_batch(BatchInput {
            nodes,
            edges: vec![],
            changed_files: vec!["f".to_string()],
            file_context: None,
        })
        .unwrap();

    assert_eq!(
        engine.stats().total_nodes,
        100,
        "re-committing the same 100 semantic ids under the same changed_files must not inflate the count"
    );
}

/// Scenario B: surgical re-index. Re-indexing `src/x.js` alone must leave
/// `src/y.js`'s node untouched and must retract the `CONTAINS` edge whose
/// src lives in the re-indexed file.
#[test]
fn scenario_b_surgical_reindex() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::create(dir.path(), 4, 2).unwrap();

    engine
        .commit_batch(BatchInput {
            nodes: vec![
                node("A:a@src/x.js", "src/x.js"),
                node("B:b@src/y.js", "src/y.js"),
            ],
            edges: vec![edge("CONTAINS", "A:a@src/x.js", "B:b@src/y.js")],
            changed_files: vec!["src/x.js".to_string(), "src/y.js".to_string()],
            file_context: None,
        })
        .unwrap();

    let b = engine.get_by_semantic_id("B:b@src/y.js").unwrap().clone();

    let mut updated = node("A:a@src/x.js", "src/x.js");
    updated.metadata = "{\"v\":2}".to_string();
    let summary = engine
        .commit_batch(BatchInput {
            nodes: vec![updated],
            edges: vec![],
            changed_files: vec!["src/x.js".to_string()],
            file_context: None,
        })
        .unwrap();

    let a = engine.get_by_semantic_id("A:a@src/x.js").unwrap();
    assert_eq!(a.metadata, "{\"v\":2}", "A must be updated in place");
    assert_eq!(summary.tombstoned_edges, 1, "the CONTAINS edge must be tombstoned");

    let still_b = engine.get_by_semantic_id("B:b@src/y.js").unwrap();
    assert_eq!(still_b.numeric_id, b.numeric_id, "B:b@src/y.js must be untouched");
    assert!(
        engine.outgoing_edges(a.numeric_id).is_empty(),
        "re-indexing src/x.js alone must retract its outgoing CONTAINS edge"
    );
}

/// Scenario C: surgical re-enrichment. Re-running the same
/// producer/file enrichment commit must leave exactly one `IMPORTS`
/// edge, never two.
#[test]
fn scenario_c_enrichment_rerun_is_surgical() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::create(dir.path(), 4, 2).unwrap();

    engine
        .commit_batch(BatchInput {
            nodes: vec![
                node("A:a@src/x.js", "src/x.js"),
                node("B:b@src/y.js", "src/y.js"),
                node("Z:z@src/z.js", "src/z.js"),
            ],
            edges: vec![],
            changed_files: vec![
                "src/x.js".to_string(),
                "src/y.js".to_string(),
                "src/z.js".to_string(),
            ],
            file_context: None,
        })
        .unwrap();

    let ctx = "__enrichment__/linker/src/x.js".to_string();
    for _ in 0..2 {
        engine
            .commit_batch(BatchInput {
                nodes: vec![],
                edges: vec![edge("IMPORTS", "A:a@src/x.js", "Z:z@src/z.js")],
                changed_files: vec![],
                file_context: Some(ctx.clone()),
            })
            .unwrap();
    }

    let a = engine.get_by_semantic_id("A:a@src/x.js").unwrap();
    let z = engine.get_by_semantic_id("Z:z@src/z.js").unwrap();
    let imports: Vec<_> = engine
        .outgoing_edges(a.numeric_id)
        .into_iter()
        .filter(|e| e.edge_type == "IMPORTS" && e.dst == z.numeric_id)
        .collect();
    assert_eq!(imports.len(), 1, "re-running the same enrichment commit must not duplicate the edge");
}

/// Scenario D: crash-before-flush. This engine's chosen durability model
/// (SPEC_FULL.md / DESIGN.md open-question decision) is per-commit
/// fsync of the manifest combined with threshold-gated segment flush:
/// raising the flush threshold above the delta size means an
/// unflushed delta is lost if the process dies before a later flush,
/// matching the "Q is absent" branch of the scenario.
#[test]
fn scenario_d_unflushed_delta_is_lost_on_reopen_without_flush() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut engine = Engine::create(dir.path(), 1, 1).unwrap();
        engine.set_flush_thresholds(1_000, 64 * 1024 * 1024);

        let summary = engine
            .commit_batch(BatchInput {
                nodes: vec![node("Q:q@src/q.js", "src/q.js")],
                edges: vec![],
                changed_files: vec!["src/q.js".to_string()],
                file_context: None,
            })
            .unwrap();
        assert_eq!(summary.nodes_committed, 1);
        // No explicit flush_all() call here: simulates a crash before the
        // next threshold-triggered flush, with the engine simply dropped.
    }

    let engine = Engine::open(dir.path()).unwrap();
    assert!(
        engine.get_by_semantic_id("Q:q@src/q.js").is_none(),
        "an unflushed delta must not survive a restart under this engine's durability model"
    );
}

/// Scenario D, durable variant: with the default flush threshold (every
/// non-empty touched shard flushes every commit), `CommitBatch`
/// acknowledgement implies durability.
#[test]
fn scenario_d_default_thresholds_make_every_commit_durable() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut engine = Engine::create(dir.path(), 1, 1).unwrap();
        engine
            .commit_batch(BatchInput {
                nodes: vec![node("Q:q@src/q.js", "src/q.js")],
                edges: vec![],
                changed_files: vec!["src/q.js".to_string()],
                file_context: None,
            })
            .unwrap();
    }

    let engine = Engine::open(dir.path()).unwrap();
    assert!(
        engine.get_by_semantic_id("Q:q@src/q.js").is_some(),
        "with default per-commit flush thresholds, an acknowledged commit must survive restart"
    );
}

/// Scenario F: enrichment edges are visible alongside ordinary edges via
/// `outgoing_edges`, and each kind is retracted only by its own kind of
/// surgical re-commit.
#[test]
fn scenario_f_enrichment_and_analysis_edges_coexist_and_retract_independently() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::create(dir.path(), 4, 2).unwrap();

    engine
        .commit_batch(BatchInput {
            nodes: vec![
                node("A:a@src/x.js", "src/x.js"),
                node("B:b@src/y.js", "src/y.js"),
                node("Z:z@src/z.js", "src/z.js"),
            ],
            edges: vec![edge("CONTAINS", "A:a@src/x.js", "B:b@src/y.js")],
            changed_files: vec![
                "src/x.js".to_string(),
                "src/y.js".to_string(),
                "src/z.js".to_string(),
            ],
            file_context: None,
        })
        .unwrap();

    let ctx = "__enrichment__/linker/src/x.js".to_string();
    engine
        .commit_batch(BatchInput {
            nodes: vec![],
            edges: vec![edge("IMPORTS", "A:a@src/x.js", "Z:z@src/z.js")],
            changed_files: vec![],
            file_context: Some(ctx.clone()),
        })
        .unwrap();

    let a = engine.get_by_semantic_id("A:a@src/x.js").unwrap();
    let edges = engine.outgoing_edges(a.numeric_id);
    assert_eq!(edges.len(), 2, "both the CONTAINS and IMPORTS edges must be visible");
    assert!(edges.iter().any(|e| e.edge_type == "CONTAINS"));
    assert!(edges.iter().any(|e| e.edge_type == "IMPORTS"));

    // Re-indexing src/x.js retracts CONTAINS but must leave IMPORTS live.
    engine
        .commit_batch(BatchInput {
            nodes: vec![node("A:a@src/x.js", "src/x.js")],
            edges: vec![],
            changed_files: vec!["src/x.js".to_string()],
            file_context: None,
        })
        .unwrap();

    let a = engine.get_by_semantic_id("A:a@src/x.js").unwrap();
    let edges = engine.outgoing_edges(a.numeric_id);
    assert_eq!(edges.len(), 1, "only the enrichment IMPORTS edge must remain");
    assert_eq!(edges[0].edge_type, "IMPORTS");

    // Now retract the enrichment edge surgically; the node itself is untouched.
    engine
        .commit_batch(BatchInput {
            nodes: vec![],
            edges: vec![],
            changed_files: vec![],
            file_context: Some(ctx),
        })
        .unwrap();

    let a = engine.get_by_semantic_id("A:a@src/x.js").unwrap();
    assert!(engine.outgoing_edges(a.numeric_id).is_empty());
}

/// Invariant 6: a committed enrichment edge must stay visible via
/// `outgoing_edges`/`incoming_edges` after the engine is dropped and
/// reopened, not just within the committing session.
#[test]
fn enrichment_edge_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (a_id, z_id) = {
        let mut engine = Engine::create(dir.path(), 4, 2).unwrap();
        engine
            .commit_batch(BatchInput {
                nodes: vec![
                    node("A:a@src/x.js", "src/x.js"),
                    node("Z:z@src/z.js", "src/z.js"),
                ],
                edges: vec![],
                changed_files: vec!["src/x.js".to_string(), "src/z.js".to_string()],
                file_context: None,
            })
            .unwrap();

        let a = engine.get_by_semantic_id("A:a@src/x.js").unwrap();
        let z = engine.get_by_semantic_id("Z:z@src/z.js").unwrap();
        let a_id = a.numeric_id;
        let z_id = z.numeric_id;

        engine
            .commit_batch(BatchInput {
                nodes: vec![],
                edges: vec![edge("IMPORTS", "A:a@src/x.js", "Z:z@src/z.js")],
                changed_files: vec![],
                file_context: Some("__enrichment__/linker/src/x.js".to_string()),
            })
            .unwrap();
        engine.flush_all().unwrap();

        (a_id, z_id)
    };

    let engine = Engine::open(dir.path()).unwrap();
    let outgoing = engine.outgoing_edges(a_id);
    assert_eq!(
        outgoing.len(),
        1,
        "the enrichment IMPORTS edge must still fan out via outgoing_edges after reopen"
    );
    assert_eq!(outgoing[0].edge_type, "IMPORTS");
    assert_eq!(outgoing[0].dst, z_id);

    let incoming = engine.incoming_edges(z_id);
    assert_eq!(
        incoming.len(),
        1,
        "the enrichment IMPORTS edge must still fan out via incoming_edges after reopen"
    );
    assert_eq!(incoming[0].src, a_id);
}

/// Property 9: `find_nodes_by_type` returns entries in the same order
/// (delta before segment, then ascending numeric id within each) across
/// a restart.
#[test]
fn iteration_order_is_stable_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let before: Vec<u64> = {
        let mut engine = Engine::create(dir.path(), 1, 1).unwrap();
        engine
            .commit_batch(BatchInput {
                nodes: vec![
                    node("A:a@f", "f"),
                    node("B:b@f", "f"),
                    node("C:c@f", "f"),
                ],
                edges: vec![],
                changed_files: vec!["f".to_string()],
                file_context: None,
            })
            .unwrap();
        engine
            .find_nodes_by_type("FUNCTION")
            .into_iter()
            .map(|n| n.numeric_id)
            .collect()
    };

    let engine = Engine::open(dir.path()).unwrap();
    let after: Vec<u64> = engine
        .find_nodes_by_type("FUNCTION")
        .into_iter()
        .map(|n| n.numeric_id)
        .collect();

    assert_eq!(before, after, "iteration order must be stable across a restart");
}

/// BFS / neighbors composition sanity check over a small multi-hop graph,
/// spanning several shards.
#[test]
fn bfs_and_neighbors_compose_across_shards() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = Engine::create(dir.path(), 8, 2).unwrap();

    engine
        .commit_batch(BatchInput {
            nodes: vec![
                node("A:a@src/a.js", "src/a.js"),
                node("B:b@src/b.js", "src/b.js"),
                node("C:c@src/c.js", "src/c.js"),
                node("D:d@src/d.js", "src/d.js"),
            ],
            edges: vec![
                edge("CALLS", "A:a@src/a.js", "B:b@src/b.js"),
                edge("CALLS", "B:b@src/b.js", "C:c@src/c.js"),
                edge("CALLS", "C:c@src/c.js", "D:d@src/d.js"),
            ],
            changed_files: vec![
                "src/a.js".to_string(),
                "src/b.js".to_string(),
                "src/c.js".to_string(),
                "src/d.js".to_string(),
            ],
            file_context: None,
        })
        .unwrap();

    let a = engine.get_by_semantic_id("A:a@src/a.js").unwrap();
    let d = engine.get_by_semantic_id("D:d@src/d.js").unwrap();

    assert!(!engine.bfs(a.numeric_id, 2, None).contains(&d.numeric_id));
    assert!(engine.bfs(a.numeric_id, 3, None).contains(&d.numeric_id));

    let neighbors = engine.neighbors(a.numeric_id, None, Direction::Outgoing);
    let b = engine.get_by_semantic_id("B:b@src/b.js").unwrap();
    assert_eq!(neighbors, vec![b.numeric_id]);
}
