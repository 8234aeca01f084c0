//! End-to-end engine flows over a real SQLite file

mod common;

use common::*;
use serde_json::json;

use runstate::graph::GraphNodeSpec;
use runstate::services::{CreateRun, ExecutionReport, NodeRegistration, RootState};
use runstate::{EngineError, StateStatus};

#[tokio::test]
async fn test_single_edge_run() {
    let t = setup().await;
    t.engine
        .registry
        .register(
            NS,
            vec![
                NodeRegistration {
                    name: "A".into(),
                    inputs_schema: json!({
                        "type": "object",
                        "properties": {"x": {"type": "integer"}},
                        "required": ["x"]
                    }),
                    outputs_schema: json!({
                        "type": "object",
                        "properties": {"y": {"type": "string"}},
                        "required": ["y"]
                    }),
                    secrets: Vec::new(),
                },
                NodeRegistration {
                    name: "B".into(),
                    inputs_schema: json!({
                        "type": "object",
                        "properties": {"z": {"type": "string"}},
                        "required": ["z"]
                    }),
                    outputs_schema: json!({"type": "object"}),
                    secrets: Vec::new(),
                },
            ],
        )
        .await
        .unwrap();
    upsert(
        &t.engine,
        "g",
        vec![
            GraphNodeSpec::new("a", "A").with_next("b"),
            GraphNodeSpec::new("b", "B").with_input("z", json!("${{ a.y }}")),
        ],
    )
    .await;

    let (run_id, roots) = start(&t.engine, "g", "a", json!({"x": 1})).await;
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].status().unwrap(), StateStatus::Created);

    let claimed = claim_all(&t.engine, "A").await;
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].status().unwrap(), StateStatus::Queued);

    let outcome = t
        .engine
        .results
        .report(NS, &claimed[0].id, ExecutionReport::Outputs(vec![object(json!({"y": "hi"}))]))
        .await
        .unwrap();
    assert_eq!(outcome.state.status().unwrap(), StateStatus::NextCreated);
    assert_eq!(outcome.successors.len(), 1);

    let b = &outcome.successors[0];
    assert_eq!(b.identifier, "b");
    assert_eq!(b.run_id, run_id);
    assert_eq!(b.inputs_map().unwrap()["z"], json!("hi"));
    assert_eq!(b.parents_map().unwrap()["a"], claimed[0].id);

    let claimed_b = claim_all(&t.engine, "B").await;
    let done = t
        .engine
        .results
        .report(NS, &claimed_b[0].id, ExecutionReport::Outputs(vec![object(json!({}))]))
        .await
        .unwrap();
    assert_eq!(done.state.status().unwrap(), StateStatus::Success);
    assert!(done.successors.is_empty());

    let summary = t.engine.runs.get_run(NS, &run_id).await.unwrap();
    assert!(summary.completed);
    assert_eq!(summary.counts["SUCCESS"], 1);
    assert_eq!(summary.counts["NEXT_CREATED"], 1);
}

#[tokio::test]
async fn test_fan_out_one_successor_per_output() {
    let t = setup().await;
    register_open(&t.engine, &["A", "B"]).await;
    upsert(
        &t.engine,
        "g",
        vec![
            GraphNodeSpec::new("a", "A").with_next("b"),
            GraphNodeSpec::new("b", "B").with_input("z", json!("${{ a.y }}")),
        ],
    )
    .await;

    start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);
    let outcome = t
        .engine
        .results
        .report(
            NS,
            &a.id,
            ExecutionReport::Outputs(vec![object(json!({"y": "p"})), object(json!({"y": "q"}))]),
        )
        .await
        .unwrap();

    let mut zs: Vec<_> = outcome
        .successors
        .iter()
        .map(|s| s.inputs_map().unwrap()["z"].clone())
        .collect();
    zs.sort_by_key(|v| v.to_string());
    assert_eq!(zs, vec![json!("p"), json!("q")]);
    for successor in &outcome.successors {
        assert_eq!(successor.parents_map().unwrap()["a"], a.id);
    }
}

#[tokio::test]
async fn test_fan_out_multiplies_across_levels() {
    let t = setup().await;
    register_open(&t.engine, &["A", "B", "C"]).await;
    upsert(
        &t.engine,
        "g",
        vec![
            GraphNodeSpec::new("a", "A").with_next("b"),
            GraphNodeSpec::new("b", "B")
                .with_input("from_a", json!("${{ a.v }}"))
                .with_next("c"),
            GraphNodeSpec::new("c", "C")
                .with_input("from_a", json!("${{ a.v }}"))
                .with_input("from_b", json!("${{ b.v }}")),
        ],
    )
    .await;

    let (run_id, _) = start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);
    t.engine
        .results
        .report(
            NS,
            &a.id,
            ExecutionReport::Outputs(vec![object(json!({"v": 0})), object(json!({"v": 1}))]),
        )
        .await
        .unwrap();

    let bs = claim_all(&t.engine, "B").await;
    assert_eq!(bs.len(), 2);
    for b in &bs {
        let outputs = (0..3).map(|i| object(json!({"v": i * 10}))).collect();
        let outcome = t
            .engine
            .results
            .report(NS, &b.id, ExecutionReport::Outputs(outputs))
            .await
            .unwrap();
        assert_eq!(outcome.successors.len(), 3);
        for c in &outcome.successors {
            let parents = c.parents_map().unwrap();
            assert_eq!(parents["a"], a.id);
            assert_eq!(parents["b"], b.id);
            // Non-immediate ancestor resolved through the branch index
            assert_eq!(c.inputs_map().unwrap()["from_a"], b.inputs_map().unwrap()["from_a"]);
        }
    }

    let summary = t.engine.runs.get_run(NS, &run_id).await.unwrap();
    let cs = summary.states.iter().filter(|s| s.identifier == "c").count();
    assert_eq!(cs, 6);
    assert!(!summary.completed);
}

#[tokio::test]
async fn test_zero_outputs_succeeds_without_successors() {
    let t = setup().await;
    register_open(&t.engine, &["A", "B"]).await;
    upsert(
        &t.engine,
        "g",
        vec![GraphNodeSpec::new("a", "A").with_next("b"), GraphNodeSpec::new("b", "B")],
    )
    .await;

    start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);
    let outcome = t
        .engine
        .results
        .report(NS, &a.id, ExecutionReport::Outputs(Vec::new()))
        .await
        .unwrap();
    assert_eq!(outcome.state.status().unwrap(), StateStatus::Success);
    assert!(outcome.successors.is_empty());
}

#[tokio::test]
async fn test_duplicate_report_is_rejected() {
    let t = setup().await;
    register_open(&t.engine, &["A", "B"]).await;
    upsert(
        &t.engine,
        "g",
        vec![GraphNodeSpec::new("a", "A").with_next("b"), GraphNodeSpec::new("b", "B")],
    )
    .await;

    let (run_id, _) = start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);
    let report = ExecutionReport::Outputs(vec![object(json!({"y": 1}))]);

    t.engine.results.report(NS, &a.id, report.clone()).await.unwrap();
    let second = t.engine.results.report(NS, &a.id, report).await;
    assert!(matches!(second, Err(EngineError::Conflict(_))));

    let summary = t.engine.runs.get_run(NS, &run_id).await.unwrap();
    assert_eq!(summary.states.iter().filter(|s| s.identifier == "b").count(), 1);
}

#[tokio::test]
async fn test_report_requires_queued_state() {
    let t = setup().await;
    register_open(&t.engine, &["A"]).await;
    upsert(&t.engine, "g", vec![GraphNodeSpec::new("a", "A")]).await;

    let (_, roots) = start(&t.engine, "g", "a", json!({})).await;
    let early = t
        .engine
        .results
        .report(NS, &roots[0].id, ExecutionReport::Outputs(Vec::new()))
        .await;
    assert!(matches!(early, Err(EngineError::Conflict(_))));

    let missing = t
        .engine
        .results
        .report(NS, "no-such-state", ExecutionReport::Outputs(Vec::new()))
        .await;
    assert!(matches!(missing, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_diamond_join_waits_for_both_branches() {
    let t = setup().await;
    register_open(&t.engine, &["A", "B", "C", "D"]).await;
    upsert(
        &t.engine,
        "g",
        vec![
            GraphNodeSpec::new("a", "A").with_next("b").with_next("c"),
            GraphNodeSpec::new("b", "B").with_next("d"),
            GraphNodeSpec::new("c", "C").with_next("d"),
            GraphNodeSpec::new("d", "D")
                .with_input("left", json!("${{ b.v }}"))
                .with_input("right", json!("${{ c.v }}")),
        ],
    )
    .await;

    let (run_id, _) = start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);
    let outcome = t
        .engine
        .results
        .report(NS, &a.id, ExecutionReport::Outputs(vec![object(json!({}))]))
        .await
        .unwrap();
    assert_eq!(outcome.successors.len(), 2);

    let b = claim_all(&t.engine, "B").await.remove(0);
    let first = t
        .engine
        .results
        .report(NS, &b.id, ExecutionReport::Outputs(vec![object(json!({"v": "L"}))]))
        .await
        .unwrap();
    assert!(first.successors.is_empty());
    assert_eq!(first.state.status().unwrap(), StateStatus::NextCreated);

    let c = claim_all(&t.engine, "C").await.remove(0);
    let second = t
        .engine
        .results
        .report(NS, &c.id, ExecutionReport::Outputs(vec![object(json!({"v": "R"}))]))
        .await
        .unwrap();
    assert_eq!(second.successors.len(), 1);

    let d = &second.successors[0];
    let inputs = d.inputs_map().unwrap();
    assert_eq!(inputs["left"], json!("L"));
    assert_eq!(inputs["right"], json!("R"));
    let parents = d.parents_map().unwrap();
    assert_eq!(parents["a"], a.id);
    assert_eq!(parents["b"], b.id);
    assert_eq!(parents["c"], c.id);

    let summary = t.engine.runs.get_run(NS, &run_id).await.unwrap();
    assert_eq!(summary.states.iter().filter(|s| s.identifier == "d").count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_join_reports_create_one_successor_per_branch() {
    let t = setup().await;
    register_open(&t.engine, &["A", "B", "C", "D"]).await;
    upsert(
        &t.engine,
        "g",
        vec![
            GraphNodeSpec::new("a", "A").with_next("b").with_next("c"),
            GraphNodeSpec::new("b", "B").with_input("i", json!("${{ a.i }}")).with_next("d"),
            GraphNodeSpec::new("c", "C").with_input("i", json!("${{ a.i }}")).with_next("d"),
            GraphNodeSpec::new("d", "D")
                .with_input("left", json!("${{ b.v }}"))
                .with_input("right", json!("${{ c.v }}")),
        ],
    )
    .await;

    for _ in 0..5 {
        let (run_id, _) = start(&t.engine, "g", "a", json!({})).await;
        let a = claim_all(&t.engine, "A").await.remove(0);
        let outputs = (0..3).map(|i| object(json!({ "i": i }))).collect();
        t.engine
            .results
            .report(NS, &a.id, ExecutionReport::Outputs(outputs))
            .await
            .unwrap();

        let mut upstream = claim_all(&t.engine, "B").await;
        upstream.extend(claim_all(&t.engine, "C").await);
        assert_eq!(upstream.len(), 6);

        let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(upstream.len()));
        let mut reporters = Vec::new();
        for state in upstream {
            let engine = t.engine.clone();
            let barrier = barrier.clone();
            reporters.push(tokio::spawn(async move {
                let i = state.inputs_map().unwrap()["i"].clone();
                let side = if state.identifier == "b" { "L" } else { "R" };
                barrier.wait().await;
                engine
                    .results
                    .report(
                        NS,
                        &state.id,
                        ExecutionReport::Outputs(vec![object(json!({ "v": format!("{side}{i}") }))]),
                    )
                    .await
                    .unwrap()
                    .successors
                    .len()
            }));
        }

        let mut created = 0;
        for result in futures::future::join_all(reporters).await {
            created += result.unwrap();
        }
        assert_eq!(created, 3);

        let summary = t.engine.runs.get_run(NS, &run_id).await.unwrap();
        let joins: Vec<_> = summary.states.iter().filter(|s| s.identifier == "d").collect();
        assert_eq!(joins.len(), 3, "expected one join per branch");

        let mut branches = std::collections::BTreeSet::new();
        for d in joins {
            let branch = d.branch_map().unwrap()["a"];
            let inputs = d.inputs_map().unwrap();
            assert_eq!(inputs["left"], json!(format!("L{branch}")));
            assert_eq!(inputs["right"], json!(format!("R{branch}")));
            branches.insert(branch);
        }
        assert_eq!(branches.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}

#[tokio::test]
async fn test_invalid_outputs_error_the_state() {
    let t = setup().await;
    t.engine
        .registry
        .register(
            NS,
            vec![NodeRegistration {
                name: "A".into(),
                inputs_schema: json!({"type": "object"}),
                outputs_schema: json!({
                    "type": "object",
                    "properties": {"y": {"type": "string"}},
                    "required": ["y"]
                }),
                secrets: Vec::new(),
            }],
        )
        .await
        .unwrap();
    upsert(&t.engine, "g", vec![GraphNodeSpec::new("a", "A")]).await;

    start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);
    let outcome = t
        .engine
        .results
        .report(NS, &a.id, ExecutionReport::Outputs(vec![object(json!({"y": 5}))]))
        .await
        .unwrap();

    assert_eq!(outcome.state.status().unwrap(), StateStatus::Errored);
    assert!(outcome.state.error.unwrap().contains("outputs_schema"));
    assert!(outcome.successors.is_empty());
}

#[tokio::test]
async fn test_unregistered_successor_errors_the_reporter() {
    let t = setup().await;
    register_open(&t.engine, &["A"]).await;
    upsert(
        &t.engine,
        "g",
        vec![GraphNodeSpec::new("a", "A").with_next("b"), GraphNodeSpec::new("b", "Missing")],
    )
    .await;

    let (run_id, _) = start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);
    let outcome = t
        .engine
        .results
        .report(NS, &a.id, ExecutionReport::Outputs(vec![object(json!({}))]))
        .await
        .unwrap();

    assert_eq!(outcome.state.status().unwrap(), StateStatus::Errored);
    let summary = t.engine.runs.get_run(NS, &run_id).await.unwrap();
    assert_eq!(summary.states.len(), 1);
}

#[tokio::test]
async fn test_run_ids_are_never_shared() {
    let t = setup().await;
    register_open(&t.engine, &["A"]).await;
    upsert(&t.engine, "g", vec![GraphNodeSpec::new("a", "A")]).await;

    let request = || CreateRun {
        run_id: Some("fixed".into()),
        states: vec![RootState {
            identifier: "a".into(),
            inputs: Default::default(),
        }],
    };
    let (run_id, _) = t.engine.runs.create(NS, "g", request()).await.unwrap();
    assert_eq!(run_id, "fixed");
    let again = t.engine.runs.create(NS, "g", request()).await;
    assert!(matches!(again, Err(EngineError::Conflict(_))));

    let (first, _) = start(&t.engine, "g", "a", json!({})).await;
    let (second, _) = start(&t.engine, "g", "a", json!({})).await;
    assert_ne!(first, second);

    let (_, run_ids) = t.engine.runs.list(NS, None).await.unwrap();
    assert_eq!(run_ids.len(), 3);
}

#[tokio::test]
async fn test_create_rejects_non_entry_and_bad_inputs() {
    let t = setup().await;
    t.engine
        .registry
        .register(
            NS,
            vec![
                NodeRegistration {
                    name: "A".into(),
                    inputs_schema: json!({
                        "type": "object",
                        "properties": {"x": {"type": "integer"}},
                        "required": ["x"]
                    }),
                    outputs_schema: json!({"type": "object"}),
                    secrets: Vec::new(),
                },
                open_node("B"),
            ],
        )
        .await
        .unwrap();
    upsert(
        &t.engine,
        "g",
        vec![GraphNodeSpec::new("a", "A").with_next("b"), GraphNodeSpec::new("b", "B")],
    )
    .await;

    let create = |identifier: &str, inputs: serde_json::Value| CreateRun {
        run_id: None,
        states: vec![RootState {
            identifier: identifier.into(),
            inputs: object(inputs),
        }],
    };

    let not_entry = t.engine.runs.create(NS, "g", create("b", json!({}))).await;
    assert!(matches!(not_entry, Err(EngineError::Validation(_))));

    let bad_inputs = t.engine.runs.create(NS, "g", create("a", json!({"x": "one"}))).await;
    assert!(matches!(bad_inputs, Err(EngineError::Validation(_))));

    let unknown_graph = t.engine.runs.create(NS, "nope", create("a", json!({"x": 1}))).await;
    assert!(matches!(unknown_graph, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn test_cancelled_state_rejects_report() {
    let t = setup().await;
    register_open(&t.engine, &["A"]).await;
    upsert(&t.engine, "g", vec![GraphNodeSpec::new("a", "A")]).await;

    let (run_id, _) = start(&t.engine, "g", "a", json!({})).await;
    let a = claim_all(&t.engine, "A").await.remove(0);

    let cancelled = t.engine.runs.cancel_run(NS, &run_id).await.unwrap();
    assert_eq!(cancelled, vec![a.id.clone()]);

    let late = t
        .engine
        .results
        .report(NS, &a.id, ExecutionReport::Outputs(Vec::new()))
        .await;
    assert!(matches!(late, Err(EngineError::Conflict(_))));

    let again = t.engine.runs.cancel_state(NS, &a.id).await;
    assert!(matches!(again, Err(EngineError::Conflict(_))));
    assert!(t.engine.runs.get_run(NS, &run_id).await.unwrap().completed);
}

#[tokio::test]
async fn test_template_update_does_not_affect_running_runs() {
    let t = setup().await;
    register_open(&t.engine, &["A", "B", "C"]).await;
    upsert(
        &t.engine,
        "g",
        vec![GraphNodeSpec::new("a", "A").with_next("b"), GraphNodeSpec::new("b", "B")],
    )
    .await;
    start(&t.engine, "g", "a", json!({})).await;

    upsert(
        &t.engine,
        "g",
        vec![GraphNodeSpec::new("a", "A").with_next("c"), GraphNodeSpec::new("c", "C")],
    )
    .await;
    assert_eq!(t.engine.templates.get(NS, "g").await.unwrap().version, 2);

    let a = claim_all(&t.engine, "A").await.remove(0);
    let outcome = t
        .engine
        .results
        .report(NS, &a.id, ExecutionReport::Outputs(vec![object(json!({}))]))
        .await
        .unwrap();
    assert_eq!(outcome.successors[0].identifier, "b");
    assert_eq!(outcome.successors[0].graph_version, 1);
}
