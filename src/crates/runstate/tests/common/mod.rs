//! Shared fixtures for the integration tests

#![allow(dead_code)]

use serde_json::{json, Map, Value};

use runstate::config::EngineConfig;
use runstate::db::models::State;
use runstate::db::DatabaseConnection;
use runstate::graph::{GraphDefinition, GraphNodeSpec};
use runstate::services::{CreateRun, Engine, NodeRegistration, RootState};

pub const NS: &str = "testing";

pub struct TestEngine {
    // Keeps the database file alive for the test's duration
    _dir: tempfile::TempDir,
    pub url: String,
    pub db: DatabaseConnection,
    pub engine: Engine,
}

impl TestEngine {
    /// A second, independent pool on the same database file
    pub async fn reopen(&self) -> DatabaseConnection {
        DatabaseConnection::new(&self.url)
            .await
            .expect("Failed to open second connection")
    }
}

pub async fn setup() -> TestEngine {
    setup_with(EngineConfig::default()).await
}

pub async fn setup_with(config: EngineConfig) -> TestEngine {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("runstate.db").display());
    let db = DatabaseConnection::new(&url)
        .await
        .expect("Failed to create test database");
    db.run_migrations().await.expect("Failed to run migrations");

    let engine = Engine::new(db.clone(), config);
    TestEngine {
        _dir: dir,
        url,
        db,
        engine,
    }
}

pub fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("expected a JSON object")
}

/// A node with no required fields
pub fn open_node(name: &str) -> NodeRegistration {
    NodeRegistration {
        name: name.to_string(),
        inputs_schema: json!({"type": "object"}),
        outputs_schema: json!({"type": "object"}),
        secrets: Vec::new(),
    }
}

pub async fn register_open(engine: &Engine, names: &[&str]) {
    engine
        .registry
        .register(NS, names.iter().map(|n| open_node(n)).collect())
        .await
        .expect("register nodes");
}

pub async fn upsert(engine: &Engine, graph: &str, nodes: Vec<GraphNodeSpec>) {
    engine
        .templates
        .upsert(
            NS,
            graph,
            GraphDefinition {
                nodes,
                ..Default::default()
            },
        )
        .await
        .expect("upsert template");
}

pub async fn start(engine: &Engine, graph: &str, identifier: &str, inputs: Value) -> (String, Vec<State>) {
    engine
        .runs
        .create(
            NS,
            graph,
            CreateRun {
                run_id: None,
                states: vec![RootState {
                    identifier: identifier.to_string(),
                    inputs: object(inputs),
                }],
            },
        )
        .await
        .expect("create run")
}

/// Claim every ready state of one node
pub async fn claim_all(engine: &Engine, node: &str) -> Vec<State> {
    engine
        .queue
        .enqueue(NS, &[node.to_string()], 100)
        .await
        .expect("enqueue")
}
