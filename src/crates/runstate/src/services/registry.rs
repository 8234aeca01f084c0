//! Node registry service

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::db::models::Node;
use crate::db::repositories::NodeRepository;
use crate::db::{self, DatabaseConnection};
use crate::schema::check_object_schema;
use crate::{EngineError, Result};

/// A node registration as submitted by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub name: String,
    pub inputs_schema: Value,
    pub outputs_schema: Value,
    /// Secret names the node needs at execution time
    #[serde(default, alias = "secret_names")]
    pub secrets: Vec<String>,
}

/// A registered node descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub namespace: String,
    pub inputs_schema: Value,
    pub outputs_schema: Value,
    pub secrets: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<Node> for NodeDescriptor {
    type Error = EngineError;

    fn try_from(node: Node) -> Result<Self> {
        Ok(Self {
            inputs_schema: serde_json::from_str(&node.inputs_schema)?,
            outputs_schema: serde_json::from_str(&node.outputs_schema)?,
            secrets: serde_json::from_str(&node.secrets)?,
            name: node.name,
            namespace: node.namespace,
            created_at: node.created_at,
            updated_at: node.updated_at,
        })
    }
}

/// Registers and looks up node descriptors
#[derive(Debug, Clone)]
pub struct RegistryService {
    db: DatabaseConnection,
}

impl RegistryService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Upsert a batch of node descriptors
    ///
    /// The batch is all-or-nothing: every schema is checked before anything
    /// is written, and the writes share one transaction.
    pub async fn register(
        &self,
        namespace: &str,
        nodes: Vec<NodeRegistration>,
    ) -> Result<Vec<NodeDescriptor>> {
        check_namespace(namespace)?;
        if nodes.is_empty() {
            return Err(EngineError::Validation("no nodes to register".to_string()));
        }

        let mut problems = Vec::new();
        let mut seen = BTreeSet::new();
        for node in &nodes {
            if node.name.trim().is_empty() {
                problems.push("node name cannot be empty".to_string());
                continue;
            }
            if !seen.insert(node.name.as_str()) {
                problems.push(format!("node '{}' appears twice", node.name));
            }
            for (field, schema) in [
                ("inputs_schema", &node.inputs_schema),
                ("outputs_schema", &node.outputs_schema),
            ] {
                if let Err(e) = check_object_schema(field, schema) {
                    problems.push(format!("node '{}': {}", node.name, e));
                }
            }
            if node.secrets.iter().any(|s| s.trim().is_empty()) {
                problems.push(format!("node '{}': secret names cannot be empty", node.name));
            }
        }
        if !problems.is_empty() {
            return Err(EngineError::Validation(problems.join("; ")));
        }

        let now = db::now();
        let mut tx = self.db.pool().begin().await?;
        let mut registered = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let row = NodeRepository::upsert(
                &mut *tx,
                namespace,
                &node.name,
                &serde_json::to_string(&node.inputs_schema)?,
                &serde_json::to_string(&node.outputs_schema)?,
                &serde_json::to_string(&node.secrets)?,
                &now,
            )
            .await?;
            registered.push(NodeDescriptor::try_from(row)?);
        }
        tx.commit().await?;

        info!(
            namespace = %namespace,
            count = registered.len(),
            "Registered nodes"
        );
        Ok(registered)
    }

    /// Get one node descriptor
    pub async fn get(&self, namespace: &str, name: &str) -> Result<NodeDescriptor> {
        let node = NodeRepository::get(self.db.pool(), namespace, name)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("node '{}' in namespace '{}'", name, namespace))
            })?;
        debug!(namespace = %namespace, node = %name, "Retrieved node");
        NodeDescriptor::try_from(node)
    }

    /// Get one node descriptor, `None` when unregistered
    pub async fn find(&self, namespace: &str, name: &str) -> Result<Option<NodeDescriptor>> {
        NodeRepository::get(self.db.pool(), namespace, name)
            .await?
            .map(NodeDescriptor::try_from)
            .transpose()
    }

    /// Every node of a namespace
    pub async fn list(&self, namespace: &str) -> Result<Vec<NodeDescriptor>> {
        NodeRepository::list(self.db.pool(), namespace)
            .await?
            .into_iter()
            .map(NodeDescriptor::try_from)
            .collect()
    }
}

/// Namespaces are path segments; reject blanks early
pub(crate) fn check_namespace(namespace: &str) -> Result<()> {
    if namespace.trim().is_empty() {
        return Err(EngineError::Validation("namespace cannot be empty".to_string()));
    }
    Ok(())
}
