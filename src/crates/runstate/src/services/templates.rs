//! Graph template store
//!
//! Each upsert appends a version; runs pin the version they started from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::db::models::GraphTemplateVersion;
use crate::db::repositories::GraphTemplateRepository;
use crate::db::{self, DatabaseConnection};
use crate::executor::RetryConfig;
use crate::graph::{validate_definition, GraphDefinition, GraphNodeSpec, GraphTemplate};
use crate::services::registry::check_namespace;
use crate::{EngineError, Result};

/// Layout of the `definition` column; secrets live in their own column
#[derive(Serialize, Deserialize)]
struct StoredDefinition {
    nodes: Vec<GraphNodeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_policy: Option<RetryConfig>,
}

impl TryFrom<GraphTemplateVersion> for GraphTemplate {
    type Error = EngineError;

    fn try_from(row: GraphTemplateVersion) -> Result<Self> {
        let stored: StoredDefinition = serde_json::from_str(&row.definition)?;
        let secrets: BTreeMap<String, String> = serde_json::from_str(&row.secrets)?;
        Ok(GraphTemplate {
            namespace: row.namespace,
            name: row.name,
            version: row.version,
            nodes: stored.nodes,
            secrets,
            retry_policy: stored.retry_policy,
            created_at: row.created_at,
        })
    }
}

/// Stores and reads versioned graph templates
#[derive(Debug, Clone)]
pub struct TemplateService {
    db: DatabaseConnection,
}

impl TemplateService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Validate and store a new version of a template
    pub async fn upsert(
        &self,
        namespace: &str,
        name: &str,
        definition: GraphDefinition,
    ) -> Result<GraphTemplate> {
        check_namespace(namespace)?;
        if name.trim().is_empty() {
            return Err(EngineError::Validation("graph name cannot be empty".to_string()));
        }

        if let Err(problems) = validate_definition(&definition) {
            warn!(
                namespace = %namespace,
                graph = %name,
                problems = problems.len(),
                "Rejected graph template"
            );
            return Err(EngineError::Validation(problems.join("; ")));
        }

        let stored = StoredDefinition {
            nodes: definition.nodes,
            retry_policy: definition.retry_policy,
        };
        let row = GraphTemplateRepository::insert_version(
            self.db.pool(),
            namespace,
            name,
            &serde_json::to_string(&stored)?,
            &serde_json::to_string(&definition.secrets)?,
            &db::now(),
        )
        .await?;

        info!(
            namespace = %namespace,
            graph = %name,
            version = row.version,
            "Stored graph template"
        );
        GraphTemplate::try_from(row)
    }

    /// Latest version of a template
    pub async fn get(&self, namespace: &str, name: &str) -> Result<GraphTemplate> {
        let row = GraphTemplateRepository::latest(self.db.pool(), namespace, name)
            .await?
            .ok_or_else(|| not_found(namespace, name))?;
        debug!(namespace = %namespace, graph = %name, version = row.version, "Loaded graph template");
        GraphTemplate::try_from(row)
    }

    /// A pinned version of a template
    pub async fn get_version(&self, namespace: &str, name: &str, version: i64) -> Result<GraphTemplate> {
        let row = GraphTemplateRepository::get_version(self.db.pool(), namespace, name, version)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "graph '{}' version {} in namespace '{}'",
                    name, version, namespace
                ))
            })?;
        GraphTemplate::try_from(row)
    }
}

fn not_found(namespace: &str, name: &str) -> EngineError {
    EngineError::NotFound(format!("graph '{}' in namespace '{}'", name, namespace))
}
