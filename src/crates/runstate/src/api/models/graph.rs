//! Graph template DTOs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::api::models::StateResponse;
use crate::executor::RetryConfig;
use crate::graph::{GraphDefinition, GraphNodeSpec, GraphTemplate};
use crate::services::CreateRun;

/// Shown instead of a secret's value
pub const SECRET_MASK: &str = "********";

/// PUT /namespace/:namespace/graph/:graph_name
pub type UpsertGraphRequest = GraphDefinition;

/// A stored template as returned by the API; secret values are masked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphResponse {
    pub namespace: String,
    pub name: String,
    pub version: i64,
    pub nodes: Vec<GraphNodeSpec>,
    pub secrets: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryConfig>,
    pub created_at: String,
}

impl From<GraphTemplate> for GraphResponse {
    fn from(template: GraphTemplate) -> Self {
        Self {
            namespace: template.namespace,
            name: template.name,
            version: template.version,
            nodes: template.nodes,
            secrets: template
                .secrets
                .into_keys()
                .map(|name| (name, SECRET_MASK.to_string()))
                .collect(),
            retry_policy: template.retry_policy,
            created_at: template.created_at,
        }
    }
}

/// POST /namespace/:namespace/graph/:graph_name/states/create
pub type CreateStatesRequest = CreateRun;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStatesResponse {
    pub run_id: String,
    pub states: Vec<StateResponse>,
}
