//! API data transfer objects (DTOs) and response models

pub mod graph;
pub mod node;
pub mod state;

pub use graph::{CreateStatesRequest, CreateStatesResponse, GraphResponse, UpsertGraphRequest};
pub use node::{NodeListResponse, RegisterNodesRequest, RegisterNodesResponse};
pub use state::{
    CancelRunResponse, EnqueueRequest, EnqueueResponse, ExecutedRequest, ExecutedResponse,
    RunResponse, SecretsResponse, StateListQuery, StateListResponse, StateResponse,
};

/// Health response
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    /// Overall status
    pub status: String,

    /// Database connection status
    pub database: String,

    pub version: String,

    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(status: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            database: database.into(),
            version: crate::version::VERSION.to_string(),
            timestamp: crate::db::now(),
        }
    }
}
