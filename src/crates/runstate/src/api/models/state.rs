//! State, queue and run DTOs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::api::error::{ApiError, ApiResult};
use crate::db::models::State;
use crate::services::{ExecutionReport, ReportOutcome, RunSummary};
use crate::StateStatus;

/// A state as returned by the API, JSON columns decoded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateResponse {
    pub id: String,
    pub run_id: String,
    pub namespace: String,
    pub graph_name: String,
    pub graph_version: i64,
    pub identifier: String,
    pub node_name: String,
    pub status: StateStatus,
    pub inputs: Map<String, Value>,
    pub outputs: Vec<Map<String, Value>>,
    pub error: Option<String>,
    pub parents: BTreeMap<String, String>,
    pub branch: BTreeMap<String, usize>,
    pub attempt: i64,
    pub max_attempts: i64,
    pub retry_of: Option<String>,
    pub enqueue_after: Option<String>,
    pub queued_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl StateResponse {
    pub fn from_db_state(state: State) -> ApiResult<Self> {
        Ok(Self {
            status: state.status()?,
            inputs: state.inputs_map()?,
            outputs: state.output_sets()?,
            parents: state.parents_map()?,
            branch: state.branch_map()?,
            id: state.id,
            run_id: state.run_id,
            namespace: state.namespace,
            graph_name: state.graph_name,
            graph_version: state.graph_version,
            identifier: state.identifier,
            node_name: state.node_name,
            error: state.error,
            attempt: state.attempt,
            max_attempts: state.max_attempts,
            retry_of: state.retry_of,
            enqueue_after: state.enqueue_after,
            queued_at: state.queued_at,
            created_at: state.created_at,
            updated_at: state.updated_at,
        })
    }

    pub fn from_db_states(states: Vec<State>) -> ApiResult<Vec<Self>> {
        states.into_iter().map(Self::from_db_state).collect()
    }
}

/// POST /namespace/:namespace/states/enqueue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub nodes: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_batch_size() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub namespace: String,
    pub count: usize,
    pub states: Vec<StateResponse>,
}

/// POST /namespace/:namespace/states/:state_id/executed
///
/// Exactly one of `outputs` and `error` must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutedRequest {
    #[serde(default)]
    pub outputs: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutedRequest {
    pub fn into_report(self) -> ApiResult<ExecutionReport> {
        match (self.outputs, self.error) {
            (Some(outputs), None) => Ok(ExecutionReport::Outputs(outputs)),
            (None, Some(error)) => Ok(ExecutionReport::Error(error)),
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "report either outputs or error, not both".to_string(),
            )),
            (None, None) => Err(ApiError::BadRequest(
                "report must contain outputs or error".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedResponse {
    pub state: StateResponse,
    pub successors: Vec<StateResponse>,
}

impl ExecutedResponse {
    pub fn from_outcome(outcome: ReportOutcome) -> ApiResult<Self> {
        Ok(Self {
            state: StateResponse::from_db_state(outcome.state)?,
            successors: StateResponse::from_db_states(outcome.successors)?,
        })
    }
}

/// GET /namespace/:namespace/states/
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateListResponse {
    pub namespace: String,
    pub count: usize,
    pub states: Vec<StateResponse>,
    pub run_ids: Vec<String>,
}

/// GET /namespace/:namespace/states/run/:run_id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub namespace: String,
    pub run_id: String,
    pub completed: bool,
    pub counts: BTreeMap<String, i64>,
    pub states: Vec<StateResponse>,
}

impl RunResponse {
    pub fn from_summary(namespace: &str, summary: RunSummary) -> ApiResult<Self> {
        Ok(Self {
            namespace: namespace.to_string(),
            run_id: summary.run_id,
            completed: summary.completed,
            counts: summary.counts,
            states: StateResponse::from_db_states(summary.states)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRunResponse {
    pub run_id: String,
    pub cancelled: Vec<String>,
}

/// GET /namespace/:namespace/state/:state_id/secrets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsResponse {
    pub secrets: BTreeMap<String, String>,
}
