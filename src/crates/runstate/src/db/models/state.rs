//! State model for database persistence

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{EngineError, Result, StateStatus};

/// One instantiated execution of a template vertex
///
/// Rows are never deleted; every retry is a new row pointing back through
/// `retry_of`.
///
/// # JSON columns
/// `inputs` is an object, `outputs` an array of objects (one per fan-out
/// output set), `parents` maps ancestor identifier to state id and `branch`
/// maps ancestor identifier to the output index that fed this chain.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct State {
    /// Unique state id (UUID string)
    pub id: String,

    /// Run grouping key shared by every state of one triggered execution
    pub run_id: String,

    pub namespace: String,

    pub graph_name: String,

    /// Template version the run was created from
    pub graph_version: i64,

    /// Vertex of the template this state instantiates
    pub identifier: String,

    pub node_name: String,

    /// Current status, stored in its SCREAMING_SNAKE_CASE form
    pub status: String,

    /// Resolved inputs (JSON object text)
    pub inputs: String,

    /// Reported output sets (JSON array text)
    pub outputs: Option<String>,

    /// Reported or recorded error message
    pub error: Option<String>,

    /// Ancestor identifier to state id (JSON object text)
    pub parents: String,

    /// Ancestor identifier to output index (JSON object text)
    pub branch: String,

    /// 0 for the original state, +1 for each retry
    pub attempt: i64,

    /// Attempt budget snapshotted when the chain started
    pub max_attempts: i64,

    /// State this one retries
    pub retry_of: Option<String>,

    /// Idempotency key for successor and retry materialization
    pub dedupe_key: Option<String>,

    /// Not claimable before this timestamp (retry backoff)
    pub enqueue_after: Option<String>,

    /// Lease start, set by the dequeue claim
    pub queued_at: Option<String>,

    pub created_at: String,

    pub updated_at: String,
}

impl State {
    /// Parsed status
    pub fn status(&self) -> Result<StateStatus> {
        self.status.parse()
    }

    /// Parsed inputs object
    pub fn inputs_map(&self) -> Result<Map<String, Value>> {
        Ok(serde_json::from_str(&self.inputs)?)
    }

    /// Parsed output sets; empty until the state has been executed
    pub fn output_sets(&self) -> Result<Vec<Map<String, Value>>> {
        match &self.outputs {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Parsed ancestor identifier to state id map
    pub fn parents_map(&self) -> Result<BTreeMap<String, String>> {
        Ok(serde_json::from_str(&self.parents)?)
    }

    /// Parsed ancestor identifier to output index map
    pub fn branch_map(&self) -> Result<BTreeMap<String, usize>> {
        Ok(serde_json::from_str(&self.branch)?)
    }

    /// Whether the chain this state belongs to may still be retried
    pub fn retries_left(&self) -> bool {
        self.attempt.saturating_add(1) < self.max_attempts
    }

    /// Whether a cancellation may target this state
    ///
    /// A failure with attempts left is still pending a retry and can be
    /// cancelled; an exhausted one is final.
    pub fn is_cancellable(&self) -> Result<bool> {
        let status = self.status()?;
        Ok(match status {
            StateStatus::Errored => self.retries_left(),
            _ => status.is_cancellable(),
        })
    }
}

/// A state about to be inserted
#[derive(Debug, Clone)]
pub struct NewState {
    pub id: String,
    pub run_id: String,
    pub namespace: String,
    pub graph_name: String,
    pub graph_version: i64,
    pub identifier: String,
    pub node_name: String,
    pub inputs: Map<String, Value>,
    pub parents: BTreeMap<String, String>,
    pub branch: BTreeMap<String, usize>,
    pub attempt: i64,
    pub max_attempts: i64,
    pub retry_of: Option<String>,
    pub dedupe_key: Option<String>,
    pub enqueue_after: Option<String>,
}

impl NewState {
    /// A run-root state with a fresh id
    #[allow(clippy::too_many_arguments)]
    pub fn root(
        run_id: &str,
        namespace: &str,
        graph_name: &str,
        graph_version: i64,
        identifier: &str,
        node_name: &str,
        inputs: Map<String, Value>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            namespace: namespace.to_string(),
            graph_name: graph_name.to_string(),
            graph_version,
            identifier: identifier.to_string(),
            node_name: node_name.to_string(),
            inputs,
            parents: BTreeMap::new(),
            branch: BTreeMap::new(),
            attempt: 0,
            max_attempts: i64::from(max_attempts),
            retry_of: None,
            dedupe_key: None,
            enqueue_after: None,
        }
    }

    /// A fresh `CREATED` clone of a failed or timed-out state
    pub fn retry_of(failed: &State, enqueue_after: String) -> Result<Self> {
        if !failed.retries_left() {
            return Err(EngineError::Validation(format!(
                "state {} has no attempts left",
                failed.id
            )));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            run_id: failed.run_id.clone(),
            namespace: failed.namespace.clone(),
            graph_name: failed.graph_name.clone(),
            graph_version: failed.graph_version,
            identifier: failed.identifier.clone(),
            node_name: failed.node_name.clone(),
            inputs: failed.inputs_map()?,
            parents: failed.parents_map()?,
            branch: failed.branch_map()?,
            attempt: failed.attempt + 1,
            max_attempts: failed.max_attempts,
            retry_of: Some(failed.id.clone()),
            dedupe_key: Some(format!("retry:{}", failed.id)),
            enqueue_after: Some(enqueue_after),
        })
    }
}
