//! Run coordination: trigger, query and cancel runs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::models::{NewState, State};
use crate::db::repositories::StateRepository;
use crate::db::{self, DatabaseConnection};
use crate::graph::references_in_inputs;
use crate::schema::validate_against;
use crate::services::registry::{check_namespace, RegistryService};
use crate::services::templates::TemplateService;
use crate::{EngineError, Result, StateStatus};

/// Default page size for namespace-wide state listings
pub const DEFAULT_STATE_LIMIT: i64 = 500;

/// A root state to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootState {
    pub identifier: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// A run trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRun {
    /// Generated when absent
    #[serde(default)]
    pub run_id: Option<String>,
    pub states: Vec<RootState>,
}

/// Aggregated view of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub states: Vec<State>,
    pub counts: BTreeMap<String, i64>,
    /// No state of the run can make further progress
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct RunService {
    db: DatabaseConnection,
    config: Arc<EngineConfig>,
    registry: RegistryService,
    templates: TemplateService,
}

impl RunService {
    pub fn new(
        db: DatabaseConnection,
        config: Arc<EngineConfig>,
        registry: RegistryService,
        templates: TemplateService,
    ) -> Self {
        Self {
            db,
            config,
            registry,
            templates,
        }
    }

    /// Create the root states of a new run
    ///
    /// Only entry vertices may be created. Inputs are the template's static
    /// inputs overlaid with the request's and must be fully concrete.
    pub async fn create(&self, namespace: &str, graph_name: &str, request: CreateRun) -> Result<(String, Vec<State>)> {
        check_namespace(namespace)?;
        if request.states.is_empty() {
            return Err(EngineError::Validation("states cannot be empty".to_string()));
        }

        let template = self.templates.get(namespace, graph_name).await?;
        let policy = template.retry_policy_or(&self.config.default_retry_policy()).clone();

        let run_id = match request.run_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        if StateRepository::run_exists(self.db.pool(), namespace, &run_id).await? {
            return Err(run_conflict(&run_id));
        }

        let mut problems = Vec::new();
        let mut roots = Vec::with_capacity(request.states.len());
        for root in request.states {
            let Some(spec) = template.node(&root.identifier) else {
                problems.push(format!("unknown identifier '{}'", root.identifier));
                continue;
            };
            if !template.is_entry(&root.identifier) {
                problems.push(format!(
                    "identifier '{}' has upstream nodes and cannot start a run",
                    root.identifier
                ));
                continue;
            }

            let mut inputs = spec.inputs.clone();
            inputs.extend(root.inputs);

            let unresolved = references_in_inputs(&inputs);
            if !unresolved.is_empty() {
                let names: Vec<String> = unresolved.iter().map(ToString::to_string).collect();
                problems.push(format!(
                    "identifier '{}' has unresolved references: {}",
                    root.identifier,
                    names.join(", ")
                ));
                continue;
            }

            let Some(node) = self.registry.find(namespace, &spec.node_name).await? else {
                problems.push(format!(
                    "identifier '{}' uses unregistered node '{}'",
                    root.identifier, spec.node_name
                ));
                continue;
            };
            if let Err(errors) = validate_against(&node.inputs_schema, &inputs) {
                problems.push(format!(
                    "identifier '{}' inputs: {}",
                    root.identifier,
                    errors.join(", ")
                ));
                continue;
            }

            roots.push(NewState::root(
                &run_id,
                namespace,
                graph_name,
                template.version,
                &root.identifier,
                &spec.node_name,
                inputs,
                policy.max_attempts,
            ));
        }
        if !problems.is_empty() {
            return Err(EngineError::Validation(problems.join("; ")));
        }

        // The first root claims the run id; a concurrent create with the
        // same id loses on the dedupe index.
        if let Some(first) = roots.first_mut() {
            first.dedupe_key = Some(format!("run:{}", run_id));
        }

        let now = db::now();
        let mut tx = self.db.pool().begin().await?;
        for root in &roots {
            if !StateRepository::insert(&mut *tx, root, &now).await? {
                tx.rollback().await?;
                return Err(run_conflict(&run_id));
            }
        }
        tx.commit().await?;

        info!(
            namespace = %namespace,
            graph = %graph_name,
            version = template.version,
            run_id = %run_id,
            roots = roots.len(),
            "Created run"
        );

        let states = StateRepository::list_by_run(self.db.pool(), namespace, &run_id).await?;
        Ok((run_id, states))
    }

    /// One state by id
    pub async fn get_state(&self, namespace: &str, state_id: &str) -> Result<State> {
        StateRepository::get(self.db.pool(), namespace, state_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("state '{}'", state_id)))
    }

    /// Recent states of a namespace and every run id seen in it
    pub async fn list(&self, namespace: &str, limit: Option<i64>) -> Result<(Vec<State>, Vec<String>)> {
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_STATE_LIMIT);
        let states = StateRepository::list_by_namespace(self.db.pool(), namespace, limit).await?;
        let run_ids = StateRepository::run_ids(self.db.pool(), namespace).await?;
        Ok((states, run_ids))
    }

    /// Every state of a run plus a per-status summary
    pub async fn get_run(&self, namespace: &str, run_id: &str) -> Result<RunSummary> {
        let states = StateRepository::list_by_run(self.db.pool(), namespace, run_id).await?;
        if states.is_empty() {
            return Err(EngineError::NotFound(format!("run '{}'", run_id)));
        }

        let counts: BTreeMap<String, i64> = StateRepository::status_counts(self.db.pool(), namespace, run_id)
            .await?
            .into_iter()
            .collect();
        let completed = run_completed(&states)?;

        Ok(RunSummary {
            run_id: run_id.to_string(),
            states,
            counts,
            completed,
        })
    }

    /// Cancel one state
    ///
    /// Fails with Conflict when the state already settled or moved on under
    /// the caller.
    pub async fn cancel_state(&self, namespace: &str, state_id: &str) -> Result<State> {
        let state = self.get_state(namespace, state_id).await?;
        let status = state.status()?;
        if !state.is_cancellable()? {
            return Err(EngineError::Conflict(format!(
                "state '{}' is {} and cannot be cancelled",
                state_id, status
            )));
        }

        let won = StateRepository::transition(
            self.db.pool(),
            state_id,
            status,
            StateStatus::Cancelled,
            &db::now(),
        )
        .await?;
        if !won {
            warn!(state_id = %state_id, "Cancel lost a race with another transition");
            return Err(EngineError::Conflict(format!(
                "state '{}' changed status while cancelling",
                state_id
            )));
        }

        info!(namespace = %namespace, state_id = %state_id, from = %status, "Cancelled state");
        self.get_state(namespace, state_id).await
    }

    /// Cancel every cancellable state of a run, returning the ids cancelled
    ///
    /// Repeats until a pass cancels nothing, so a retry cloned by the
    /// supervisor while the run was being cancelled is caught as well.
    pub async fn cancel_run(&self, namespace: &str, run_id: &str) -> Result<Vec<String>> {
        let mut cancelled = Vec::new();
        loop {
            let states = StateRepository::list_by_run(self.db.pool(), namespace, run_id).await?;
            if states.is_empty() {
                return Err(EngineError::NotFound(format!("run '{}'", run_id)));
            }

            let now = db::now();
            let before = cancelled.len();
            for state in &states {
                if !state.is_cancellable()? {
                    continue;
                }
                let status = state.status()?;
                if StateRepository::transition(self.db.pool(), &state.id, status, StateStatus::Cancelled, &now).await? {
                    cancelled.push(state.id.clone());
                }
            }
            if cancelled.len() == before {
                break;
            }
        }

        info!(
            namespace = %namespace,
            run_id = %run_id,
            cancelled = cancelled.len(),
            "Cancelled run"
        );
        Ok(cancelled)
    }
}

fn run_conflict(run_id: &str) -> EngineError {
    EngineError::Conflict(format!("run '{}' already exists", run_id))
}

/// A run is complete when every state settled and no failure awaits a retry
pub fn run_completed(states: &[State]) -> Result<bool> {
    for state in states {
        let status = state.status()?;
        if !status.is_settled() {
            return Ok(false);
        }
        if status == StateStatus::Errored && state.retries_left() {
            return Ok(false);
        }
    }
    Ok(true)
}
