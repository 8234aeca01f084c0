//! Execution result handling
//!
//! A report moves a `QUEUED` state to `EXECUTED` and, in the same
//! transaction, materializes its successors and settles it at
//! `NEXT_CREATED` or `SUCCESS`. Anything wrong with the outputs or with the
//! successors they would produce is recorded on the state as `ERRORED`
//! instead, leaving the retry decision to the supervisor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::models::{NewState, State};
use crate::db::repositories::StateRepository;
use crate::db::{self, DatabaseConnection};
use crate::graph::{references_in_inputs, GraphTemplate};
use crate::schema::validate_against;
use crate::services::fanout::{combinations, resolve_successor_inputs, Finished};
use crate::services::registry::{NodeDescriptor, RegistryService};
use crate::services::templates::TemplateService;
use crate::{EngineError, Result, StateStatus};

/// What a worker reports for a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionReport {
    /// One output set per fan-out branch; empty means no successors
    Outputs(Vec<Map<String, Value>>),
    /// The node failed
    Error(String),
}

/// Result of a report
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutcome {
    /// The reported state after the report
    pub state: State,
    /// Successors created by this report
    pub successors: Vec<State>,
}

#[derive(Debug, Clone)]
pub struct ResultService {
    db: DatabaseConnection,
    registry: RegistryService,
    templates: TemplateService,
}

impl ResultService {
    pub fn new(db: DatabaseConnection, registry: RegistryService, templates: TemplateService) -> Self {
        Self {
            db,
            registry,
            templates,
        }
    }

    /// Accept a worker's report for a `QUEUED` state
    ///
    /// Stale or duplicate reports (the state is no longer `QUEUED`) fail with
    /// Conflict and change nothing.
    pub async fn report(&self, namespace: &str, state_id: &str, report: ExecutionReport) -> Result<ReportOutcome> {
        let state = StateRepository::get(self.db.pool(), namespace, state_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("state '{}'", state_id)))?;
        ensure_queued(&state)?;

        let outputs = match report {
            ExecutionReport::Error(message) => {
                warn!(
                    namespace = %namespace,
                    state_id = %state_id,
                    node = %state.node_name,
                    error = %message,
                    "Worker reported failure"
                );
                return self.fail(&state, &message).await;
            }
            ExecutionReport::Outputs(outputs) => outputs,
        };

        if let Err(message) = self.check_outputs(&state, &outputs).await? {
            return self.fail(&state, &message).await;
        }

        let template = self
            .templates
            .get_version(namespace, &state.graph_name, state.graph_version)
            .await?;
        let successor_nodes = self.successor_nodes(&template, &state).await?;

        let now = db::now();
        let mut tx = self.db.pool().begin().await?;

        // Writing first takes the database write lock for the whole
        // transaction, so the join lookups below see every committed report.
        let outputs_json = serde_json::to_string(&outputs)?;
        if !StateRepository::record_outputs(&mut *tx, &state.id, &outputs_json, &now).await? {
            tx.rollback().await?;
            return Err(stale_report(&state.id));
        }

        let next: Vec<String> = template
            .node(&state.identifier)
            .map(|spec| dedup(&spec.next_node_identifiers))
            .unwrap_or_default();

        if next.is_empty() || outputs.is_empty() {
            StateRepository::transition(&mut *tx, &state.id, StateStatus::Executed, StateStatus::Success, &now)
                .await?;
            tx.commit().await?;
            info!(
                namespace = %namespace,
                state_id = %state.id,
                outputs = outputs.len(),
                "State succeeded"
            );
            return self.outcome(namespace, &state.id, Vec::new()).await;
        }

        let reporter = Finished::with_outputs(&state, outputs)?;
        let mut planned: Vec<NewState> = Vec::new();
        let mut failure: Option<String> = None;

        'next: for identifier in &next {
            let Some(spec) = template.node(identifier) else {
                failure = Some(format!("next node '{}' is not in the template", identifier));
                break;
            };
            let Some(node) = successor_nodes.get(&spec.node_name) else {
                failure = Some(format!(
                    "next node '{}' uses unregistered node '{}'",
                    identifier, spec.node_name
                ));
                break;
            };

            let upstream = template.upstream(identifier);
            let mut others: BTreeMap<String, Vec<Finished>> = BTreeMap::new();
            for upstream_id in upstream.iter().filter(|u| **u != state.identifier) {
                let finished = StateRepository::finished_for_identifier(
                    &mut *tx,
                    namespace,
                    &state.run_id,
                    upstream_id,
                )
                .await?;
                let finished = finished
                    .iter()
                    .map(Finished::from_state)
                    .collect::<Result<Vec<_>>>()?;
                others.insert(upstream_id.clone(), finished);
            }

            let combos = combinations(&upstream, &reporter, &others);
            if combos.is_empty() {
                debug!(
                    state_id = %state.id,
                    next = %identifier,
                    "Join still waiting for upstream outputs"
                );
                continue;
            }

            let mut outputs_by_state: HashMap<String, Vec<Map<String, Value>>> = HashMap::new();
            outputs_by_state.insert(reporter.state_id.clone(), reporter.outputs.clone());
            for finished in others.values().flatten() {
                outputs_by_state.insert(finished.state_id.clone(), finished.outputs.clone());
            }

            // Non-immediate ancestors referenced by the successor's inputs
            let mut missing: Vec<String> = Vec::new();
            for combo in &combos {
                for reference in references_in_inputs(&spec.inputs) {
                    if let Some(id) = combo.lineage.parents.get(&reference.identifier) {
                        if !outputs_by_state.contains_key(id) && !missing.contains(id) {
                            missing.push(id.clone());
                        }
                    }
                }
            }
            for ancestor in StateRepository::get_many(&mut *tx, &missing).await? {
                outputs_by_state.insert(ancestor.id.clone(), ancestor.output_sets()?);
            }

            for combo in &combos {
                let inputs = match resolve_successor_inputs(spec, &combo.lineage, &outputs_by_state) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        failure = Some(format!("next node '{}': {}", identifier, e));
                        break 'next;
                    }
                };
                if let Err(errors) = validate_against(&node.inputs_schema, &inputs) {
                    failure = Some(format!(
                        "next node '{}' inputs: {}",
                        identifier,
                        errors.join(", ")
                    ));
                    break 'next;
                }

                planned.push(NewState {
                    id: Uuid::new_v4().to_string(),
                    run_id: state.run_id.clone(),
                    namespace: state.namespace.clone(),
                    graph_name: state.graph_name.clone(),
                    graph_version: state.graph_version,
                    identifier: identifier.clone(),
                    node_name: spec.node_name.clone(),
                    inputs,
                    parents: combo.lineage.parents.clone(),
                    branch: combo.lineage.branch.clone(),
                    attempt: 0,
                    max_attempts: state.max_attempts,
                    retry_of: None,
                    dedupe_key: Some(combo.dedupe_key(&state.run_id, identifier)),
                    enqueue_after: None,
                });
            }
        }

        if let Some(message) = failure {
            tx.rollback().await?;
            return self.fail(&state, &message).await;
        }

        let mut created = Vec::with_capacity(planned.len());
        for successor in &planned {
            if StateRepository::insert(&mut *tx, successor, &now).await? {
                created.push(successor.id.clone());
            } else {
                debug!(
                    dedupe_key = ?successor.dedupe_key,
                    "Successor already materialized"
                );
            }
        }

        StateRepository::transition(&mut *tx, &state.id, StateStatus::Executed, StateStatus::NextCreated, &now)
            .await?;
        tx.commit().await?;

        info!(
            namespace = %namespace,
            state_id = %state.id,
            outputs = reporter.outputs.len(),
            successors = created.len(),
            "State executed"
        );
        self.outcome(namespace, &state.id, created).await
    }

    /// Inner `Err` carries the problem to record on the state
    async fn check_outputs(
        &self,
        state: &State,
        outputs: &[Map<String, Value>],
    ) -> Result<std::result::Result<(), String>> {
        let Some(node) = self.registry.find(&state.namespace, &state.node_name).await? else {
            return Ok(Err(format!("node '{}' is not registered", state.node_name)));
        };

        for (index, output) in outputs.iter().enumerate() {
            if let Err(errors) = validate_against(&node.outputs_schema, output) {
                return Ok(Err(format!(
                    "output set {} does not match outputs_schema: {}",
                    index,
                    errors.join(", ")
                )));
            }
        }
        Ok(Ok(()))
    }

    /// Descriptors of the nodes the state's successors run, keyed by name
    async fn successor_nodes(
        &self,
        template: &GraphTemplate,
        state: &State,
    ) -> Result<HashMap<String, NodeDescriptor>> {
        let mut nodes = HashMap::new();
        let Some(spec) = template.node(&state.identifier) else {
            return Ok(nodes);
        };

        for identifier in &spec.next_node_identifiers {
            let Some(next) = template.node(identifier) else {
                continue;
            };
            if nodes.contains_key(&next.node_name) {
                continue;
            }
            if let Some(node) = self.registry.find(&state.namespace, &next.node_name).await? {
                nodes.insert(next.node_name.clone(), node);
            }
        }
        Ok(nodes)
    }

    /// Record an execution error: `QUEUED -> ERRORED`
    async fn fail(&self, state: &State, message: &str) -> Result<ReportOutcome> {
        let error = EngineError::Execution(message.to_string()).to_string();
        let won = StateRepository::record_error(
            self.db.pool(),
            &state.id,
            StateStatus::Queued,
            &error,
            &db::now(),
        )
        .await?;
        if !won {
            return Err(stale_report(&state.id));
        }

        let retry = if state.retries_left() { "pending" } else { "exhausted" };
        warn!(
            namespace = %state.namespace,
            state_id = %state.id,
            attempt = state.attempt,
            retry,
            error = %message,
            "State errored"
        );
        self.outcome(&state.namespace, &state.id, Vec::new()).await
    }

    async fn outcome(&self, namespace: &str, state_id: &str, created: Vec<String>) -> Result<ReportOutcome> {
        let state = StateRepository::get(self.db.pool(), namespace, state_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("state '{}'", state_id)))?;

        let mut successors = StateRepository::get_many(self.db.pool(), &created).await?;
        successors.sort_by(|a, b| {
            a.identifier
                .cmp(&b.identifier)
                .then_with(|| a.dedupe_key.cmp(&b.dedupe_key))
        });

        Ok(ReportOutcome { state, successors })
    }
}

fn ensure_queued(state: &State) -> Result<()> {
    let status = state.status()?;
    if status != StateStatus::Queued {
        warn!(
            state_id = %state.id,
            status = %status,
            "Rejected report for state that is not QUEUED"
        );
        return Err(EngineError::Conflict(format!(
            "state '{}' is {}, expected QUEUED",
            state.id, status
        )));
    }
    Ok(())
}

fn stale_report(state_id: &str) -> EngineError {
    EngineError::Conflict(format!("state '{}' was already reported or cancelled", state_id))
}

fn dedup(identifiers: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        if !seen.contains(identifier) {
            seen.push(identifier.clone());
        }
    }
    seen
}
