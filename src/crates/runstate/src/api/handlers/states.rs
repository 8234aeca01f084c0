//! State, queue and run endpoint handlers
//!
//! Workers poll `enqueue`, fetch secrets for what they claimed, and report
//! back through `executed`. Everything else is inspection and cancellation.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::api::{
    error::ApiResult,
    middleware::validation::{validate_batch_size, validate_identifier, validate_not_empty},
    models::{
        CancelRunResponse, EnqueueRequest, EnqueueResponse, ExecutedRequest, ExecutedResponse,
        RunResponse, SecretsResponse, StateListQuery, StateListResponse, StateResponse,
    },
    response,
    routes::AppState,
};

/// Claim ready states of the given nodes
///
/// POST /namespace/:namespace/states/enqueue
pub async fn enqueue_states(
    State(app_state): State<AppState>,
    Path(namespace): Path<String>,
    Json(req): Json<EnqueueRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    validate_identifier(&namespace, "namespace")?;
    let batch_size = validate_batch_size(req.batch_size, app_state.engine.config().max_batch_size)?;
    for node in &req.nodes {
        validate_not_empty(node, "nodes")?;
    }

    let states = app_state
        .engine
        .queue
        .enqueue(&namespace, &req.nodes, batch_size)
        .await?;

    Ok(response::ok(EnqueueResponse {
        namespace,
        count: states.len(),
        states: StateResponse::from_db_states(states)?,
    }))
}

/// Report a claimed state's outputs or failure
///
/// POST /namespace/:namespace/states/:state_id/executed
pub async fn report_executed(
    State(app_state): State<AppState>,
    Path((namespace, state_id)): Path<(String, String)>,
    Json(req): Json<ExecutedRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let report = req.into_report()?;
    let outcome = app_state.engine.results.report(&namespace, &state_id, report).await?;
    Ok(response::ok(ExecutedResponse::from_outcome(outcome)?))
}

/// Cancel one state
///
/// POST /namespace/:namespace/states/:state_id/cancel
pub async fn cancel_state(
    State(app_state): State<AppState>,
    Path((namespace, state_id)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let state = app_state.engine.runs.cancel_state(&namespace, &state_id).await?;
    Ok(response::ok(StateResponse::from_db_state(state)?))
}

/// GET /namespace/:namespace/state/:state_id
pub async fn get_state(
    State(app_state): State<AppState>,
    Path((namespace, state_id)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let state = app_state.engine.runs.get_state(&namespace, &state_id).await?;
    Ok(response::ok(StateResponse::from_db_state(state)?))
}

/// Secret values available to a claimed state's node
///
/// GET /namespace/:namespace/state/:state_id/secrets
pub async fn get_state_secrets(
    State(app_state): State<AppState>,
    Path((namespace, state_id)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let secrets = app_state.engine.secrets.for_state(&namespace, &state_id).await?;
    Ok(response::ok(SecretsResponse { secrets }))
}

/// Recent states of a namespace and its run ids
///
/// GET /namespace/:namespace/states/
pub async fn list_states(
    State(app_state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<StateListQuery>,
) -> ApiResult<impl axum::response::IntoResponse> {
    validate_identifier(&namespace, "namespace")?;

    let (states, run_ids) = app_state.engine.runs.list(&namespace, query.limit).await?;

    Ok(response::ok(StateListResponse {
        namespace,
        count: states.len(),
        states: StateResponse::from_db_states(states)?,
        run_ids,
    }))
}

/// GET /namespace/:namespace/states/run/:run_id
pub async fn get_run(
    State(app_state): State<AppState>,
    Path((namespace, run_id)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let summary = app_state.engine.runs.get_run(&namespace, &run_id).await?;
    Ok(response::ok(RunResponse::from_summary(&namespace, summary)?))
}

/// Cancel every cancellable state of a run
///
/// POST /namespace/:namespace/states/run/:run_id/cancel
pub async fn cancel_run(
    State(app_state): State<AppState>,
    Path((namespace, run_id)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let cancelled = app_state.engine.runs.cancel_run(&namespace, &run_id).await?;
    Ok(response::ok(CancelRunResponse { run_id, cancelled }))
}
