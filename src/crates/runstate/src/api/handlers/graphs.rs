//! Graph template and run trigger endpoint handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::{
    error::ApiResult,
    middleware::validation::validate_identifier,
    models::{CreateStatesRequest, CreateStatesResponse, GraphResponse, StateResponse, UpsertGraphRequest},
    response,
    routes::AppState,
};

/// Store a new version of a graph template
///
/// PUT /namespace/:namespace/graph/:graph_name
pub async fn upsert_graph(
    State(app_state): State<AppState>,
    Path((namespace, graph_name)): Path<(String, String)>,
    Json(req): Json<UpsertGraphRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    validate_identifier(&namespace, "namespace")?;
    validate_identifier(&graph_name, "graph_name")?;

    let template = app_state.engine.templates.upsert(&namespace, &graph_name, req).await?;
    Ok(response::ok(GraphResponse::from(template)))
}

/// Latest version of a graph template
///
/// GET /namespace/:namespace/graph/:graph_name
pub async fn get_graph(
    State(app_state): State<AppState>,
    Path((namespace, graph_name)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let template = app_state.engine.templates.get(&namespace, &graph_name).await?;
    Ok(response::ok(GraphResponse::from(template)))
}

/// Start a run from entry vertices
///
/// POST /namespace/:namespace/graph/:graph_name/states/create
pub async fn create_states(
    State(app_state): State<AppState>,
    Path((namespace, graph_name)): Path<(String, String)>,
    Json(req): Json<CreateStatesRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    validate_identifier(&namespace, "namespace")?;

    let (run_id, states) = app_state.engine.runs.create(&namespace, &graph_name, req).await?;

    Ok(response::created(CreateStatesResponse {
        run_id,
        states: StateResponse::from_db_states(states)?,
    }))
}
