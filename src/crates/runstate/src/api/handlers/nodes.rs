//! Node registry endpoint handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::{
    error::ApiResult,
    middleware::validation::validate_identifier,
    models::{NodeListResponse, RegisterNodesRequest, RegisterNodesResponse},
    response,
    routes::AppState,
};

/// Register or update node descriptors
///
/// PUT /namespace/:namespace/nodes/
pub async fn register_nodes(
    State(app_state): State<AppState>,
    Path(namespace): Path<String>,
    Json(req): Json<RegisterNodesRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    validate_identifier(&namespace, "namespace")?;

    let registered = app_state.engine.registry.register(&namespace, req.nodes).await?;

    Ok(response::ok(RegisterNodesResponse {
        namespace,
        registered_nodes: registered,
    }))
}

/// List registered nodes
///
/// GET /namespace/:namespace/nodes/
pub async fn list_nodes(
    State(app_state): State<AppState>,
    Path(namespace): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    validate_identifier(&namespace, "namespace")?;

    let nodes = app_state.engine.registry.list(&namespace).await?;

    Ok(response::ok(NodeListResponse {
        namespace,
        count: nodes.len(),
        nodes,
    }))
}

/// Get one node descriptor
///
/// GET /namespace/:namespace/nodes/:name
pub async fn get_node(
    State(app_state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let node = app_state.engine.registry.get(&namespace, &name).await?;
    Ok(response::ok(node))
}
