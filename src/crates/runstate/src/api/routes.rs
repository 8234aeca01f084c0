//! API route definitions
//!
//! Every engine route lives under `/namespace/:namespace` and sits behind the
//! security middleware; health checks do not.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::api::{handlers, middleware::logging_layer};
use crate::config::{security_middleware, SecurityState};
use crate::services::Engine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub security: Arc<SecurityState>,
}

/// Build the complete API router
pub fn create_router(engine: Engine, security: Arc<SecurityState>) -> Router {
    let app_state = AppState {
        engine,
        security: security.clone(),
    };

    let namespaced = Router::new()
        // Node registry
        .route(
            "/namespace/:namespace/nodes",
            put(handlers::register_nodes).get(handlers::list_nodes),
        )
        .route(
            "/namespace/:namespace/nodes/",
            put(handlers::register_nodes).get(handlers::list_nodes),
        )
        .route("/namespace/:namespace/nodes/:name", get(handlers::get_node))
        // Graph templates
        .route(
            "/namespace/:namespace/graph/:graph_name",
            put(handlers::upsert_graph).get(handlers::get_graph),
        )
        .route(
            "/namespace/:namespace/graph/:graph_name/states/create",
            post(handlers::create_states),
        )
        // Worker protocol
        .route(
            "/namespace/:namespace/states/enqueue",
            post(handlers::enqueue_states),
        )
        .route(
            "/namespace/:namespace/states/:state_id/executed",
            post(handlers::report_executed),
        )
        .route(
            "/namespace/:namespace/state/:state_id/secrets",
            get(handlers::get_state_secrets),
        )
        // Inspection and cancellation
        .route("/namespace/:namespace/states", get(handlers::list_states))
        .route("/namespace/:namespace/states/", get(handlers::list_states))
        .route(
            "/namespace/:namespace/state/:state_id",
            get(handlers::get_state),
        )
        .route(
            "/namespace/:namespace/states/:state_id/cancel",
            post(handlers::cancel_state),
        )
        .route(
            "/namespace/:namespace/states/run/:run_id",
            get(handlers::get_run),
        )
        .route(
            "/namespace/:namespace/states/run/:run_id/cancel",
            post(handlers::cancel_run),
        )
        .route_layer(from_fn_with_state(security, security_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/db", get(handlers::health_detailed))
        .merge(namespaced)
        .layer(logging_layer())
        .with_state(app_state)
}
