//! Health check endpoint handlers

use axum::{extract::State, http::StatusCode, Json};

use crate::api::{models::HealthResponse, response, routes::AppState};

/// Handler for GET /health
///
/// Returns basic health status without database check.
pub async fn health() -> impl axum::response::IntoResponse {
    response::ok(HealthResponse::new("ok", "unknown"))
}

/// Handler for GET /health/db
///
/// Returns health status including database connectivity.
pub async fn health_detailed(State(app_state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match app_state.engine.db().health_check().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse::new("ok", "connected"))),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse::new("error", "error")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_health_is_ok() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
