//! REST API layer for runstate
//!
//! Namespace-scoped HTTP endpoints for:
//! - Node registration and lookup
//! - Graph template upsert and retrieval
//! - Run creation, state queries and cancellation
//! - Dequeue, result reporting and secret resolution

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use routes::{create_router, AppState};
