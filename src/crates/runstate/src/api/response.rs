//! API response helpers
//!
//! Engine endpoints answer with the bare JSON document; these helpers only
//! pair it with the right status code.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

/// Create a 200 OK JSON response
pub fn ok<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// Create a 201 Created JSON response
pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_codes() {
        assert_eq!(ok(json!({})).into_response().status(), StatusCode::OK);
        assert_eq!(created(json!({})).into_response().status(), StatusCode::CREATED);
    }
}
