//! Request validation helpers

use crate::api::error::{ApiError, ApiResult};

/// Longest accepted namespace, graph name, node name or identifier
pub const MAX_NAME_LENGTH: usize = 255;

/// Validate that a required string field is not empty
pub fn validate_not_empty(value: &str, field_name: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::ValidationError(format!("{} cannot be empty", field_name)));
    }
    Ok(())
}

/// Validate a path name: non-empty, bounded, no whitespace
pub fn validate_identifier(value: &str, field_name: &str) -> ApiResult<()> {
    validate_not_empty(value, field_name)?;
    if value.len() > MAX_NAME_LENGTH {
        return Err(ApiError::ValidationError(format!(
            "{} cannot exceed {} characters",
            field_name, MAX_NAME_LENGTH
        )));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ApiError::ValidationError(format!(
            "{} cannot contain whitespace",
            field_name
        )));
    }
    Ok(())
}

/// Validate an enqueue batch size, clamping it to the configured maximum
pub fn validate_batch_size(batch_size: u32, max: u32) -> ApiResult<u32> {
    if batch_size == 0 {
        return Err(ApiError::ValidationError("batch_size must be greater than 0".to_string()));
    }
    Ok(batch_size.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(validate_not_empty("ns", "namespace").is_ok());
        assert!(validate_not_empty("  ", "namespace").is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("my-graph_1", "graph").is_ok());
        assert!(validate_identifier("my graph", "graph").is_err());
        assert!(validate_identifier(&"x".repeat(MAX_NAME_LENGTH + 1), "graph").is_err());
    }

    #[test]
    fn test_validate_batch_size() {
        assert_eq!(validate_batch_size(10, 100).unwrap(), 10);
        assert!(validate_batch_size(0, 100).is_err());
        assert_eq!(validate_batch_size(5_000, 100).unwrap(), 100);
    }
}
