//! API middleware layer
//!
//! Request tracing and request validation helpers. Authentication lives with
//! its configuration in [`crate::config::server::security`].

pub mod logging;
pub mod validation;

pub use logging::logging_layer;
pub use validation::{validate_batch_size, validate_identifier, validate_not_empty};
