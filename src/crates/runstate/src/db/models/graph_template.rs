//! Graph template version model for database persistence

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One stored version of a graph template
///
/// Versions are append-only; the highest `version` for a
/// `(namespace, name)` pair is the current template.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GraphTemplateVersion {
    pub namespace: String,
    pub name: String,

    /// Monotonic per (namespace, name), starting at 1
    pub version: i64,

    /// Vertices and retry policy (JSON text)
    pub definition: String,

    /// Secret name to value map (JSON text)
    pub secrets: String,

    pub created_at: String,
}
