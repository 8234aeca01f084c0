//! Node descriptor model for database persistence

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered node descriptor row
///
/// Schemas are JSON Schema documents stored as text; `secrets` is a JSON
/// array of secret names the node asks for at execution time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Node {
    /// Isolation boundary
    pub namespace: String,

    /// Node name, unique within the namespace
    pub name: String,

    /// Input JSON Schema (JSON text)
    pub inputs_schema: String,

    /// Output JSON Schema (JSON text)
    pub outputs_schema: String,

    /// Requested secret names (JSON array text)
    pub secrets: String,

    /// First registration timestamp
    pub created_at: String,

    /// Last (re-)registration timestamp
    pub updated_at: String,
}
