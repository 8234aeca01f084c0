//! Database models
//!
//! Row types for the registry, the template store and the state ledger.
//! Timestamps are fixed-width RFC 3339 strings and structured values are JSON
//! text, matching the TEXT columns SQLite stores them in.

pub mod graph_template;
pub mod node;
pub mod state;

pub use graph_template::GraphTemplateVersion;
pub use node::Node;
pub use state::{NewState, State};
