//! API request handlers
//!
//! Handlers are grouped by resource.

pub mod graphs;
pub mod health;
pub mod nodes;
pub mod states;

pub use graphs::{create_states, get_graph, upsert_graph};
pub use health::{health, health_detailed};
pub use nodes::{get_node, list_nodes, register_nodes};
pub use states::{
    cancel_run, cancel_state, enqueue_states, get_run, get_state, get_state_secrets,
    list_states, report_executed,
};
