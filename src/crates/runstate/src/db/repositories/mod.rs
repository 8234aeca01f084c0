//! Repository pattern implementations for database access
//!
//! Repositories are stateless unit structs whose associated functions take an
//! executor: the pool for single statements, or `&mut *tx` when the statement
//! must share a transaction with others.

pub mod graph_template_repo;
pub mod node_repo;
pub mod state_repo;

pub use graph_template_repo::GraphTemplateRepository;
pub use node_repo::NodeRepository;
pub use state_repo::StateRepository;
