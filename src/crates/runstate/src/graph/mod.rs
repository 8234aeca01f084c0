//! Graph templates: vertex wiring, input references and structural validation

pub mod reference;
pub mod template;
pub mod validate;

pub use reference::{references_in, references_in_inputs, resolve_inputs, Reference};
pub use template::{ancestors_of, upstream_of, GraphDefinition, GraphNodeSpec, GraphTemplate};
pub use validate::{topological_order, validate_definition};
