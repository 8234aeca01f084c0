//! Node registry DTOs

use serde::{Deserialize, Serialize};

use crate::services::{NodeDescriptor, NodeRegistration};

/// PUT /namespace/:namespace/nodes/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodesRequest {
    pub nodes: Vec<NodeRegistration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodesResponse {
    pub namespace: String,
    pub registered_nodes: Vec<NodeDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeListResponse {
    pub namespace: String,
    pub count: usize,
    pub nodes: Vec<NodeDescriptor>,
}
