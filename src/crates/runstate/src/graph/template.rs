//! Graph template types
//!
//! A template is a DAG of vertices ("identifiers"), each instantiating a
//! registered node and wiring static inputs or references to upstream outputs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::executor::RetryConfig;

/// One vertex of a graph template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNodeSpec {
    /// Registered node this vertex runs
    pub node_name: String,

    /// Vertex id, unique within the template
    pub identifier: String,

    /// Static inputs; string values may hold `${{ identifier.field }}` references
    #[serde(default)]
    pub inputs: Map<String, Value>,

    /// Successor vertices
    #[serde(default, alias = "next_nodes")]
    pub next_node_identifiers: Vec<String>,
}

impl GraphNodeSpec {
    pub fn new(identifier: impl Into<String>, node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            identifier: identifier.into(),
            inputs: Map::new(),
            next_node_identifiers: Vec::new(),
        }
    }

    /// Builder method to add a static input or reference
    pub fn with_input(mut self, field: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(field.into(), value);
        self
    }

    /// Builder method to add a successor vertex
    pub fn with_next(mut self, identifier: impl Into<String>) -> Self {
        self.next_node_identifiers.push(identifier.into());
        self
    }
}

/// The user-supplied part of a template (what an upsert carries)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Vertices of the graph
    pub nodes: Vec<GraphNodeSpec>,

    /// Secret values available to the graph's nodes
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Overrides the engine's retry policy for runs of this graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryConfig>,
}

/// A stored, versioned graph template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphTemplate {
    pub namespace: String,
    pub name: String,
    pub version: i64,
    pub nodes: Vec<GraphNodeSpec>,
    pub secrets: BTreeMap<String, String>,
    pub retry_policy: Option<RetryConfig>,
    pub created_at: String,
}

impl GraphTemplate {
    /// Look up a vertex by identifier
    pub fn node(&self, identifier: &str) -> Option<&GraphNodeSpec> {
        self.nodes.iter().find(|n| n.identifier == identifier)
    }

    /// Identifiers that list `identifier` among their successors, sorted
    pub fn upstream(&self, identifier: &str) -> Vec<String> {
        upstream_of(&self.nodes, identifier)
    }

    /// Whether the vertex has no upstream vertices and can start a run
    pub fn is_entry(&self, identifier: &str) -> bool {
        self.upstream(identifier).is_empty()
    }

    /// Effective retry policy, falling back to the engine default
    pub fn retry_policy_or<'a>(&'a self, default: &'a RetryConfig) -> &'a RetryConfig {
        self.retry_policy.as_ref().unwrap_or(default)
    }
}

/// Sorted in-edges of a vertex
pub fn upstream_of(nodes: &[GraphNodeSpec], identifier: &str) -> Vec<String> {
    let mut upstream: Vec<String> = nodes
        .iter()
        .filter(|n| n.next_node_identifiers.iter().any(|next| next == identifier))
        .map(|n| n.identifier.clone())
        .collect();
    upstream.sort();
    upstream.dedup();
    upstream
}

/// Reverse breadth-first walk over in-edges
pub fn ancestors_of(nodes: &[GraphNodeSpec], identifier: &str) -> BTreeSet<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<String> = upstream_of(nodes, identifier).into();

    while let Some(current) = queue.pop_front() {
        if seen.insert(current.clone()) {
            queue.extend(upstream_of(nodes, &current));
        }
    }

    seen
}
