//! Structural validation of graph templates
//!
//! Runs at upsert time. Every problem found is collected so the caller can fix
//! a template in one round trip.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::reference::references_in_inputs;
use super::template::{ancestors_of, GraphDefinition};

/// Validate a template definition, returning every problem found
pub fn validate_definition(definition: &GraphDefinition) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if definition.nodes.is_empty() {
        errors.push("graph template must contain at least one node".to_string());
        return Err(errors);
    }

    let mut identifiers = BTreeSet::new();
    for node in &definition.nodes {
        if node.identifier.trim().is_empty() {
            errors.push(format!("node '{}' has an empty identifier", node.node_name));
        } else if !identifiers.insert(node.identifier.as_str()) {
            errors.push(format!("duplicate identifier '{}'", node.identifier));
        }
        if node.node_name.trim().is_empty() {
            errors.push(format!("identifier '{}' has an empty node_name", node.identifier));
        }
    }

    for node in &definition.nodes {
        for next in &node.next_node_identifiers {
            if next == &node.identifier {
                errors.push(format!("identifier '{}' lists itself as next node", next));
            } else if !identifiers.contains(next.as_str()) {
                errors.push(format!(
                    "identifier '{}' points to unknown next node '{}'",
                    node.identifier, next
                ));
            }
        }
    }

    for name in definition.secrets.keys() {
        if name.trim().is_empty() {
            errors.push("secret names cannot be empty".to_string());
        }
    }

    if let Some(policy) = &definition.retry_policy {
        if let Err(e) = policy.validate() {
            errors.push(e);
        }
    }

    // Cycle and reference checks need a well-formed edge set
    if !errors.is_empty() {
        return Err(errors);
    }

    if let Err(cycle) = topological_order(definition) {
        errors.push(format!(
            "graph template contains a cycle through: {}",
            cycle.join(", ")
        ));
        return Err(errors);
    }

    for node in &definition.nodes {
        let ancestors = ancestors_of(&definition.nodes, &node.identifier);
        for reference in references_in_inputs(&node.inputs) {
            if !identifiers.contains(reference.identifier.as_str()) {
                errors.push(format!(
                    "identifier '{}' references unknown identifier in {}",
                    node.identifier, reference
                ));
            } else if !ancestors.contains(&reference.identifier) {
                errors.push(format!(
                    "identifier '{}' references {} which is not upstream of it",
                    node.identifier, reference
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Kahn's algorithm. Returns the identifiers left in a cycle on failure.
pub fn topological_order(definition: &GraphDefinition) -> Result<Vec<String>, Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = definition
        .nodes
        .iter()
        .map(|n| (n.identifier.as_str(), 0))
        .collect();

    for node in &definition.nodes {
        let unique: BTreeSet<&str> = node.next_node_identifiers.iter().map(String::as_str).collect();
        for next in unique {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree += 1;
            }
        }
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(definition.nodes.len());

    while let Some(current) = ready.pop_front() {
        order.push(current.to_string());
        let Some(node) = definition.nodes.iter().find(|n| n.identifier == current) else {
            continue;
        };
        let unique: BTreeSet<&str> = node.next_node_identifiers.iter().map(String::as_str).collect();
        for next in unique {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(next);
                }
            }
        }
    }

    if order.len() == in_degree.len() {
        Ok(order)
    } else {
        Err(in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect())
    }
}
