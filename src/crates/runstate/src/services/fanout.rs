//! Successor addressing for fan-out and fan-in
//!
//! A successor is fed by exactly one output set of each of its upstream
//! vertices. For a single upstream that is one successor per output set; for a
//! join it is every combination of finished upstream output sets whose
//! ancestries agree. Each successor carries its full lineage so that later
//! joins and references to non-immediate ancestors can be resolved.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::db::models::State;
use crate::graph::{resolve_inputs, GraphNodeSpec};
use crate::Result;

/// An upstream state whose outputs are known
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    pub state_id: String,
    pub identifier: String,
    pub parents: BTreeMap<String, String>,
    pub branch: BTreeMap<String, usize>,
    pub outputs: Vec<Map<String, Value>>,
}

impl Finished {
    /// From a stored state that already has outputs
    pub fn from_state(state: &State) -> Result<Self> {
        let outputs = state.output_sets()?;
        Self::with_outputs(state, outputs)
    }

    /// From a state whose outputs are being reported right now
    pub fn with_outputs(state: &State, outputs: Vec<Map<String, Value>>) -> Result<Self> {
        Ok(Self {
            state_id: state.id.clone(),
            identifier: state.identifier.clone(),
            parents: state.parents_map()?,
            branch: state.branch_map()?,
            outputs,
        })
    }
}

/// Ancestor identifier to state id and to output index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub parents: BTreeMap<String, String>,
    pub branch: BTreeMap<String, usize>,
}

impl Lineage {
    /// The lineage of a successor fed by output set `index` of `upstream`
    pub fn through(upstream: &Finished, index: usize) -> Self {
        let mut parents = upstream.parents.clone();
        let mut branch = upstream.branch.clone();
        parents.insert(upstream.identifier.clone(), upstream.state_id.clone());
        branch.insert(upstream.identifier.clone(), index);
        Self { parents, branch }
    }

    /// Union of two lineages, `None` when they disagree on a shared ancestor
    pub fn merge(&self, other: &Lineage) -> Option<Lineage> {
        let mut merged = self.clone();

        for (identifier, state_id) in &other.parents {
            match merged.parents.get(identifier) {
                Some(existing) if existing != state_id => return None,
                Some(_) => {}
                None => {
                    merged.parents.insert(identifier.clone(), state_id.clone());
                }
            }
        }
        for (identifier, index) in &other.branch {
            match merged.branch.get(identifier) {
                Some(existing) if existing != index => return None,
                Some(_) => {}
                None => {
                    merged.branch.insert(identifier.clone(), *index);
                }
            }
        }

        Some(merged)
    }
}

/// One upstream output set feeding a successor
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Contribution {
    pub identifier: String,
    pub state_id: String,
    pub output_index: usize,
}

/// The inputs of one successor to materialize
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    pub lineage: Lineage,
    /// Sorted by upstream identifier
    pub contributions: Vec<Contribution>,
}

impl Combination {
    /// Deterministic idempotency key for the successor this combination feeds
    pub fn dedupe_key(&self, run_id: &str, identifier: &str) -> String {
        let sources: Vec<String> = self
            .contributions
            .iter()
            .map(|c| format!("{}={}#{}", c.identifier, c.state_id, c.output_index))
            .collect();
        format!("next:{}:{}:{}", run_id, identifier, sources.join(","))
    }
}

/// Every consistent combination that includes one of `reporter`'s outputs
///
/// `upstream` lists all upstream identifiers of the successor; `others` holds
/// the finished states of every upstream identifier except the reporter's.
/// An upstream with no finished state yet yields no combination: the last
/// upstream to report materializes the join.
pub fn combinations(
    upstream: &[String],
    reporter: &Finished,
    others: &BTreeMap<String, Vec<Finished>>,
) -> Vec<Combination> {
    let mut partial: Vec<Combination> = (0..reporter.outputs.len())
        .map(|index| Combination {
            lineage: Lineage::through(reporter, index),
            contributions: vec![Contribution {
                identifier: reporter.identifier.clone(),
                state_id: reporter.state_id.clone(),
                output_index: index,
            }],
        })
        .collect();

    for identifier in upstream.iter().filter(|u| **u != reporter.identifier) {
        let Some(candidates) = others.get(identifier).filter(|c| !c.is_empty()) else {
            return Vec::new();
        };

        let mut extended = Vec::new();
        for combination in &partial {
            for candidate in candidates {
                for index in 0..candidate.outputs.len() {
                    let Some(lineage) = combination
                        .lineage
                        .merge(&Lineage::through(candidate, index))
                    else {
                        continue;
                    };
                    let mut contributions = combination.contributions.clone();
                    contributions.push(Contribution {
                        identifier: candidate.identifier.clone(),
                        state_id: candidate.state_id.clone(),
                        output_index: index,
                    });
                    extended.push(Combination {
                        lineage,
                        contributions,
                    });
                }
            }
        }
        partial = extended;
    }

    for combination in &mut partial {
        combination.contributions.sort();
    }
    partial
}

/// Resolve a successor vertex's inputs against its lineage
///
/// `outputs_by_state` must hold the output sets of every state named in the
/// lineage that a reference of `spec` points to.
pub fn resolve_successor_inputs(
    spec: &GraphNodeSpec,
    lineage: &Lineage,
    outputs_by_state: &HashMap<String, Vec<Map<String, Value>>>,
) -> std::result::Result<Map<String, Value>, String> {
    resolve_inputs(&spec.inputs, |reference| {
        let state_id = lineage.parents.get(&reference.identifier)?;
        let index = lineage.branch.get(&reference.identifier)?;
        outputs_by_state
            .get(state_id)?
            .get(*index)?
            .get(&reference.field)
            .cloned()
    })
}
