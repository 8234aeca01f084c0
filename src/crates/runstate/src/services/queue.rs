//! Claim-and-lease dequeue
//!
//! Candidates are selected oldest first and then claimed one by one with a
//! compare-and-set, so concurrent callers end up with disjoint batches. A
//! caller that loses races tops its batch up from the next candidates.

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::db::models::State;
use crate::db::repositories::StateRepository;
use crate::db::{self, DatabaseConnection};
use crate::services::registry::check_namespace;
use crate::{EngineError, Result};

/// Selection rounds before returning a short batch
const CLAIM_ROUNDS: usize = 3;

/// Hands out `CREATED` states to workers
#[derive(Debug, Clone)]
pub struct QueueService {
    db: DatabaseConnection,
    config: Arc<EngineConfig>,
}

impl QueueService {
    pub fn new(db: DatabaseConnection, config: Arc<EngineConfig>) -> Self {
        Self { db, config }
    }

    /// Claim up to `batch_size` states of the given node names
    ///
    /// Claimed states move to `QUEUED` and their lease starts. The batch is
    /// returned oldest first; an empty batch means nothing is ready.
    pub async fn enqueue(
        &self,
        namespace: &str,
        node_names: &[String],
        batch_size: u32,
    ) -> Result<Vec<State>> {
        check_namespace(namespace)?;
        if node_names.is_empty() {
            return Err(EngineError::Validation("nodes cannot be empty".to_string()));
        }
        if batch_size == 0 {
            return Err(EngineError::Validation("batch_size must be at least 1".to_string()));
        }

        let wanted = batch_size.min(self.config.max_batch_size) as usize;
        let mut claimed: Vec<State> = Vec::with_capacity(wanted);

        for round in 0..CLAIM_ROUNDS {
            let now = db::now();
            let remaining = (wanted - claimed.len()) as i64;
            let candidates = StateRepository::claim_candidates(
                self.db.pool(),
                namespace,
                node_names,
                &now,
                remaining,
            )
            .await?;

            if candidates.is_empty() {
                break;
            }

            let mut lost = 0usize;
            for id in &candidates {
                match StateRepository::claim(self.db.pool(), id, &now).await? {
                    Some(state) => claimed.push(state),
                    None => lost += 1,
                }
            }

            debug!(
                namespace = %namespace,
                round,
                candidates = candidates.len(),
                lost,
                "Claim round finished"
            );

            if claimed.len() >= wanted || lost == 0 {
                break;
            }
        }

        claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        if !claimed.is_empty() {
            info!(
                namespace = %namespace,
                nodes = ?node_names,
                count = claimed.len(),
                "Enqueued states"
            );
        }
        Ok(claimed)
    }
}
