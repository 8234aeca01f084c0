//! Retry/timeout supervisor
//!
//! Runs independently of request handling. Each sweep:
//! 1. moves `QUEUED` states whose lease expired to `TIMEDOUT`;
//! 2. clones every `ERRORED`/`TIMEDOUT` state with attempts left into a fresh
//!    `CREATED` state (delayed by the backoff) and marks it `RETRY_CREATED`;
//! 3. settles `TIMEDOUT` states without attempts left at `ERRORED`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::db::models::{NewState, State};
use crate::db::repositories::StateRepository;
use crate::db::{timestamp, DatabaseConnection};
use crate::executor::RetryConfig;
use crate::services::TemplateService;
use crate::{EngineError, Result, StateStatus};

/// Rows handled per step of one sweep
const SWEEP_LIMIT: i64 = 500;

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    pub retried: usize,
    pub exhausted: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodic lease reclaim and retry scheduling
#[derive(Debug, Clone)]
pub struct RetrySupervisor {
    db: DatabaseConnection,
    config: Arc<EngineConfig>,
    templates: TemplateService,
}

impl RetrySupervisor {
    pub fn new(db: DatabaseConnection, config: EngineConfig) -> Self {
        Self {
            templates: TemplateService::new(db.clone()),
            db,
            config: Arc::new(config),
        }
    }

    /// Run one sweep as of `now`
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let stamp = timestamp(now);

        // 1. Expired leases
        let lease = self.config.lease_timeout();
        let cutoff = timestamp(now - chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero()));
        let message = EngineError::Timeout(format!("no report within {}s", lease.as_secs())).to_string();
        for state in StateRepository::expired_leases(self.db.pool(), &cutoff, SWEEP_LIMIT).await? {
            if StateRepository::record_timeout(self.db.pool(), &state.id, &message, &stamp).await? {
                warn!(
                    namespace = %state.namespace,
                    state_id = %state.id,
                    node = %state.node_name,
                    "State lease expired"
                );
                report.timed_out += 1;
            }
        }

        // 2. Retries
        let mut policies: HashMap<(String, String, i64), RetryConfig> = HashMap::new();
        for state in StateRepository::retryable(self.db.pool(), SWEEP_LIMIT).await? {
            let key = (state.namespace.clone(), state.graph_name.clone(), state.graph_version);
            if !policies.contains_key(&key) {
                let policy = self.policy_for(&state).await;
                policies.insert(key.clone(), policy);
            }
            let delay = policies
                .get(&key)
                .map(|p| p.backoff_delay(state.attempt.max(0) as u32))
                .unwrap_or_default();
            let enqueue_after = timestamp(now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero()));

            if self.retry(&state, enqueue_after, &stamp).await? {
                report.retried += 1;
            }
        }

        // 3. Timeouts with no attempts left
        for state in StateRepository::exhausted_timeouts(self.db.pool(), SWEEP_LIMIT).await? {
            if StateRepository::transition(
                self.db.pool(),
                &state.id,
                StateStatus::Timedout,
                StateStatus::Errored,
                &stamp,
            )
            .await?
            {
                warn!(
                    namespace = %state.namespace,
                    state_id = %state.id,
                    attempt = state.attempt,
                    "Retries exhausted after timeout"
                );
                report.exhausted += 1;
            }
        }

        if !report.is_empty() {
            info!(
                timed_out = report.timed_out,
                retried = report.retried,
                exhausted = report.exhausted,
                "Supervisor sweep"
            );
        }
        Ok(report)
    }

    /// Clone a failed state and mark it `RETRY_CREATED` in one transaction
    async fn retry(&self, failed: &State, enqueue_after: String, now: &str) -> Result<bool> {
        let from = failed.status()?;
        from.ensure_transition(StateStatus::RetryCreated)?;
        let clone = NewState::retry_of(failed, enqueue_after)?;

        let mut tx = self.db.pool().begin().await?;
        if !StateRepository::transition(&mut *tx, &failed.id, from, StateStatus::RetryCreated, now).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        let inserted = StateRepository::insert(&mut *tx, &clone, now).await?;
        tx.commit().await?;

        info!(
            namespace = %failed.namespace,
            state_id = %failed.id,
            retry_id = %clone.id,
            attempt = clone.attempt,
            max_attempts = clone.max_attempts,
            not_before = ?clone.enqueue_after,
            "Scheduled retry"
        );
        if !inserted {
            debug!(state_id = %failed.id, "Retry clone already existed");
        }
        Ok(true)
    }

    async fn policy_for(&self, state: &State) -> RetryConfig {
        let default = self.config.default_retry_policy();
        match self
            .templates
            .get_version(&state.namespace, &state.graph_name, state.graph_version)
            .await
        {
            Ok(template) => template.retry_policy_or(&default).clone(),
            Err(e) => {
                debug!(state_id = %state.id, error = %e, "Using default retry policy");
                default
            }
        }
    }

    /// Sweep every `sweep_interval_secs` until the handle is shut down
    pub fn spawn(self) -> SupervisorHandle {
        let shutdown = Arc::new(Notify::new());
        let stopped = Arc::new(AtomicBool::new(false));
        let interval = self.config.sweep_interval();

        let task = {
            let shutdown = shutdown.clone();
            let stopped = stopped.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                info!(interval_secs = interval.as_secs(), "Retry supervisor started");

                while !stopped.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = self.sweep_once(Utc::now()).await {
                                error!(error = %e, "Supervisor sweep failed");
                            }
                        }
                        _ = shutdown.notified() => break,
                    }
                }

                info!("Retry supervisor stopped");
            })
        };

        SupervisorHandle {
            shutdown,
            stopped,
            task,
        }
    }
}

/// Stops a spawned supervisor
#[derive(Debug)]
pub struct SupervisorHandle {
    shutdown: Arc<Notify>,
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Signal the loop and wait for the current sweep to finish
    pub async fn shutdown(self) {
        self.stopped.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is mid-sweep
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Retry supervisor task ended abnormally");
        }
    }
}
