//! Engine services
//!
//! One service per component: node registry, template store, run
//! coordinator, dequeue, result handler and secret resolution. [`Engine`]
//! wires them over a shared connection pool and engine configuration.

pub mod fanout;
pub mod queue;
pub mod registry;
pub mod results;
pub mod runs;
pub mod secrets;
pub mod templates;

pub use queue::QueueService;
pub use registry::{NodeDescriptor, NodeRegistration, RegistryService};
pub use results::{ExecutionReport, ReportOutcome, ResultService};
pub use runs::{CreateRun, RootState, RunService, RunSummary};
pub use secrets::SecretService;
pub use templates::TemplateService;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::db::DatabaseConnection;

/// Every engine service over one database
#[derive(Debug, Clone)]
pub struct Engine {
    pub registry: RegistryService,
    pub templates: TemplateService,
    pub runs: RunService,
    pub queue: QueueService,
    pub results: ResultService,
    pub secrets: SecretService,
    db: DatabaseConnection,
    config: Arc<EngineConfig>,
}

impl Engine {
    pub fn new(db: DatabaseConnection, config: EngineConfig) -> Self {
        let config = Arc::new(config);
        let registry = RegistryService::new(db.clone());
        let templates = TemplateService::new(db.clone());

        Self {
            runs: RunService::new(db.clone(), config.clone(), registry.clone(), templates.clone()),
            queue: QueueService::new(db.clone(), config.clone()),
            results: ResultService::new(db.clone(), registry.clone(), templates.clone()),
            secrets: SecretService::new(db.clone(), registry.clone(), templates.clone()),
            registry,
            templates,
            db,
            config,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
