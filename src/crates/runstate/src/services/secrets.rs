//! Secret resolution
//!
//! A node only sees the secrets it asked for at registration that its graph
//! also declares. Values are read from the latest template version, so a
//! rotated secret takes effect on the next execution.

use std::collections::BTreeMap;
use tracing::debug;

use crate::db::repositories::StateRepository;
use crate::db::DatabaseConnection;
use crate::services::registry::RegistryService;
use crate::services::templates::TemplateService;
use crate::{EngineError, Result, StateStatus};

#[derive(Debug, Clone)]
pub struct SecretService {
    db: DatabaseConnection,
    registry: RegistryService,
    templates: TemplateService,
}

impl SecretService {
    pub fn new(db: DatabaseConnection, registry: RegistryService, templates: TemplateService) -> Self {
        Self {
            db,
            registry,
            templates,
        }
    }

    /// Secrets declared by the graph and requested by the caller
    pub async fn resolve(
        &self,
        namespace: &str,
        graph_name: &str,
        requested: &[String],
    ) -> Result<BTreeMap<String, String>> {
        let template = self.templates.get(namespace, graph_name).await?;
        Ok(template
            .secrets
            .into_iter()
            .filter(|(name, _)| requested.contains(name))
            .collect())
    }

    /// Secrets for the worker currently holding a state's lease
    pub async fn for_state(&self, namespace: &str, state_id: &str) -> Result<BTreeMap<String, String>> {
        let state = StateRepository::get(self.db.pool(), namespace, state_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("state '{}'", state_id)))?;

        let status = state.status()?;
        if status != StateStatus::Queued {
            return Err(EngineError::Conflict(format!(
                "secrets are only served for QUEUED states, state '{}' is {}",
                state_id, status
            )));
        }

        let node = self.registry.get(namespace, &state.node_name).await?;
        let secrets = self.resolve(namespace, &state.graph_name, &node.secrets).await?;

        debug!(
            namespace = %namespace,
            state_id = %state_id,
            count = secrets.len(),
            "Resolved secrets"
        );
        Ok(secrets)
    }
}
