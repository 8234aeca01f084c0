//! Graph template repository
//!
//! Templates are append-only: an upsert stores the next version and readers
//! pick the highest one.

use sqlx::{Executor, Sqlite};

use crate::db::models::GraphTemplateVersion;

/// Graph template repository
pub struct GraphTemplateRepository;

impl GraphTemplateRepository {
    /// Store a new version of a template
    ///
    /// The version number is computed inside the INSERT so concurrent upserts
    /// cannot pick the same one; the primary key rejects the loser. `RETURNING`
    /// rows are drained with `fetch_all` so the insert commits before returning.
    pub async fn insert_version<'e, E>(
        executor: E,
        namespace: &str,
        name: &str,
        definition: &str,
        secrets: &str,
        now: &str,
    ) -> Result<GraphTemplateVersion, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, GraphTemplateVersion>(
            "INSERT INTO graph_templates (namespace, name, version, definition, secrets, created_at)
             SELECT ?, ?, COALESCE(MAX(version), 0) + 1, ?, ?, ?
             FROM graph_templates WHERE namespace = ? AND name = ?
             RETURNING *",
        )
        .bind(namespace)
        .bind(name)
        .bind(definition)
        .bind(secrets)
        .bind(now)
        .bind(namespace)
        .bind(name)
        .fetch_all(executor)
        .await?;
        rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)
    }

    /// Latest version of a template
    pub async fn latest<'e, E>(
        executor: E,
        namespace: &str,
        name: &str,
    ) -> Result<Option<GraphTemplateVersion>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, GraphTemplateVersion>(
            "SELECT * FROM graph_templates WHERE namespace = ? AND name = ?
             ORDER BY version DESC LIMIT 1",
        )
        .bind(namespace)
        .bind(name)
        .fetch_optional(executor)
        .await
    }

    /// A specific version of a template
    pub async fn get_version<'e, E>(
        executor: E,
        namespace: &str,
        name: &str,
        version: i64,
    ) -> Result<Option<GraphTemplateVersion>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, GraphTemplateVersion>(
            "SELECT * FROM graph_templates WHERE namespace = ? AND name = ? AND version = ?",
        )
        .bind(namespace)
        .bind(name)
        .bind(version)
        .fetch_optional(executor)
        .await
    }
}
