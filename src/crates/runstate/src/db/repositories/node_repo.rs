//! Node registry repository

use sqlx::{Executor, Sqlite};

use crate::db::models::Node;

/// Node repository for registry operations
pub struct NodeRepository;

impl NodeRepository {
    /// Insert or overwrite a node descriptor
    ///
    /// Re-registration replaces both schemas and the secret list but keeps the
    /// original `created_at`.
    pub async fn upsert<'e, E>(
        executor: E,
        namespace: &str,
        name: &str,
        inputs_schema: &str,
        outputs_schema: &str,
        secrets: &str,
        now: &str,
    ) -> Result<Node, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, Node>(
            "INSERT INTO nodes (namespace, name, inputs_schema, outputs_schema, secrets, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (namespace, name) DO UPDATE SET
                inputs_schema = excluded.inputs_schema,
                outputs_schema = excluded.outputs_schema,
                secrets = excluded.secrets,
                updated_at = excluded.updated_at
             RETURNING *",
        )
        .bind(namespace)
        .bind(name)
        .bind(inputs_schema)
        .bind(outputs_schema)
        .bind(secrets)
        .bind(now)
        .bind(now)
        .fetch_all(executor)
        .await?;
        rows.into_iter().next().ok_or(sqlx::Error::RowNotFound)
    }

    /// Get a node descriptor by name
    pub async fn get<'e, E>(
        executor: E,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Node>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .fetch_optional(executor)
            .await
    }

    /// List every node registered in a namespace, by name
    pub async fn list<'e, E>(executor: E, namespace: &str) -> Result<Vec<Node>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE namespace = ? ORDER BY name")
            .bind(namespace)
            .fetch_all(executor)
            .await
    }
}
