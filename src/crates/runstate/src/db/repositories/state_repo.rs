//! State ledger repository
//!
//! Every status change is a compare-and-set: an `UPDATE ... WHERE id = ? AND
//! status = ?` whose affected-row count tells the caller whether it won.

use sqlx::{Executor, Sqlite};

use crate::db::models::{NewState, State};
use crate::StateStatus;

/// Statuses whose outputs can feed a successor
const FINISHED: &str = "('EXECUTED', 'NEXT_CREATED')";

/// State repository for ledger operations
pub struct StateRepository;

impl StateRepository {
    /// Insert a new `CREATED` state
    ///
    /// Returns `false` when a state with the same dedupe key already exists in
    /// the namespace, in which case nothing is written.
    pub async fn insert<'e, E>(executor: E, state: &NewState, now: &str) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let inputs = serde_json::to_string(&state.inputs).unwrap_or_else(|_| "{}".to_string());
        let parents = serde_json::to_string(&state.parents).unwrap_or_else(|_| "{}".to_string());
        let branch = serde_json::to_string(&state.branch).unwrap_or_else(|_| "{}".to_string());

        let result = sqlx::query(
            "INSERT INTO states (
                id, run_id, namespace, graph_name, graph_version, identifier, node_name,
                status, inputs, parents, branch, attempt, max_attempts, retry_of,
                dedupe_key, enqueue_after, created_at, updated_at
             )
             VALUES (?, ?, ?, ?, ?, ?, ?, 'CREATED', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (namespace, dedupe_key) DO NOTHING",
        )
        .bind(&state.id)
        .bind(&state.run_id)
        .bind(&state.namespace)
        .bind(&state.graph_name)
        .bind(state.graph_version)
        .bind(&state.identifier)
        .bind(&state.node_name)
        .bind(inputs)
        .bind(parents)
        .bind(branch)
        .bind(state.attempt)
        .bind(state.max_attempts)
        .bind(&state.retry_of)
        .bind(&state.dedupe_key)
        .bind(&state.enqueue_after)
        .bind(now)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a state by id within a namespace
    pub async fn get<'e, E>(executor: E, namespace: &str, id: &str) -> Result<Option<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, State>("SELECT * FROM states WHERE namespace = ? AND id = ?")
            .bind(namespace)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Get several states by id, in no particular order
    pub async fn get_many<'e, E>(executor: E, ids: &[String]) -> Result<Vec<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT * FROM states WHERE id IN ({})", placeholders(ids.len()));
        let mut query = sqlx::query_as::<_, State>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.fetch_all(executor).await
    }

    /// States of a namespace, newest first
    pub async fn list_by_namespace<'e, E>(
        executor: E,
        namespace: &str,
        limit: i64,
    ) -> Result<Vec<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, State>(
            "SELECT * FROM states WHERE namespace = ?
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(namespace)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// States of one run, in creation order
    pub async fn list_by_run<'e, E>(
        executor: E,
        namespace: &str,
        run_id: &str,
    ) -> Result<Vec<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, State>(
            "SELECT * FROM states WHERE namespace = ? AND run_id = ?
             ORDER BY created_at, id",
        )
        .bind(namespace)
        .bind(run_id)
        .fetch_all(executor)
        .await
    }

    /// Distinct run ids of a namespace, most recently started first
    pub async fn run_ids<'e, E>(executor: E, namespace: &str) -> Result<Vec<String>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, String>(
            "SELECT run_id FROM states WHERE namespace = ?
             GROUP BY run_id ORDER BY MIN(created_at) DESC",
        )
        .bind(namespace)
        .fetch_all(executor)
        .await
    }

    /// Whether any state already uses `run_id` in the namespace
    pub async fn run_exists<'e, E>(executor: E, namespace: &str, run_id: &str) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM states WHERE namespace = ? AND run_id = ? LIMIT 1",
        )
        .bind(namespace)
        .bind(run_id)
        .fetch_optional(executor)
        .await?;

        Ok(found.is_some())
    }

    /// Ids of claimable states, oldest first
    ///
    /// Candidates are `CREATED`, of one of `node_names`, and past their
    /// `enqueue_after`. Selecting is not claiming: callers must still win
    /// [`StateRepository::claim`] per id.
    pub async fn claim_candidates<'e, E>(
        executor: E,
        namespace: &str,
        node_names: &[String],
        now: &str,
        limit: i64,
    ) -> Result<Vec<String>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if node_names.is_empty() || limit <= 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id FROM states
             WHERE namespace = ? AND status = 'CREATED' AND node_name IN ({})
               AND (enqueue_after IS NULL OR enqueue_after <= ?)
             ORDER BY created_at, id
             LIMIT ?",
            placeholders(node_names.len())
        );

        let mut query = sqlx::query_scalar::<_, String>(&sql).bind(namespace);
        for name in node_names {
            query = query.bind(name);
        }
        query.bind(now).bind(limit).fetch_all(executor).await
    }

    /// Claim one state: `CREATED -> QUEUED`, starting its lease
    ///
    /// Returns the claimed row, or `None` when another caller got there first.
    /// The statement is drained with `fetch_all` so the write is stepped to
    /// completion and committed before the row is handed back.
    pub async fn claim<'e, E>(executor: E, id: &str, now: &str) -> Result<Option<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, State>(
            "UPDATE states SET status = 'QUEUED', queued_at = ?, updated_at = ?
             WHERE id = ? AND status = 'CREATED'
             RETURNING *",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().next())
    }

    /// Compare-and-set a status change
    pub async fn transition<'e, E>(
        executor: E,
        id: &str,
        from: StateStatus,
        to: StateStatus,
        now: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("UPDATE states SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(now)
            .bind(id)
            .bind(from.as_str())
            .execute(executor)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// `QUEUED -> EXECUTED`, storing the reported output sets
    pub async fn record_outputs<'e, E>(
        executor: E,
        id: &str,
        outputs: &str,
        now: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE states SET status = 'EXECUTED', outputs = ?, updated_at = ?
             WHERE id = ? AND status = 'QUEUED'",
        )
        .bind(outputs)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// `from -> ERRORED`, storing the error message
    pub async fn record_error<'e, E>(
        executor: E,
        id: &str,
        from: StateStatus,
        error: &str,
        now: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE states SET status = 'ERRORED', error = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .bind(from.as_str())
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// `QUEUED -> TIMEDOUT` for an expired lease
    pub async fn record_timeout<'e, E>(executor: E, id: &str, error: &str, now: &str) -> Result<bool, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE states SET status = 'TIMEDOUT', error = ?, updated_at = ?
             WHERE id = ? AND status = 'QUEUED'",
        )
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Finished states of one vertex in a run, usable as join inputs
    pub async fn finished_for_identifier<'e, E>(
        executor: E,
        namespace: &str,
        run_id: &str,
        identifier: &str,
    ) -> Result<Vec<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT * FROM states
             WHERE namespace = ? AND run_id = ? AND identifier = ? AND status IN {}
             ORDER BY created_at, id",
            FINISHED
        );

        sqlx::query_as::<_, State>(&sql)
            .bind(namespace)
            .bind(run_id)
            .bind(identifier)
            .fetch_all(executor)
            .await
    }

    /// `QUEUED` states whose lease started before `cutoff`
    pub async fn expired_leases<'e, E>(executor: E, cutoff: &str, limit: i64) -> Result<Vec<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, State>(
            "SELECT * FROM states WHERE status = 'QUEUED' AND queued_at < ?
             ORDER BY queued_at LIMIT ?",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// `ERRORED` and `TIMEDOUT` states whose chain still has attempts left
    pub async fn retryable<'e, E>(executor: E, limit: i64) -> Result<Vec<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, State>(
            "SELECT * FROM states
             WHERE status IN ('ERRORED', 'TIMEDOUT') AND attempt + 1 < max_attempts
             ORDER BY updated_at LIMIT ?",
        )
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// `TIMEDOUT` states whose chain has no attempts left
    pub async fn exhausted_timeouts<'e, E>(executor: E, limit: i64) -> Result<Vec<State>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, State>(
            "SELECT * FROM states
             WHERE status = 'TIMEDOUT' AND attempt + 1 >= max_attempts
             ORDER BY updated_at LIMIT ?",
        )
        .bind(limit)
        .fetch_all(executor)
        .await
    }

    /// Number of states per status within a run
    pub async fn status_counts<'e, E>(
        executor: E,
        namespace: &str,
        run_id: &str,
    ) -> Result<Vec<(String, i64)>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM states WHERE namespace = ? AND run_id = ?
             GROUP BY status ORDER BY status",
        )
        .bind(namespace)
        .bind(run_id)
        .fetch_all(executor)
        .await
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
