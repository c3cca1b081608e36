//! Query execution.
//!
//! Every query borrows exactly one connection from its backend's pool. The
//! borrowed `PoolConnection` goes back to that pool when it is dropped, which
//! happens on every exit path: success, error, panic or cancellation of the
//! request future.
//!
//! The SQL text is passed through untouched. Validation, sanitization and
//! access control are the caller's responsibility.
//!
//! # Architecture
//!
//! Database-specific fetching lives in the `postgres`, `mysql` and `sqlite`
//! submodules; row conversion goes through [`RowToJson`].

use crate::config::ProbePolicy;
use crate::db::pool::DbPool;
use crate::db::types::RowToJson;
use crate::error::{ExtensionError, ExtensionResult};
use crate::models::{QueryParam, QueryRequest, QueryResult};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs SQL against a pool and performs connectivity probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute `sql` with positional `params` and return every row.
    pub async fn execute(
        &self,
        pool: &DbPool,
        sql: &str,
        params: &[QueryParam],
    ) -> ExtensionResult<QueryResult> {
        let start = Instant::now();

        debug!(sql = %sql, params = params.len(), "Executing query");

        let result = match pool {
            DbPool::Postgres(p) => postgres::fetch_rows(p, sql, params)
                .await
                .map(|rows| to_result(&rows)),
            DbPool::MySql(p) => mysql::fetch_rows(p, sql, params)
                .await
                .map(|rows| to_result(&rows)),
            DbPool::SQLite(p) => sqlite::fetch_rows(p, sql, params)
                .await
                .map(|rows| to_result(&rows)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                info!(
                    sql = %sql,
                    duration_ms,
                    row_count = result.row_count,
                    "Executed query"
                );
                Ok(result)
            }
            Err(e) => {
                error!(
                    sql = %sql,
                    duration_ms,
                    error = %e,
                    details = ?e,
                    "Query failed"
                );
                Err(ExtensionError::from(e))
            }
        }
    }

    /// Execute a [`QueryRequest`].
    pub async fn execute_request(
        &self,
        pool: &DbPool,
        request: &QueryRequest,
    ) -> ExtensionResult<QueryResult> {
        self.execute(pool, &request.sql, &request.params).await
    }

    /// Borrow a connection and release it immediately, to surface connection
    /// errors early.
    ///
    /// With [`ProbePolicy::BestEffort`] a timeout, whether waiting on the pool
    /// or establishing the connection, is logged and treated as success;
    /// every other failure is returned.
    pub async fn connect_probe(&self, pool: &DbPool, policy: ProbePolicy) -> ExtensionResult<()> {
        let start = Instant::now();
        match pool.acquire_and_release().await {
            Ok(()) => {
                debug!(
                    db_type = %pool.db_type(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Connection probe succeeded"
                );
                Ok(())
            }
            Err(e) => {
                let err = ExtensionError::from(e);
                if policy.tolerates(&err) {
                    warn!(error = %err, "Connection probe timed out, continuing");
                    return Ok(());
                }
                error!(
                    error = %err,
                    suggestion = err.suggestion().unwrap_or_default(),
                    details = ?err,
                    "Connection probe failed"
                );
                Err(err)
            }
        }
    }
}

fn to_result<R: RowToJson>(rows: &[R]) -> QueryResult {
    QueryResult::from_rows(rows.iter().map(RowToJson::to_json_map).collect())
}

// Each module below provides the same interface adapted to its database type.
// Without params the SQL goes through the simple protocol, so multi-statement
// text works; with params it becomes a prepared statement.

mod postgres {
    use super::*;
    use crate::db::params::bind_inferred;
    use sqlx::postgres::PgRow;
    use sqlx::{Either, Executor, PgPool, Statement};

    pub async fn fetch_rows(
        pool: &PgPool,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<PgRow>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        if params.is_empty() {
            return (&mut *conn).fetch_all(sql).await;
        }

        // Prepared without declared types, so the server infers each one.
        let statement = (&mut *conn).prepare(sql).await?;
        let targets = match statement.parameters() {
            Some(Either::Left(types)) => types.to_vec(),
            _ => Vec::new(),
        };
        bind_inferred(statement.query(), params, &targets)
            .fetch_all(&mut *conn)
            .await
    }
}

mod mysql {
    use super::*;
    use crate::db::params::bind_params;
    use sqlx::Executor;
    use sqlx::MySqlPool;
    use sqlx::mysql::MySqlRow;

    pub async fn fetch_rows(
        pool: &MySqlPool,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<MySqlRow>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        if params.is_empty() {
            (&mut *conn).fetch_all(sql).await
        } else {
            bind_params(sqlx::query(sql), params)
                .fetch_all(&mut *conn)
                .await
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_params;
    use sqlx::Executor;
    use sqlx::SqlitePool;
    use sqlx::sqlite::SqliteRow;

    pub async fn fetch_rows(
        pool: &SqlitePool,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<Vec<SqliteRow>, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        if params.is_empty() {
            (&mut *conn).fetch_all(sql).await
        } else {
            bind_params(sqlx::query(sql), params)
                .fetch_all(&mut *conn)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    #[tokio::test]
    async fn test_select_literal() {
        let pool = memory_pool().await;
        let result = QueryExecutor::new()
            .execute(&pool, "SELECT 1 AS n", &[])
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(json!(result.rows), json!([{"n": 1}]));
    }

    #[tokio::test]
    async fn test_positional_params() {
        let pool = memory_pool().await;
        let request = QueryRequest::new("SELECT ? AS a, ? AS b, ? AS c")
            .with_param(QueryParam::Int(7))
            .with_param(QueryParam::String("x".to_string()))
            .with_param(QueryParam::Null);
        let result = QueryExecutor::new()
            .execute_request(&pool, &request)
            .await
            .unwrap();
        assert_eq!(json!(result.rows), json!([{"a": 7, "b": "x", "c": null}]));
    }

    #[tokio::test]
    async fn test_column_order_preserved() {
        let pool = memory_pool().await;
        let result = QueryExecutor::new()
            .execute(&pool, "SELECT 3 AS z, 2 AS a, 1 AS m", &[])
            .await
            .unwrap();
        let columns: Vec<_> = result.rows[0].keys().cloned().collect();
        assert_eq!(columns, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_error_propagates_and_connection_returns() {
        let pool = memory_pool().await;
        let executor = QueryExecutor::new();

        let err = executor
            .execute(&pool, "SELECT * FROM no_such_table", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::Database { .. }));

        // The single connection must be back in the pool.
        let result = executor.execute(&pool, "SELECT 1 AS n", &[]).await.unwrap();
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_probe_succeeds_on_live_pool() {
        let pool = memory_pool().await;
        QueryExecutor::new()
            .connect_probe(&pool, ProbePolicy::Strict)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_on_closed_pool_fails_under_both_policies() {
        let pool = memory_pool().await;
        pool.close().await;
        let executor = QueryExecutor::new();

        let err = executor
            .connect_probe(&pool, ProbePolicy::Strict)
            .await
            .unwrap_err();
        assert!(err.is_connection());

        // A closed pool is not a timeout, so best-effort still reports it.
        assert!(
            executor
                .connect_probe(&pool, ProbePolicy::BestEffort)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_probe_timeout_policy() {
        let sqlite = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(std::time::Duration::from_millis(100))
            .connect("sqlite::memory:")
            .await
            .unwrap();
        // Hold the only connection so the probe cannot acquire one.
        let held = sqlite.acquire().await.unwrap();
        let pool = DbPool::SQLite(sqlite.clone());
        let executor = QueryExecutor::new();

        let err = executor
            .connect_probe(&pool, ProbePolicy::Strict)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        executor
            .connect_probe(&pool, ProbePolicy::BestEffort)
            .await
            .unwrap();

        drop(held);
    }
}
