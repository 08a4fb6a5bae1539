//! `MigrationDriver` implementation over the pooled connection.

use async_trait::async_trait;
use deadpool_postgres::Object;
use strata_migrate::driver::{
    AdvisoryLockHandle, MigrationDriver, SqlRow, SqlStatement, SqlValue,
};
use strata_migrate::error::{MigrateResult, MigrationError};
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::{PgError, PgResult};
use crate::pool::PgPool;
use crate::types::{bind_params, convert_row};

const TRY_LOCK_SQL: &str = "SELECT pg_try_advisory_lock($1)";
const LOCK_SQL: &str = "SELECT pg_advisory_lock($1)";
const UNLOCK_SQL: &str = "SELECT pg_advisory_unlock($1)";

/// PostgreSQL driver for the migration engine.
#[derive(Clone)]
pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    /// Create a driver over a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn query_inner(&self, sql: &str, params: &[SqlValue]) -> PgResult<Vec<SqlRow>> {
        debug!(sql = %sql, "executing query");
        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(sql).await?;

        let bound = bind_params(stmt.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();

        let rows = client.query(&stmt, &refs).await?;
        rows.iter().map(convert_row).collect()
    }

    async fn execute_inner(&self, sql: &str, params: &[SqlValue]) -> PgResult<u64> {
        debug!(sql = %sql, "executing statement");
        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(sql).await?;

        let bound = bind_params(stmt.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();

        Ok(client.execute(&stmt, &refs).await?)
    }

    async fn transaction_inner(&self, statements: &[SqlStatement]) -> PgResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        for statement in statements {
            debug!(sql = %statement.sql, "executing in transaction");
            let stmt = tx.prepare(&statement.sql).await?;

            let bound = bind_params(stmt.params(), &statement.params)?;
            let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();

            tx.execute(&stmt, &refs).await?;
        }

        // A failing statement drops the transaction unfinished, which
        // rolls it back on the connection before it returns to the pool.
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MigrationDriver for PostgresDriver {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
        Ok(self.query_inner(sql, params).await?)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64> {
        Ok(self.execute_inner(sql, params).await?)
    }

    async fn execute_batch(&self, sql: &str) -> MigrateResult<()> {
        let client = self.pool.get().await.map_err(PgError::from)?;
        client.batch_execute(sql).await.map_err(PgError::from)?;
        Ok(())
    }

    async fn execute_transaction(&self, statements: &[SqlStatement]) -> MigrateResult<()> {
        Ok(self.transaction_inner(statements).await?)
    }

    async fn try_advisory_lock(
        &self,
        key: i64,
    ) -> MigrateResult<Option<Box<dyn AdvisoryLockHandle>>> {
        let conn = self.pool.get().await.map_err(PgError::from)?;
        let row = conn
            .query_one(TRY_LOCK_SQL, &[&key])
            .await
            .map_err(PgError::from)?;
        let acquired: bool = row.try_get(0).map_err(PgError::from)?;

        if acquired {
            Ok(Some(Box::new(PgAdvisoryLock {
                conn: Some(conn),
                key,
            })))
        } else {
            Ok(None)
        }
    }

    async fn advisory_lock(&self, key: i64) -> MigrateResult<Box<dyn AdvisoryLockHandle>> {
        let conn = self.pool.get().await.map_err(PgError::from)?;
        // Unbounded wait: the competing process eventually finishes or
        // crashes, and a driver-level timeout surfaces as an error here.
        conn.query_one(LOCK_SQL, &[&key])
            .await
            .map_err(PgError::from)?;

        Ok(Box::new(PgAdvisoryLock {
            conn: Some(conn),
            key,
        }))
    }
}

/// A held advisory lock pinned to one pooled session.
struct PgAdvisoryLock {
    conn: Option<Object>,
    key: i64,
}

#[async_trait]
impl AdvisoryLockHandle for PgAdvisoryLock {
    fn key(&self) -> i64 {
        self.key
    }

    async fn release(mut self: Box<Self>) -> MigrateResult<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };

        match conn.execute(UNLOCK_SQL, &[&self.key]).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // The session may still hold the lock; discard the
                // connection so the server releases it instead of a
                // locked session going back to the pool.
                let _ = Object::take(conn);
                Err(MigrationError::database(format!(
                    "failed to release advisory lock {}: {}",
                    self.key, e
                )))
            }
        }
    }
}

impl Drop for PgAdvisoryLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = Object::take(conn);
        }
    }
}
