//! Transaction-scoped isolation over the pooled connection.
//!
//! Session variables are applied with transaction-local scope
//! (`set_config(.., true)`), so they reset at commit or rollback and a
//! reused pooled connection never inherits a stale tenant or entity
//! context. If a transaction guard is dropped without finishing, the
//! connection is discarded instead of returning to the pool.

use async_trait::async_trait;
use deadpool_postgres::Object;
use strata_migrate::driver::{SqlRow, SqlValue};
use strata_rls::{
    IsolatedWork, IsolationBackend, IsolationContext, IsolationSession, RlsConfig, RlsError,
    RlsResult, SET_CONFIG_SQL,
};
use tokio_postgres::types::ToSql;
use tracing::debug;

use crate::error::PgResult;
use crate::pool::PgPool;
use crate::types::{bind_params, convert_row};

/// Applies isolation contexts to pooled transactions.
#[derive(Clone)]
pub struct IsolationManager {
    pool: PgPool,
    config: RlsConfig,
}

impl IsolationManager {
    /// Create a manager over a pool.
    pub fn new(pool: PgPool, config: RlsConfig) -> Self {
        Self { pool, config }
    }

    /// Get the isolation config.
    pub fn config(&self) -> &RlsConfig {
        &self.config
    }

    /// Open a transaction scoped to the given context.
    ///
    /// When isolation is globally disabled no session variables are set
    /// and the policies fall back to their no-context behavior.
    pub async fn begin(&self, context: &IsolationContext) -> PgResult<IsolatedTransaction> {
        let conn = self.pool.get().await?;
        let mut tx = IsolatedTransaction {
            conn: Some(conn),
            finished: false,
        };

        tx.batch("BEGIN").await?;

        if self.config.enabled {
            for (variable, value) in context.assignments(&self.config) {
                debug!(variable = %variable, "applying isolation context");
                tx.execute_raw(SET_CONFIG_SQL, &[variable.into(), value.into()])
                    .await?;
            }
        }

        Ok(tx)
    }
}

#[async_trait]
impl IsolationBackend for IsolationManager {
    async fn with_isolation(
        &self,
        context: &IsolationContext,
        work: IsolatedWork<'_>,
    ) -> RlsResult<()> {
        let tx = self
            .begin(context)
            .await
            .map_err(|e| RlsError::database(e.to_string()))?;

        match work(&tx).await {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| RlsError::database(e.to_string())),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!(error = %rollback, "rollback after failed isolated work");
                }
                Err(e)
            }
        }
    }
}

/// An open transaction with its isolation context applied.
///
/// Owns the pooled connection for the duration of the transaction. The
/// guard must be finished with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); dropping it unfinished discards the
/// connection so the pool never serves a session mid-transaction.
pub struct IsolatedTransaction {
    conn: Option<Object>,
    finished: bool,
}

impl IsolatedTransaction {
    /// Execute a statement inside the transaction.
    pub async fn execute_raw(&self, sql: &str, params: &[SqlValue]) -> PgResult<u64> {
        let conn = self.connection();
        let stmt = conn.prepare_cached(sql).await?;

        let bound = bind_params(stmt.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();

        Ok(conn.execute(&stmt, &refs).await?)
    }

    /// Run a query inside the transaction.
    pub async fn query_raw(&self, sql: &str, params: &[SqlValue]) -> PgResult<Vec<SqlRow>> {
        let conn = self.connection();
        let stmt = conn.prepare_cached(sql).await?;

        let bound = bind_params(stmt.params(), params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(AsRef::as_ref).collect();

        let rows = conn.query(&stmt, &refs).await?;
        rows.iter().map(convert_row).collect()
    }

    /// Commit the transaction and return the connection to the pool.
    pub async fn commit(mut self) -> PgResult<()> {
        self.batch("COMMIT").await?;
        self.finished = true;
        Ok(())
    }

    /// Roll the transaction back and return the connection to the pool.
    pub async fn rollback(mut self) -> PgResult<()> {
        self.batch("ROLLBACK").await?;
        self.finished = true;
        Ok(())
    }

    async fn batch(&mut self, sql: &str) -> PgResult<()> {
        self.connection().batch_execute(sql).await?;
        Ok(())
    }

    fn connection(&self) -> &Object {
        // Only ever None inside Drop; commit/rollback consume self.
        self.conn
            .as_ref()
            .expect("transaction connection present until drop")
    }
}

#[async_trait]
impl IsolationSession for IsolatedTransaction {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> RlsResult<u64> {
        self.execute_raw(sql, params)
            .await
            .map_err(|e| RlsError::database(e.to_string()))
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> RlsResult<Vec<SqlRow>> {
        self.query_raw(sql, params)
            .await
            .map_err(|e| RlsError::database(e.to_string()))
    }
}

impl Drop for IsolatedTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.finished {
                // Mid-transaction connection: discard it rather than
                // handing an open transaction back to the pool.
                let _ = Object::take(conn);
            }
        }
    }
}
