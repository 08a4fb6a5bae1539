//! Idempotent policy installation.

use std::sync::Arc;

use strata_migrate::driver::{MigrationDriver, SqlStatement};
use strata_schema::SchemaSnapshot;
use tracing::{debug, info};

use crate::config::RlsConfig;
use crate::error::RlsResult;
use crate::policy::PolicyEngine;

/// What an installation pass did.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Qualified names of tables that received at least one policy.
    pub secured_tables: Vec<String>,
    /// Qualified names of tables with no isolation column.
    pub skipped_tables: Vec<String>,
    /// Number of statements executed.
    pub statement_count: usize,
}

/// Installs session functions and per-table policies through the driver.
pub struct PolicyInstaller {
    driver: Arc<dyn MigrationDriver>,
    engine: PolicyEngine,
}

impl PolicyInstaller {
    /// Create an installer with the given config.
    pub fn new(driver: Arc<dyn MigrationDriver>, config: RlsConfig) -> Self {
        Self {
            driver,
            engine: PolicyEngine::new(config),
        }
    }

    /// Get the underlying policy engine.
    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    /// Install isolation over every table in the snapshot.
    ///
    /// Runs as one transaction. Safe to re-run against a database that
    /// already has the policies: functions are `CREATE OR REPLACE`,
    /// policies are dropped before being recreated, and enabling RLS
    /// twice is harmless.
    pub async fn install(&self, snapshot: &SchemaSnapshot) -> RlsResult<InstallReport> {
        if !self.engine.config().enabled {
            info!("row-level isolation is disabled; skipping policy installation");
            return Ok(InstallReport::default());
        }

        let mut report = InstallReport::default();
        let mut statements: Vec<String> = self.engine.session_function_sql();

        for table in snapshot.tables.values() {
            let table_statements = self.engine.install_sql(table);
            if table_statements.is_empty() {
                debug!(table = %table.qualified_name(), "no isolation column; skipping");
                report.skipped_tables.push(table.qualified_name());
            } else {
                report.secured_tables.push(table.qualified_name());
                statements.extend(table_statements);
            }
        }

        report.statement_count = statements.len();
        let statements: Vec<SqlStatement> =
            statements.into_iter().map(SqlStatement::new).collect();
        self.driver.execute_transaction(&statements).await?;

        info!(
            secured = report.secured_tables.len(),
            skipped = report.skipped_tables.len(),
            "row-level isolation installed"
        );

        Ok(report)
    }

    /// Remove isolation from every table in the snapshot.
    pub async fn teardown(&self, snapshot: &SchemaSnapshot) -> RlsResult<()> {
        let statements: Vec<SqlStatement> = snapshot
            .tables
            .values()
            .flat_map(|table| self.engine.teardown_sql(table))
            .map(SqlStatement::new)
            .collect();

        self.driver.execute_transaction(&statements).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use strata_migrate::driver::{AdvisoryLockHandle, SqlRow, SqlValue};
    use strata_migrate::error::{MigrateResult, MigrationError};
    use strata_schema::{ColumnSpec, ColumnType, PluginSchema, TableSpec};

    use super::*;

    #[derive(Default)]
    struct RecordingDriver {
        transactions: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl MigrationDriver for RecordingDriver {
        async fn query(&self, _sql: &str, _params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
            Ok(Vec::new())
        }

        async fn execute(&self, _sql: &str, _params: &[SqlValue]) -> MigrateResult<u64> {
            Ok(0)
        }

        async fn execute_batch(&self, _sql: &str) -> MigrateResult<()> {
            Ok(())
        }

        async fn execute_transaction(&self, statements: &[SqlStatement]) -> MigrateResult<()> {
            self.transactions
                .lock()
                .unwrap()
                .push(statements.iter().map(|s| s.sql.clone()).collect());
            Ok(())
        }

        async fn try_advisory_lock(
            &self,
            _key: i64,
        ) -> MigrateResult<Option<Box<dyn AdvisoryLockHandle>>> {
            Ok(None)
        }

        async fn advisory_lock(&self, key: i64) -> MigrateResult<Box<dyn AdvisoryLockHandle>> {
            Err(MigrationError::InvalidLockKey(key))
        }
    }

    fn snapshot() -> SchemaSnapshot {
        let schema = PluginSchema::new()
            .table(
                TableSpec::new("memories")
                    .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key())
                    .column(ColumnSpec::new("server_id", ColumnType::Uuid))
                    .column(ColumnSpec::new("room_id", ColumnType::Uuid)),
            )
            .table(
                TableSpec::new("lookups")
                    .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key()),
            );
        SchemaSnapshot::from_schema(&schema).unwrap()
    }

    #[tokio::test]
    async fn test_install_secures_classified_tables_only() {
        let driver = Arc::new(RecordingDriver::default());
        let installer = PolicyInstaller::new(driver.clone(), RlsConfig::default());

        let report = installer.install(&snapshot()).await.unwrap();

        assert_eq!(report.secured_tables, vec!["public.memories".to_string()]);
        assert_eq!(report.skipped_tables, vec!["public.lookups".to_string()]);

        let transactions = driver.transactions.lock().unwrap();
        assert_eq!(transactions.len(), 1);
        let statements = &transactions[0];
        assert!(statements.iter().any(|s| s.contains("current_server_id")));
        assert!(statements.iter().any(|s| s.contains("strata_entity_isolation")));
        assert!(!statements.iter().any(|s| s.contains("\"lookups\" ENABLE")));
    }

    #[tokio::test]
    async fn test_install_twice_produces_identical_statements() {
        let driver = Arc::new(RecordingDriver::default());
        let installer = PolicyInstaller::new(driver.clone(), RlsConfig::default());

        installer.install(&snapshot()).await.unwrap();
        installer.install(&snapshot()).await.unwrap();

        let transactions = driver.transactions.lock().unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0], transactions[1]);
    }

    #[tokio::test]
    async fn test_disabled_isolation_is_a_no_op() {
        let driver = Arc::new(RecordingDriver::default());
        let installer =
            PolicyInstaller::new(driver.clone(), RlsConfig::default().enabled(false));

        let report = installer.install(&snapshot()).await.unwrap();

        assert!(report.secured_tables.is_empty());
        assert!(driver.transactions.lock().unwrap().is_empty());
    }
}
