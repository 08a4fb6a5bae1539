//! Migration orchestration.
//!
//! One [`MigrationRunner::migrate`] call per plugin walks the full
//! pipeline: bookkeeping tables ensured, advisory lock acquired,
//! extensions installed, snapshot generated, schemas ensured, hash
//! compared, diff computed, data loss evaluated, DDL generated, then one
//! atomic transaction that applies the DDL and records the migration.
//! The lock is released on every path, success or failure.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use strata_schema::{PluginSchema, SchemaSnapshot};
use tracing::{debug, info, warn};

use crate::driver::{MigrationDriver, SqlStatement};
use crate::env::RuntimeEnv;
use crate::error::{MigrateResult, MigrationError};
use crate::extensions::ExtensionManager;
use crate::diff::{SchemaDiff, SnapshotDiffer};
use crate::history::{HistoryRepository, JournalEntry, MigrationRecord};
use crate::introspect::SchemaIntrospector;
use crate::lock::LockCoordinator;
use crate::sql::{DataLossCheck, PostgresSqlGenerator, quote_ident};

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Column name reserved for tenant isolation. Used to flag live
    /// tables that carry it without being declared by the migrating
    /// plugin (a collision the bootstrap path must not silently resolve).
    pub tenant_column: String,
    /// Runtime environment switches.
    pub env: RuntimeEnv,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            tenant_column: "server_id".to_string(),
            env: RuntimeEnv::development(),
        }
    }
}

impl MigrationConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with switches read from the process environment.
    pub fn from_env() -> Self {
        Self {
            env: RuntimeEnv::from_env(),
            ..Self::default()
        }
    }

    /// Set the reserved tenant column name.
    pub fn tenant_column(mut self, column: impl Into<String>) -> Self {
        self.tenant_column = column.into();
        self
    }

    /// Set the runtime environment.
    pub fn env(mut self, env: RuntimeEnv) -> Self {
        self.env = env;
        self
    }
}

/// Per-call migration options.
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Log the computed diff and every generated statement.
    pub verbose: bool,
    /// Re-run even when the tracker hash matches.
    pub force: bool,
    /// Compute and log everything but execute nothing.
    pub dry_run: bool,
    /// Permit destructive statements for this call.
    pub allow_data_loss: bool,
}

impl MigrateOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable verbose logging.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Force re-application.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Permit data loss.
    pub fn allow_data_loss(mut self, allow: bool) -> Self {
        self.allow_data_loss = allow;
        self
    }
}

/// Read-only migration state for one plugin.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Whether any migration has ever run.
    pub has_run: bool,
    /// The latest migration record.
    pub last_migration: Option<MigrationRecord>,
    /// The full journal, oldest first.
    pub journal: Vec<JournalEntry>,
    /// Number of persisted snapshots.
    pub snapshot_count: i64,
}

/// The migration orchestrator exposed to the plugin system.
pub struct MigrationRunner {
    config: MigrationConfig,
    driver: Arc<dyn MigrationDriver>,
    history: HistoryRepository,
    locks: LockCoordinator,
    extensions: ExtensionManager,
    introspector: SchemaIntrospector,
    sql_generator: PostgresSqlGenerator,
}

impl MigrationRunner {
    /// Create a runner with default configuration.
    pub fn new(driver: Arc<dyn MigrationDriver>) -> Self {
        Self::with_config(driver, MigrationConfig::default())
    }

    /// Create a runner with explicit configuration.
    pub fn with_config(driver: Arc<dyn MigrationDriver>, config: MigrationConfig) -> Self {
        Self {
            config,
            history: HistoryRepository::new(driver.clone()),
            locks: LockCoordinator::new(driver.clone()),
            extensions: ExtensionManager::new(driver.clone()),
            introspector: SchemaIntrospector::new(driver.clone()),
            sql_generator: PostgresSqlGenerator,
            driver,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Ensure the bookkeeping tables exist. Idempotent.
    pub async fn initialize(&self) -> MigrateResult<()> {
        self.history.ensure_tables().await
    }

    /// Run the full migration pipeline for one plugin.
    pub async fn migrate(
        &self,
        plugin: &str,
        schema: &PluginSchema,
        options: &MigrateOptions,
    ) -> MigrateResult<()> {
        self.history.ensure_tables().await?;

        let lock = self.locks.acquire(plugin).await;
        let result = self.migrate_locked(plugin, schema, options).await;
        lock.release().await;
        result
    }

    async fn migrate_locked(
        &self,
        plugin: &str,
        schema: &PluginSchema,
        options: &MigrateOptions,
    ) -> MigrateResult<()> {
        self.extensions.ensure(&schema.extensions).await?;

        let current = SchemaSnapshot::from_schema(schema)?;
        let current_hash = current.hash()?;

        self.ensure_schemas(&current).await?;

        // Re-checked after lock acquisition: a competing process may have
        // completed the identical migration while we waited.
        let last_hash = self.history.latest_hash(plugin).await?;
        if !options.force && last_hash.as_deref() == Some(current_hash.as_str()) {
            debug!(plugin, "schema unchanged; nothing to migrate");
            return Ok(());
        }

        let previous = match self.history.latest_snapshot(plugin).await? {
            Some((_, snapshot)) => Some(snapshot),
            None => self.bootstrap_baseline(plugin, &current).await?,
        };

        let differ = SnapshotDiffer::new(&current);
        let diff = match &previous {
            Some(snapshot) => differ.with_previous(snapshot).diff(),
            None => differ.diff(),
        };

        if options.verbose {
            info!(plugin, summary = %diff.summary(), "computed schema diff");
        }

        let sql = self.sql_generator.generate(&diff);
        self.evaluate_data_loss(plugin, &sql.data_loss, options)?;

        if options.dry_run {
            info!(
                plugin,
                statements = sql.statements.len(),
                "dry run; no statements executed"
            );
            return Ok(());
        }

        let journal_idx = self.history.next_journal_idx(plugin).await?;
        let snapshot_idx = self.history.snapshot_count(plugin).await? as i32;
        let entry = JournalEntry::next(plugin, journal_idx, &current_hash);

        let mut statements: Vec<SqlStatement> = sql
            .statements
            .iter()
            .map(|s| SqlStatement::new(s.clone()))
            .collect();
        statements.extend(self.history.record_statements(
            &entry,
            &current_hash,
            snapshot_idx,
            &current.to_json()?,
            Utc::now().timestamp_millis(),
        ));

        if options.verbose {
            for statement in &sql.statements {
                info!(plugin, sql = %statement, "executing");
            }
        }

        self.driver.execute_transaction(&statements).await?;

        info!(
            plugin,
            journal_idx = entry.idx,
            statements = sql.statements.len(),
            "migration applied"
        );

        Ok(())
    }

    /// Analyse a schema change without side effects.
    ///
    /// Returns `None` when there is nothing to migrate.
    pub async fn check_migration(
        &self,
        plugin: &str,
        schema: &PluginSchema,
    ) -> MigrateResult<Option<DataLossCheck>> {
        self.history.ensure_tables().await?;

        let current = SchemaSnapshot::from_schema(schema)?;
        let current_hash = current.hash()?;

        if self.history.latest_hash(plugin).await?.as_deref() == Some(current_hash.as_str()) {
            return Ok(None);
        }

        let previous = self
            .history
            .latest_snapshot(plugin)
            .await?
            .map(|(_, snapshot)| snapshot);

        let differ = SnapshotDiffer::new(&current);
        let diff = match &previous {
            Some(snapshot) => differ.with_previous(snapshot).diff(),
            None => differ.diff(),
        };

        if diff.is_empty() {
            return Ok(None);
        }

        Ok(Some(self.sql_generator.check_data_loss(&diff)))
    }

    /// Read-only migration state for a plugin.
    pub async fn status(&self, plugin: &str) -> MigrateResult<MigrationStatus> {
        self.history.ensure_tables().await?;

        let last_migration = self.history.last_migration(plugin).await?;
        Ok(MigrationStatus {
            has_run: last_migration.is_some(),
            last_migration,
            journal: self.history.journal(plugin).await?,
            snapshot_count: self.history.snapshot_count(plugin).await?,
        })
    }

    /// Delete all tracked history for a plugin.
    ///
    /// Development-only and irreversible; refused in production unless
    /// destructive operations are explicitly permitted.
    pub async fn reset(&self, plugin: &str) -> MigrateResult<()> {
        if self.config.env.production && !self.config.env.allow_destructive {
            return Err(MigrationError::RefusedInProduction(format!(
                "reset('{}')",
                plugin
            )));
        }

        warn!(plugin, "deleting all tracked migration history; this is irreversible");
        self.history.reset(plugin).await
    }

    fn evaluate_data_loss(
        &self,
        plugin: &str,
        check: &DataLossCheck,
        options: &MigrateOptions,
    ) -> MigrateResult<()> {
        if !check.requires_confirmation {
            return Ok(());
        }

        if options.allow_data_loss || self.config.env.allow_destructive {
            for warning in &check.warnings {
                warn!(plugin, warning = %warning, "applying destructive change");
            }
            return Ok(());
        }

        let summary = check.warnings.join("; ");
        if self.config.env.production {
            Err(MigrationError::DestructiveBlockedInProduction {
                plugin: plugin.to_string(),
                summary,
            })
        } else {
            Err(MigrationError::DestructiveBlocked {
                plugin: plugin.to_string(),
                summary,
            })
        }
    }

    async fn ensure_schemas(&self, snapshot: &SchemaSnapshot) -> MigrateResult<()> {
        for schema in &snapshot.schemas {
            if schema != "public" {
                let sql = format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(schema));
                self.driver.execute_batch(&sql).await?;
            }
        }
        Ok(())
    }

    /// Upgrade path: no persisted snapshot, but live tables may exist.
    ///
    /// Introspects the live database, keeps only tables the current
    /// schema declares, and persists the result as snapshot index 0
    /// before any diff is computed. Live tables that carry the tenant
    /// column without being declared are flagged, never adopted.
    async fn bootstrap_baseline(
        &self,
        plugin: &str,
        current: &SchemaSnapshot,
    ) -> MigrateResult<Option<SchemaSnapshot>> {
        let declared: BTreeSet<String> = current.tables.keys().cloned().collect();
        let outcome = self
            .introspector
            .snapshot_of(&current.schemas, &declared, &self.config.tenant_column)
            .await?;

        for skipped in &outcome.skipped {
            if skipped.carries_tenant_column {
                warn!(
                    plugin,
                    table = %skipped.qualified_name,
                    column = %self.config.tenant_column,
                    "live table carries the tenant isolation column but is not declared by this plugin; leaving it untouched"
                );
            }
        }

        if outcome.snapshot.is_empty() {
            return Ok(None);
        }

        info!(
            plugin,
            tables = outcome.snapshot.tables.len(),
            "bootstrapping baseline snapshot from live database"
        );

        let statement = self
            .history
            .baseline_statement(plugin, &outcome.snapshot.to_json()?);
        self.driver
            .execute_transaction(std::slice::from_ref(&statement))
            .await?;

        Ok(Some(outcome.snapshot))
    }
}

/// Compute the diff a migration would apply, for logging and tooling.
pub fn plan_diff(previous: Option<&SchemaSnapshot>, current: &SchemaSnapshot) -> SchemaDiff {
    let differ = SnapshotDiffer::new(current);
    match previous {
        Some(snapshot) => differ.with_previous(snapshot).diff(),
        None => differ.diff(),
    }
}
