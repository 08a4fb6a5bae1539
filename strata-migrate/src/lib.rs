//! # strata-migrate
//!
//! Migration engine for the strata storage layer.
//!
//! This crate provides:
//! - Snapshot diffing between a plugin's declared schema and its persisted
//!   history
//! - DDL generation for PostgreSQL, with destructive-change detection
//! - Bookkeeping (tracker, append-only journal, snapshot storage) written
//!   atomically with the DDL it describes
//! - Advisory-lock coordination so concurrent processes never migrate the
//!   same plugin twice
//! - Live-schema introspection for the upgrade path
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌────────────────┐     ┌─────────────┐
//! │ PluginSchema  │────▶│ SchemaSnapshot │────▶│ Snapshot    │
//! └───────────────┘     │  (hashable)    │     │ Differ      │
//!                       └────────────────┘     └─────────────┘
//!                                                     │
//!                              ┌──────────────────────▼──────┐
//!                              │ SQL Generator + DataLoss    │
//!                              └──────────────────────┬──────┘
//!                                                     ▼
//!                       ┌─────────────────────────────────────┐
//!                       │ one transaction: DDL + tracker +    │
//!                       │ journal + snapshot                  │
//!                       └─────────────────────────────────────┘
//! ```
//!
//! The orchestrator serializes concurrent attempts per plugin through an
//! advisory lock derived from the plugin name, and re-checks the tracker
//! hash after acquiring it so a migration that already happened elsewhere
//! becomes a no-op.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{MigrateOptions, MigrationRunner};
//! use strata_schema::{ColumnSpec, ColumnType, PluginSchema, TableSpec};
//!
//! async fn run(driver: Arc<dyn strata_migrate::MigrationDriver>) -> strata_migrate::MigrateResult<()> {
//!     let schema = PluginSchema::new().table(
//!         TableSpec::new("memories")
//!             .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key())
//!             .column(ColumnSpec::new("content", ColumnType::Jsonb)),
//!     );
//!
//!     let runner = MigrationRunner::new(driver);
//!     runner.initialize().await?;
//!     runner.migrate("memory", &schema, &MigrateOptions::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod diff;
pub mod driver;
pub mod engine;
pub mod env;
pub mod error;
pub mod extensions;
pub mod history;
pub mod introspect;
pub mod lock;
pub mod sql;

// Re-exports
pub use diff::{ColumnAlterDiff, SchemaDiff, SnapshotDiffer, TableAlterDiff};
pub use driver::{AdvisoryLockHandle, MigrationDriver, SqlRow, SqlStatement, SqlValue};
pub use engine::{
    MigrateOptions, MigrationConfig, MigrationRunner, MigrationStatus, plan_diff,
};
pub use env::RuntimeEnv;
pub use error::{MigrateResult, MigrationError};
pub use extensions::ExtensionManager;
pub use history::{HistoryRepository, JournalEntry, MigrationRecord};
pub use introspect::{IntrospectionOutcome, SchemaIntrospector, SkippedTable};
pub use lock::{AdvisoryLockKey, LockAcquisition, LockCoordinator};
pub use sql::{DataLossCheck, MigrationSql, PostgresSqlGenerator};
