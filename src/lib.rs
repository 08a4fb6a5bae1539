//! # strata
//!
//! Schema migration and row-level multi-tenant isolation engine for
//! PostgreSQL.
//!
//! Strata is the storage backbone of a plugin system: each plugin
//! declares its tables once, and strata diffs that declaration against
//! persisted history, synthesizes the DDL, serializes concurrent
//! migration attempts across processes, and installs a two-tier
//! row-level-security scheme (per-tenant server isolation and per-user
//! entity isolation) over the resulting tables.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata::migrate::{MigrateOptions, MigrationRunner};
//! use strata::postgres::{PgPool, PostgresDriver};
//! use strata::schema::{ColumnSpec, ColumnType, PluginSchema, TableSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = PluginSchema::new().table(
//!         TableSpec::new("memories")
//!             .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key())
//!             .column(ColumnSpec::new("room_id", ColumnType::Uuid))
//!             .column(ColumnSpec::new("content", ColumnType::Jsonb)),
//!     );
//!
//!     let pool = PgPool::from_url("postgresql://localhost/eliza")?;
//!     let driver = Arc::new(PostgresDriver::new(pool));
//!
//!     let runner = MigrationRunner::new(driver);
//!     runner.initialize().await?;
//!     runner.migrate("memory", &schema, &MigrateOptions::new()).await?;
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Typed schema definitions and content-addressed snapshots.
pub mod schema {
    pub use strata_schema::*;
}

/// Snapshot diffing, DDL generation, locking and history tracking.
pub mod migrate {
    pub use strata_migrate::*;
}

/// Row-level security policies and isolation contexts.
pub mod rls {
    pub use strata_rls::*;
}

/// Pooled PostgreSQL driver.
pub mod postgres {
    pub use strata_postgres::*;
}

// Re-export key types at the crate root
pub use migrate::{MigrateOptions, MigrationRunner};
pub use rls::{IsolationContext, PolicyInstaller, RlsConfig};
pub use schema::{PluginSchema, SchemaSnapshot};
