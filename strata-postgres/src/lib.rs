//! # strata-postgres
//!
//! Pooled PostgreSQL driver for the strata migration and isolation
//! engine, built on tokio-postgres and deadpool-postgres.
//!
//! Implements the two seams the core crates define:
//!
//! - [`strata_migrate::MigrationDriver`] — queries, atomic DDL
//!   transactions, and advisory-lock handles pinned to one pooled
//!   session for the lifetime of the lock.
//! - [`strata_rls::IsolationBackend`] — transaction-scoped isolation
//!   contexts applied with parameterized `set_config(.., true)` calls.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{MigrateOptions, MigrationRunner};
//! use strata_postgres::{PgPool, PostgresDriver};
//!
//! # async fn run(schema: strata_schema::PluginSchema) -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::from_url("postgresql://localhost/eliza")?;
//! let driver = Arc::new(PostgresDriver::new(pool));
//!
//! let runner = MigrationRunner::new(driver);
//! runner.initialize().await?;
//! runner.migrate("memory", &schema, &MigrateOptions::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod isolation;
pub mod pool;
mod types;

pub use config::PgConfig;
pub use driver::PostgresDriver;
pub use error::{PgError, PgResult};
pub use isolation::{IsolatedTransaction, IsolationManager};
pub use pool::{PgPool, PoolConfig};
