//! Error types for the migration engine.

use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors that can occur during migration operations.
///
/// Configuration errors (`Schema`, `InvalidLockKey`) are fatal and never
/// retried. Execution errors (`Database`) roll the whole migration
/// transaction back before they reach the caller. Destructive-change
/// errors are blocked until explicitly overridden; their message depends
/// on the detected environment. Advisory-lock subsystem failures are never
/// surfaced as errors at all — the coordinator logs a warning and the
/// migration proceeds unlocked.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Malformed schema definition.
    #[error(transparent)]
    Schema(#[from] strata_schema::SchemaError),

    /// Advisory lock key outside the positive 63-bit range.
    #[error("invalid advisory lock key {0}: must be a positive 63-bit integer")]
    InvalidLockKey(i64),

    /// Database operation failure.
    #[error("database error: {0}")]
    Database(String),

    /// A stored snapshot could not be decoded.
    #[error("corrupt snapshot for plugin '{plugin}' at index {idx}: {message}")]
    CorruptSnapshot {
        /// Plugin the snapshot belongs to.
        plugin: String,
        /// Snapshot index.
        idx: i32,
        /// Decode failure detail.
        message: String,
    },

    /// Live-metadata introspection failure.
    #[error("introspection error: {0}")]
    Introspection(String),

    /// Destructive migration blocked (development environment).
    #[error(
        "migration for plugin '{plugin}' would destroy data: {summary}. \
         Pass allow_data_loss or set STRATA_ALLOW_DESTRUCTIVE=1 to apply it anyway"
    )]
    DestructiveBlocked {
        /// Plugin being migrated.
        plugin: String,
        /// Joined data-loss warnings.
        summary: String,
    },

    /// Destructive migration blocked in a production environment.
    #[error(
        "destructive migration for plugin '{plugin}' blocked in production: {summary}. \
         Operators must set STRATA_ALLOW_DESTRUCTIVE=1 to permit data loss"
    )]
    DestructiveBlockedInProduction {
        /// Plugin being migrated.
        plugin: String,
        /// Joined data-loss warnings.
        summary: String,
    },

    /// Development-only operation refused in production.
    #[error("refusing to run '{0}' in a production environment")]
    RefusedInProduction(String),
}

impl MigrationError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create an introspection error.
    pub fn introspection(message: impl Into<String>) -> Self {
        Self::Introspection(message.into())
    }

    /// Whether this error means a destructive change was blocked.
    pub fn is_destructive_block(&self) -> bool {
        matches!(
            self,
            Self::DestructiveBlocked { .. } | Self::DestructiveBlockedInProduction { .. }
        )
    }

    /// Whether this error is a fatal configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Schema(_) | Self::InvalidLockKey(_))
    }
}
