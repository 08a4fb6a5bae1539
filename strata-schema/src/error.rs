//! Error types for schema definitions and snapshots.

use thiserror::Error;

/// Result type alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while validating a schema definition or building a snapshot.
///
/// All of these are configuration errors: they indicate a malformed schema
/// description and are surfaced immediately, before anything touches the
/// database.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Name is not a valid SQL identifier.
    #[error("invalid identifier '{0}': identifiers must match [a-zA-Z_][a-zA-Z0-9_]* and be at most 63 bytes")]
    InvalidIdentifier(String),

    /// Two tables share the same qualified name.
    #[error("duplicate table definition '{0}'")]
    DuplicateTable(String),

    /// Two columns on one table share a name.
    #[error("duplicate column '{column}' on table '{table}'")]
    DuplicateColumn {
        /// Qualified table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A table was declared without columns.
    #[error("table '{0}' has no columns")]
    EmptyTable(String),

    /// An index references a column the table does not define.
    #[error("index on table '{table}' references unknown column '{column}'")]
    UnknownIndexColumn {
        /// Qualified table name.
        table: String,
        /// Missing column name.
        column: String,
    },

    /// A foreign key references a column the table does not define.
    #[error("foreign key on table '{table}' references unknown column '{column}'")]
    UnknownForeignKeyColumn {
        /// Qualified table name.
        table: String,
        /// Missing column name.
        column: String,
    },

    /// A vector column was declared with zero dimensions.
    #[error("vector column '{0}' must have at least one dimension")]
    InvalidVectorDimensions(String),

    /// Snapshot (de)serialization failure.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
