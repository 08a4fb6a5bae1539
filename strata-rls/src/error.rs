//! Error types for RLS policy installation and isolation contexts.

use thiserror::Error;

/// Result type alias for RLS operations.
pub type RlsResult<T> = Result<T, RlsError>;

/// Errors that can occur while installing policies or applying isolation
/// contexts.
#[derive(Debug, Error)]
pub enum RlsError {
    /// An isolation value failed validation before reaching the database.
    #[error("invalid isolation value for {field}: '{value}' is not a well-formed UUID")]
    InvalidIsolationValue {
        /// Which context field was malformed.
        field: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Driver-level failure while installing policies.
    #[error(transparent)]
    Driver(#[from] strata_migrate::MigrationError),

    /// Database failure while applying an isolation context.
    #[error("database error: {0}")]
    Database(String),
}

impl RlsError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_value_display() {
        let err = RlsError::InvalidIsolationValue {
            field: "server_id",
            value: "not-a-uuid".to_string(),
        };
        assert!(err.to_string().contains("server_id"));
        assert!(err.to_string().contains("not-a-uuid"));
    }
}
