//! Driver abstraction between the migration engine and a physical database.
//!
//! The engine talks to exactly one seam: [`MigrationDriver`]. The pooled
//! server driver implements every method; an embedded single-process
//! engine reports `supports_advisory_locks() == false` and never sees a
//! lock call. All DDL plus the bookkeeping writes of one migration flow
//! through [`MigrationDriver::execute_transaction`] so partial application
//! is impossible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::MigrateResult;

/// A value bound as a statement parameter or read back from a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// BOOLEAN.
    Boolean(bool),
    /// INTEGER / BIGINT.
    Integer(i64),
    /// DOUBLE PRECISION.
    Float(f64),
    /// TEXT.
    Text(String),
    /// UUID.
    Uuid(Uuid),
    /// TIMESTAMP WITH TIME ZONE.
    Timestamp(DateTime<Utc>),
    /// JSONB.
    Json(serde_json::Value),
}

impl SqlValue {
    /// Borrow the value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Read the value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Read the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// A SQL statement with bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    /// Statement text with `$n` placeholders.
    pub sql: String,
    /// Bound parameters, in placeholder order.
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    /// Create a statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Bind the next parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// A row returned from a query, with positional values and column names.
#[derive(Debug, Clone, Default)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl SqlRow {
    /// Create a row from parallel column/value lists.
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Look up a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Read a text column.
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(SqlValue::as_str)
    }

    /// Read an integer column.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    /// Read a boolean column.
    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(SqlValue::as_bool)
    }
}

/// A held advisory lock.
///
/// PostgreSQL advisory locks are session-scoped, so the handle pins the
/// session it was acquired on until [`release`](Self::release) runs.
#[async_trait]
pub trait AdvisoryLockHandle: Send {
    /// The lock key this handle holds.
    fn key(&self) -> i64;

    /// Release the lock on the session that acquired it.
    async fn release(self: Box<Self>) -> MigrateResult<()>;
}

/// Boundary to a physical database driver.
#[async_trait]
pub trait MigrationDriver: Send + Sync {
    /// Execute a query and return its rows.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>>;

    /// Execute a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<u64>;

    /// Execute a batch of semicolon-separated statements outside any
    /// transaction (used for idempotent bootstrap DDL).
    async fn execute_batch(&self, sql: &str) -> MigrateResult<()>;

    /// Execute every statement in order inside a single transaction.
    /// Any failure rolls the whole transaction back.
    async fn execute_transaction(&self, statements: &[SqlStatement]) -> MigrateResult<()>;

    /// Whether the backend supports cross-process advisory locks.
    ///
    /// Embedded single-process engines return `false`; no cross-process
    /// contention is possible there and locking is skipped entirely.
    fn supports_advisory_locks(&self) -> bool {
        true
    }

    /// Attempt a non-blocking advisory lock acquisition.
    ///
    /// Returns `None` when another session holds the lock.
    async fn try_advisory_lock(&self, key: i64)
    -> MigrateResult<Option<Box<dyn AdvisoryLockHandle>>>;

    /// Block until the advisory lock is acquired.
    async fn advisory_lock(&self, key: i64) -> MigrateResult<Box<dyn AdvisoryLockHandle>>;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_statement_binding() {
        let stmt = SqlStatement::new("INSERT INTO t (a, b) VALUES ($1, $2)")
            .bind("hello")
            .bind(42_i64);

        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.params[0], SqlValue::Text("hello".to_string()));
        assert_eq!(stmt.params[1], SqlValue::Integer(42));
    }

    #[test]
    fn test_row_access() {
        let row = SqlRow::new(
            vec!["hash".to_string(), "idx".to_string(), "breakpoint".to_string()],
            vec![
                SqlValue::Text("abc".to_string()),
                SqlValue::Integer(3),
                SqlValue::Boolean(true),
            ],
        );

        assert_eq!(row.get_str("hash"), Some("abc"));
        assert_eq!(row.get_i64("idx"), Some(3));
        assert_eq!(row.get_bool("breakpoint"), Some(true));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(SqlValue::from(7_i32), SqlValue::Integer(7));
        assert!(SqlValue::Null.is_null());
        assert_eq!(SqlValue::from("x").as_str(), Some("x"));
    }
}
