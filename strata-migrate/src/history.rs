//! Migration bookkeeping: tracker, journal and snapshot storage.
//!
//! Three tables back the engine. `_strata_migrations` records one row per
//! successful migration (the latest row per plugin is the tracker's fast
//! no-op check). `_strata_journal` is the append-only journal of applied
//! migrations. `_strata_snapshots` stores the serialized snapshot each
//! journal entry corresponds to.
//!
//! Reads go straight through the driver. Writes are *generated* as
//! parameterized statements so the orchestrator can execute them inside
//! the same transaction as the DDL they describe.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strata_schema::SchemaSnapshot;

use crate::driver::{MigrationDriver, SqlStatement};
use crate::error::{MigrateResult, MigrationError};

/// SQL for initializing the bookkeeping tables.
pub const POSTGRES_INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "_strata_migrations" (
    id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    plugin_name TEXT NOT NULL,
    hash VARCHAR(64) NOT NULL,
    applied_at BIGINT NOT NULL
);

CREATE INDEX IF NOT EXISTS "_strata_migrations_plugin_idx"
    ON "_strata_migrations" (plugin_name, id DESC);

CREATE TABLE IF NOT EXISTS "_strata_journal" (
    plugin_name TEXT NOT NULL,
    idx INTEGER NOT NULL,
    tag TEXT NOT NULL,
    breakpoint BOOLEAN NOT NULL DEFAULT FALSE,
    PRIMARY KEY (plugin_name, idx)
);

CREATE TABLE IF NOT EXISTS "_strata_snapshots" (
    plugin_name TEXT NOT NULL,
    idx INTEGER NOT NULL,
    snapshot TEXT NOT NULL,
    PRIMARY KEY (plugin_name, idx)
);
"#;

/// Tracker read: latest recorded hash for a plugin.
pub const SELECT_LATEST_HASH_SQL: &str =
    "SELECT hash FROM \"_strata_migrations\" WHERE plugin_name = $1 ORDER BY id DESC LIMIT 1";

/// Tracker read: latest full migration record for a plugin.
pub const SELECT_LAST_MIGRATION_SQL: &str =
    "SELECT hash, applied_at FROM \"_strata_migrations\" WHERE plugin_name = $1 ORDER BY id DESC LIMIT 1";

/// Journal read, oldest first.
pub const SELECT_JOURNAL_SQL: &str =
    "SELECT idx, tag, breakpoint FROM \"_strata_journal\" WHERE plugin_name = $1 ORDER BY idx";

/// Snapshot count for a plugin.
pub const SELECT_SNAPSHOT_COUNT_SQL: &str =
    "SELECT COUNT(*)::BIGINT AS count FROM \"_strata_snapshots\" WHERE plugin_name = $1";

/// Latest persisted snapshot for a plugin.
pub const SELECT_LATEST_SNAPSHOT_SQL: &str =
    "SELECT idx, snapshot FROM \"_strata_snapshots\" WHERE plugin_name = $1 ORDER BY idx DESC LIMIT 1";

/// Tracker write.
pub const INSERT_MIGRATION_SQL: &str =
    "INSERT INTO \"_strata_migrations\" (plugin_name, hash, applied_at) VALUES ($1, $2, $3)";

/// Journal append.
pub const INSERT_JOURNAL_SQL: &str =
    "INSERT INTO \"_strata_journal\" (plugin_name, idx, tag, breakpoint) VALUES ($1, $2, $3, $4)";

/// Snapshot write.
pub const INSERT_SNAPSHOT_SQL: &str =
    "INSERT INTO \"_strata_snapshots\" (plugin_name, idx, snapshot) VALUES ($1, $2, $3)";

/// History deletion, one statement per table (development-only reset).
pub const DELETE_MIGRATIONS_SQL: &str =
    "DELETE FROM \"_strata_migrations\" WHERE plugin_name = $1";
/// See [`DELETE_MIGRATIONS_SQL`].
pub const DELETE_JOURNAL_SQL: &str = "DELETE FROM \"_strata_journal\" WHERE plugin_name = $1";
/// See [`DELETE_MIGRATIONS_SQL`].
pub const DELETE_SNAPSHOTS_SQL: &str = "DELETE FROM \"_strata_snapshots\" WHERE plugin_name = $1";

/// A record of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Plugin the migration belongs to.
    pub plugin_name: String,
    /// Snapshot hash the migration produced.
    pub hash: String,
    /// Application time, unix milliseconds.
    pub applied_at_ms: i64,
}

impl MigrationRecord {
    /// Application time as a timestamp.
    pub fn applied_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.applied_at_ms).single()
    }
}

/// One append-only journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Plugin the entry belongs to.
    pub plugin_name: String,
    /// Monotonic index per plugin.
    pub idx: i32,
    /// Entry tag (`{idx}_{hash prefix}`).
    pub tag: String,
    /// Whether the entry marks a breakpoint.
    pub breakpoint: bool,
}

impl JournalEntry {
    /// Create the next journal entry for a plugin.
    pub fn next(plugin_name: impl Into<String>, idx: i32, hash: &str) -> Self {
        let prefix: String = hash.chars().take(12).collect();
        Self {
            plugin_name: plugin_name.into(),
            idx,
            tag: format!("{:04}_{}", idx, prefix),
            breakpoint: false,
        }
    }
}

/// Repository over the three bookkeeping tables.
pub struct HistoryRepository {
    driver: Arc<dyn MigrationDriver>,
}

impl HistoryRepository {
    /// Create a repository over a driver.
    pub fn new(driver: Arc<dyn MigrationDriver>) -> Self {
        Self { driver }
    }

    /// Ensure the bookkeeping tables exist. Idempotent.
    pub async fn ensure_tables(&self) -> MigrateResult<()> {
        self.driver.execute_batch(POSTGRES_INIT_SQL).await
    }

    /// Latest recorded hash for a plugin, if any migration has run.
    pub async fn latest_hash(&self, plugin: &str) -> MigrateResult<Option<String>> {
        let rows = self
            .driver
            .query(SELECT_LATEST_HASH_SQL, &[plugin.into()])
            .await?;

        Ok(rows
            .first()
            .and_then(|row| row.get_str("hash").map(String::from)))
    }

    /// Latest full migration record for a plugin.
    pub async fn last_migration(&self, plugin: &str) -> MigrateResult<Option<MigrationRecord>> {
        let rows = self
            .driver
            .query(SELECT_LAST_MIGRATION_SQL, &[plugin.into()])
            .await?;

        Ok(rows.first().map(|row| MigrationRecord {
            plugin_name: plugin.to_string(),
            hash: row.get_str("hash").unwrap_or_default().to_string(),
            applied_at_ms: row.get_i64("applied_at").unwrap_or_default(),
        }))
    }

    /// Full journal for a plugin, oldest first.
    pub async fn journal(&self, plugin: &str) -> MigrateResult<Vec<JournalEntry>> {
        let rows = self
            .driver
            .query(SELECT_JOURNAL_SQL, &[plugin.into()])
            .await?;

        Ok(rows
            .iter()
            .map(|row| JournalEntry {
                plugin_name: plugin.to_string(),
                idx: row.get_i64("idx").unwrap_or_default() as i32,
                tag: row.get_str("tag").unwrap_or_default().to_string(),
                breakpoint: row.get_bool("breakpoint").unwrap_or_default(),
            })
            .collect())
    }

    /// Index the next journal entry should use.
    pub async fn next_journal_idx(&self, plugin: &str) -> MigrateResult<i32> {
        let journal = self.journal(plugin).await?;
        Ok(journal.last().map(|entry| entry.idx + 1).unwrap_or(0))
    }

    /// Number of persisted snapshots for a plugin.
    pub async fn snapshot_count(&self, plugin: &str) -> MigrateResult<i64> {
        let rows = self
            .driver
            .query(SELECT_SNAPSHOT_COUNT_SQL, &[plugin.into()])
            .await?;

        Ok(rows.first().and_then(|row| row.get_i64("count")).unwrap_or(0))
    }

    /// Latest persisted snapshot for a plugin, with its index.
    pub async fn latest_snapshot(
        &self,
        plugin: &str,
    ) -> MigrateResult<Option<(i32, SchemaSnapshot)>> {
        let rows = self
            .driver
            .query(SELECT_LATEST_SNAPSHOT_SQL, &[plugin.into()])
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let idx = row.get_i64("idx").unwrap_or_default() as i32;
        let json = row.get_str("snapshot").unwrap_or_default();
        let snapshot =
            SchemaSnapshot::from_json(json).map_err(|e| MigrationError::CorruptSnapshot {
                plugin: plugin.to_string(),
                idx,
                message: e.to_string(),
            })?;

        Ok(Some((idx, snapshot)))
    }

    /// Statements recording a successful migration: tracker row, journal
    /// entry and snapshot. Executed by the orchestrator inside the same
    /// transaction as the DDL.
    pub fn record_statements(
        &self,
        entry: &JournalEntry,
        hash: &str,
        snapshot_idx: i32,
        snapshot_json: &str,
        applied_at_ms: i64,
    ) -> Vec<SqlStatement> {
        vec![
            SqlStatement::new(INSERT_MIGRATION_SQL)
                .bind(entry.plugin_name.as_str())
                .bind(hash)
                .bind(applied_at_ms),
            SqlStatement::new(INSERT_JOURNAL_SQL)
                .bind(entry.plugin_name.as_str())
                .bind(entry.idx)
                .bind(entry.tag.as_str())
                .bind(entry.breakpoint),
            SqlStatement::new(INSERT_SNAPSHOT_SQL)
                .bind(entry.plugin_name.as_str())
                .bind(snapshot_idx)
                .bind(snapshot_json),
        ]
    }

    /// Statement persisting a bootstrap baseline snapshot at index 0.
    pub fn baseline_statement(&self, plugin: &str, snapshot_json: &str) -> SqlStatement {
        SqlStatement::new(INSERT_SNAPSHOT_SQL)
            .bind(plugin)
            .bind(0_i32)
            .bind(snapshot_json)
    }

    /// Delete all tracked history for a plugin. Irreversible.
    pub async fn reset(&self, plugin: &str) -> MigrateResult<()> {
        let statements = [
            SqlStatement::new(DELETE_MIGRATIONS_SQL).bind(plugin),
            SqlStatement::new(DELETE_JOURNAL_SQL).bind(plugin),
            SqlStatement::new(DELETE_SNAPSHOTS_SQL).bind(plugin),
        ];
        self.driver.execute_transaction(&statements).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_init_sql_declares_all_tables() {
        assert!(POSTGRES_INIT_SQL.contains("_strata_migrations"));
        assert!(POSTGRES_INIT_SQL.contains("_strata_journal"));
        assert!(POSTGRES_INIT_SQL.contains("_strata_snapshots"));
        assert!(POSTGRES_INIT_SQL.contains("breakpoint"));
    }

    #[test]
    fn test_journal_entry_tag() {
        let entry = JournalEntry::next("memory", 3, "abcdef0123456789");
        assert_eq!(entry.idx, 3);
        assert_eq!(entry.tag, "0003_abcdef012345");
        assert!(!entry.breakpoint);
    }

    #[test]
    fn test_migration_record_timestamp() {
        let record = MigrationRecord {
            plugin_name: "memory".to_string(),
            hash: "abc".to_string(),
            applied_at_ms: 1_700_000_000_000,
        };
        let at = record.applied_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_000);
    }
}
