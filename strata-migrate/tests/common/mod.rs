//! In-memory `MigrationDriver` used by the integration tests.
//!
//! Interprets the crate's published bookkeeping and introspection SQL so
//! the whole orchestrator pipeline can run without a database. DDL
//! statements are recorded verbatim for assertions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_migrate::driver::{
    AdvisoryLockHandle, MigrationDriver, SqlRow, SqlStatement, SqlValue,
};
use strata_migrate::error::{MigrateResult, MigrationError};
use strata_migrate::{history, introspect};
use tokio::sync::Mutex as AsyncMutex;

/// A live table visible to the introspection queries.
#[derive(Debug, Clone)]
pub struct LiveTable {
    pub name: String,
    /// (column name, udt name, nullable, default)
    pub columns: Vec<(String, String, bool, Option<String>)>,
}

#[derive(Default)]
struct State {
    /// (plugin, hash, applied_at)
    migrations: Vec<(String, String, i64)>,
    /// (plugin, idx, tag, breakpoint)
    journal: Vec<(String, i32, String, bool)>,
    /// (plugin, idx, snapshot json)
    snapshots: Vec<(String, i32, String)>,
    /// Non-bookkeeping statements executed inside transactions.
    ddl: Vec<String>,
    /// Batches executed outside transactions.
    batches: Vec<String>,
    /// Live tables per schema, for the bootstrap path.
    live_tables: HashMap<String, Vec<LiveTable>>,
    /// Fail any transaction containing this substring.
    fail_marker: Option<String>,
}

pub struct MemoryDriver {
    state: Mutex<State>,
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
    supports_locks: bool,
}

impl MemoryDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            locks: Mutex::new(HashMap::new()),
            supports_locks: true,
        })
    }

    /// Behave like an embedded single-process engine.
    pub fn without_locks() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            locks: Mutex::new(HashMap::new()),
            supports_locks: false,
        })
    }

    pub fn add_live_table(&self, schema: &str, table: LiveTable) {
        self.state
            .lock()
            .unwrap()
            .live_tables
            .entry(schema.to_string())
            .or_default()
            .push(table);
    }

    pub fn fail_transactions_containing(&self, marker: &str) {
        self.state.lock().unwrap().fail_marker = Some(marker.to_string());
    }

    pub fn migrations(&self, plugin: &str) -> Vec<(String, i64)> {
        self.state
            .lock()
            .unwrap()
            .migrations
            .iter()
            .filter(|(p, _, _)| p == plugin)
            .map(|(_, hash, at)| (hash.clone(), *at))
            .collect()
    }

    pub fn journal(&self, plugin: &str) -> Vec<(i32, String, bool)> {
        self.state
            .lock()
            .unwrap()
            .journal
            .iter()
            .filter(|(p, _, _, _)| p == plugin)
            .map(|(_, idx, tag, bp)| (*idx, tag.clone(), *bp))
            .collect()
    }

    pub fn snapshots(&self, plugin: &str) -> Vec<(i32, String)> {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .filter(|(p, _, _)| p == plugin)
            .map(|(_, idx, json)| (*idx, json.clone()))
            .collect()
    }

    pub fn ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().ddl.clone()
    }

    pub fn batches(&self) -> Vec<String> {
        self.state.lock().unwrap().batches.clone()
    }

    fn lock_cell(&self, key: i64) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn text_param(params: &[SqlValue], idx: usize) -> String {
        params
            .get(idx)
            .and_then(SqlValue::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

struct MemoryLockHandle {
    key: i64,
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

#[async_trait]
impl AdvisoryLockHandle for MemoryLockHandle {
    fn key(&self) -> i64 {
        self.key
    }

    async fn release(self: Box<Self>) -> MigrateResult<()> {
        Ok(())
    }
}

#[async_trait]
impl MigrationDriver for MemoryDriver {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> MigrateResult<Vec<SqlRow>> {
        let state = self.state.lock().unwrap();
        let plugin = Self::text_param(params, 0);

        let rows = match sql {
            s if s == history::SELECT_LATEST_HASH_SQL => state
                .migrations
                .iter()
                .filter(|(p, _, _)| *p == plugin)
                .next_back()
                .map(|(_, hash, _)| {
                    vec![SqlRow::new(
                        vec!["hash".to_string()],
                        vec![SqlValue::Text(hash.clone())],
                    )]
                })
                .unwrap_or_default(),
            s if s == history::SELECT_LAST_MIGRATION_SQL => state
                .migrations
                .iter()
                .filter(|(p, _, _)| *p == plugin)
                .next_back()
                .map(|(_, hash, at)| {
                    vec![SqlRow::new(
                        vec!["hash".to_string(), "applied_at".to_string()],
                        vec![SqlValue::Text(hash.clone()), SqlValue::Integer(*at)],
                    )]
                })
                .unwrap_or_default(),
            s if s == history::SELECT_JOURNAL_SQL => {
                let mut entries: Vec<_> = state
                    .journal
                    .iter()
                    .filter(|(p, _, _, _)| *p == plugin)
                    .collect();
                entries.sort_by_key(|(_, idx, _, _)| *idx);
                entries
                    .into_iter()
                    .map(|(_, idx, tag, breakpoint)| {
                        SqlRow::new(
                            vec![
                                "idx".to_string(),
                                "tag".to_string(),
                                "breakpoint".to_string(),
                            ],
                            vec![
                                SqlValue::Integer(i64::from(*idx)),
                                SqlValue::Text(tag.clone()),
                                SqlValue::Boolean(*breakpoint),
                            ],
                        )
                    })
                    .collect()
            }
            s if s == history::SELECT_SNAPSHOT_COUNT_SQL => {
                let count = state
                    .snapshots
                    .iter()
                    .filter(|(p, _, _)| *p == plugin)
                    .count() as i64;
                vec![SqlRow::new(
                    vec!["count".to_string()],
                    vec![SqlValue::Integer(count)],
                )]
            }
            s if s == history::SELECT_LATEST_SNAPSHOT_SQL => state
                .snapshots
                .iter()
                .filter(|(p, _, _)| *p == plugin)
                .max_by_key(|(_, idx, _)| *idx)
                .map(|(_, idx, json)| {
                    vec![SqlRow::new(
                        vec!["idx".to_string(), "snapshot".to_string()],
                        vec![
                            SqlValue::Integer(i64::from(*idx)),
                            SqlValue::Text(json.clone()),
                        ],
                    )]
                })
                .unwrap_or_default(),
            s if s == introspect::SELECT_TABLES_SQL => {
                let schema = Self::text_param(params, 0);
                state
                    .live_tables
                    .get(&schema)
                    .map(|tables| {
                        tables
                            .iter()
                            .map(|t| {
                                SqlRow::new(
                                    vec!["table_name".to_string()],
                                    vec![SqlValue::Text(t.name.clone())],
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
            s if s == introspect::SELECT_COLUMNS_SQL => {
                let schema = Self::text_param(params, 0);
                let table = Self::text_param(params, 1);
                state
                    .live_tables
                    .get(&schema)
                    .and_then(|tables| tables.iter().find(|t| t.name == table))
                    .map(|t| {
                        t.columns
                            .iter()
                            .map(|(name, udt, nullable, default)| {
                                SqlRow::new(
                                    vec![
                                        "column_name".to_string(),
                                        "udt_name".to_string(),
                                        "is_nullable".to_string(),
                                        "column_default".to_string(),
                                    ],
                                    vec![
                                        SqlValue::Text(name.clone()),
                                        SqlValue::Text(udt.clone()),
                                        SqlValue::Text(
                                            if *nullable { "YES" } else { "NO" }.to_string(),
                                        ),
                                        default
                                            .clone()
                                            .map(SqlValue::Text)
                                            .unwrap_or(SqlValue::Null),
                                    ],
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            }
            s if s == introspect::SELECT_INDEXES_SQL => Vec::new(),
            _ => Vec::new(),
        };

        Ok(rows)
    }

    async fn execute(&self, sql: &str, _params: &[SqlValue]) -> MigrateResult<u64> {
        self.state.lock().unwrap().ddl.push(sql.to_string());
        Ok(0)
    }

    async fn execute_batch(&self, sql: &str) -> MigrateResult<()> {
        self.state.lock().unwrap().batches.push(sql.to_string());
        Ok(())
    }

    async fn execute_transaction(&self, statements: &[SqlStatement]) -> MigrateResult<()> {
        let mut state = self.state.lock().unwrap();

        if let Some(marker) = state.fail_marker.clone() {
            if statements.iter().any(|s| s.sql.contains(&marker)) {
                return Err(MigrationError::database(format!(
                    "simulated failure on statement containing '{}'",
                    marker
                )));
            }
        }

        for statement in statements {
            match statement.sql.as_str() {
                s if s == history::INSERT_MIGRATION_SQL => {
                    state.migrations.push((
                        Self::text_param(&statement.params, 0),
                        Self::text_param(&statement.params, 1),
                        statement.params.get(2).and_then(SqlValue::as_i64).unwrap_or(0),
                    ));
                }
                s if s == history::INSERT_JOURNAL_SQL => {
                    state.journal.push((
                        Self::text_param(&statement.params, 0),
                        statement.params.get(1).and_then(SqlValue::as_i64).unwrap_or(0) as i32,
                        Self::text_param(&statement.params, 2),
                        statement
                            .params
                            .get(3)
                            .and_then(SqlValue::as_bool)
                            .unwrap_or(false),
                    ));
                }
                s if s == history::INSERT_SNAPSHOT_SQL => {
                    state.snapshots.push((
                        Self::text_param(&statement.params, 0),
                        statement.params.get(1).and_then(SqlValue::as_i64).unwrap_or(0) as i32,
                        Self::text_param(&statement.params, 2),
                    ));
                }
                s if s == history::DELETE_MIGRATIONS_SQL => {
                    let plugin = Self::text_param(&statement.params, 0);
                    state.migrations.retain(|(p, _, _)| *p != plugin);
                }
                s if s == history::DELETE_JOURNAL_SQL => {
                    let plugin = Self::text_param(&statement.params, 0);
                    state.journal.retain(|(p, _, _, _)| *p != plugin);
                }
                s if s == history::DELETE_SNAPSHOTS_SQL => {
                    let plugin = Self::text_param(&statement.params, 0);
                    state.snapshots.retain(|(p, _, _)| *p != plugin);
                }
                other => state.ddl.push(other.to_string()),
            }
        }

        Ok(())
    }

    fn supports_advisory_locks(&self) -> bool {
        self.supports_locks
    }

    async fn try_advisory_lock(
        &self,
        key: i64,
    ) -> MigrateResult<Option<Box<dyn AdvisoryLockHandle>>> {
        let cell = self.lock_cell(key);
        match cell.try_lock_owned() {
            Ok(guard) => Ok(Some(Box::new(MemoryLockHandle { key, _guard: guard }))),
            Err(_) => Ok(None),
        }
    }

    async fn advisory_lock(&self, key: i64) -> MigrateResult<Box<dyn AdvisoryLockHandle>> {
        let cell = self.lock_cell(key);
        let guard = cell.lock_owned().await;
        Ok(Box::new(MemoryLockHandle { key, _guard: guard }))
    }
}
