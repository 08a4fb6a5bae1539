//! Live-database introspection for the upgrade path.
//!
//! When a plugin has live tables but no persisted snapshot (an upgrade
//! from a version that predates snapshot bookkeeping), the orchestrator
//! reads the database's own metadata and reconstructs a baseline snapshot
//! to diff against. Only tables the current schema declares are adopted:
//! tables belonging to other plugins that share the namespace are never
//! treated as this plugin's orphans.

use std::collections::BTreeSet;
use std::sync::Arc;

use strata_schema::{ColumnDef, ColumnType, IndexDef, SchemaSnapshot, TableDef};
use tracing::debug;

use crate::driver::MigrationDriver;
use crate::error::MigrateResult;

/// Base tables in one schema.
pub const SELECT_TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name";

/// Columns of one table, in ordinal order.
pub const SELECT_COLUMNS_SQL: &str = "SELECT column_name, udt_name, is_nullable, column_default \
     FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

/// Index membership of one table.
pub const SELECT_INDEXES_SQL: &str = "SELECT i.relname AS index_name, a.attname AS column_name, \
     ix.indisunique AS is_unique, ix.indisprimary AS is_primary \
     FROM pg_class t \
     JOIN pg_namespace n ON n.oid = t.relnamespace \
     JOIN pg_index ix ON t.oid = ix.indrelid \
     JOIN pg_class i ON i.oid = ix.indexrelid \
     JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
     WHERE n.nspname = $1 AND t.relname = $2 \
     ORDER BY i.relname, a.attnum";

/// Bookkeeping tables are never part of a plugin baseline.
const BOOKKEEPING_TABLES: &[&str] = &["_strata_migrations", "_strata_journal", "_strata_snapshots"];

/// A live table left out of the baseline.
#[derive(Debug, Clone)]
pub struct SkippedTable {
    /// Qualified table name.
    pub qualified_name: String,
    /// Why it was skipped.
    pub reason: String,
    /// Whether the table carries the reserved tenant-isolation column.
    /// The orchestrator flags these instead of silently ignoring the
    /// collision.
    pub carries_tenant_column: bool,
}

/// Result of introspecting the live database for a plugin.
#[derive(Debug, Clone)]
pub struct IntrospectionOutcome {
    /// Baseline snapshot of the declared tables that exist live.
    pub snapshot: SchemaSnapshot,
    /// Live tables in the same schemas that were not adopted.
    pub skipped: Vec<SkippedTable>,
}

/// Reads live metadata through the driver and rebuilds a snapshot.
pub struct SchemaIntrospector {
    driver: Arc<dyn MigrationDriver>,
}

impl SchemaIntrospector {
    /// Create an introspector over a driver.
    pub fn new(driver: Arc<dyn MigrationDriver>) -> Self {
        Self { driver }
    }

    /// Build a baseline snapshot of the live tables in `schemas` whose
    /// qualified names appear in `declared`.
    pub async fn snapshot_of(
        &self,
        schemas: &BTreeSet<String>,
        declared: &BTreeSet<String>,
        tenant_column: &str,
    ) -> MigrateResult<IntrospectionOutcome> {
        let mut snapshot = SchemaSnapshot::empty();
        let mut skipped = Vec::new();

        for schema in schemas {
            let rows = self
                .driver
                .query(SELECT_TABLES_SQL, &[schema.as_str().into()])
                .await?;

            for row in rows {
                let Some(table) = row.get_str("table_name") else {
                    continue;
                };
                if BOOKKEEPING_TABLES.contains(&table) {
                    continue;
                }

                let qualified = format!("{}.{}", schema, table);
                let columns = self.read_columns(schema, table).await?;

                if !declared.contains(&qualified) {
                    skipped.push(SkippedTable {
                        carries_tenant_column: columns
                            .iter()
                            .any(|(name, _)| name == tenant_column),
                        qualified_name: qualified,
                        reason: "not declared by the migrating plugin".to_string(),
                    });
                    continue;
                }

                let table_def = self.build_table(schema, table, columns).await?;
                snapshot.schemas.insert(schema.clone());
                snapshot.tables.insert(qualified, table_def);
            }
        }

        debug!(
            adopted = snapshot.tables.len(),
            skipped = skipped.len(),
            "live-schema introspection complete"
        );

        Ok(IntrospectionOutcome { snapshot, skipped })
    }

    async fn read_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> MigrateResult<Vec<(String, ColumnDef)>> {
        let rows = self
            .driver
            .query(SELECT_COLUMNS_SQL, &[schema.into(), table.into()])
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get_str("column_name")?.to_string();
                let column_type = ColumnType::from_udt_name(row.get_str("udt_name").unwrap_or(""));
                Some((
                    name,
                    ColumnDef {
                        column_type,
                        nullable: row.get_str("is_nullable") == Some("YES"),
                        default: row.get_str("column_default").map(String::from),
                        primary_key: false,
                        unique: false,
                    },
                ))
            })
            .collect())
    }

    async fn build_table(
        &self,
        schema: &str,
        table: &str,
        columns: Vec<(String, ColumnDef)>,
    ) -> MigrateResult<TableDef> {
        let mut table_def = TableDef {
            schema: schema.to_string(),
            name: table.to_string(),
            columns: columns.into_iter().collect(),
            indexes: Default::default(),
            foreign_keys: Default::default(),
        };

        let rows = self
            .driver
            .query(SELECT_INDEXES_SQL, &[schema.into(), table.into()])
            .await?;

        for row in &rows {
            let Some(index) = row.get_str("index_name") else {
                continue;
            };
            let Some(column) = row.get_str("column_name") else {
                continue;
            };
            let is_unique = row.get_bool("is_unique").unwrap_or(false);
            let is_primary = row.get_bool("is_primary").unwrap_or(false);

            if is_primary {
                if let Some(def) = table_def.columns.get_mut(column) {
                    def.primary_key = true;
                }
                continue;
            }

            // Implicit single-column unique constraints surface on the
            // column, matching how declared schemas are normalized.
            if is_unique && index == format!("{}_{}_key", table, column) {
                if let Some(def) = table_def.columns.get_mut(column) {
                    def.unique = true;
                }
                continue;
            }

            table_def
                .indexes
                .entry(index.to_string())
                .and_modify(|def: &mut IndexDef| def.columns.push(column.to_string()))
                .or_insert_with(|| IndexDef {
                    columns: vec![column.to_string()],
                    unique: is_unique,
                });
        }

        Ok(table_def)
    }
}
