//! DDL generation for snapshot diffs.
//!
//! Pure transform: lowering a [`SchemaDiff`] into an ordered statement
//! list plus a [`DataLossCheck`]. Execution belongs to the orchestrator.

use strata_schema::{ColumnDef, ForeignKeyDef, IndexDef, TableDef};

use crate::diff::{ColumnAlterDiff, SchemaDiff, TableAlterDiff};

/// Result of analysing a diff for destructive operations.
#[derive(Debug, Clone, Default)]
pub struct DataLossCheck {
    /// Whether any statement can destroy data.
    pub has_data_loss: bool,
    /// One warning per destructive operation.
    pub warnings: Vec<String>,
    /// Whether an explicit override is required before applying.
    pub requires_confirmation: bool,
}

/// Ordered DDL for one migration, plus its data-loss analysis.
#[derive(Debug, Clone)]
pub struct MigrationSql {
    /// Statements in execution order.
    pub statements: Vec<String>,
    /// Destructive-change analysis of the same diff.
    pub data_loss: DataLossCheck,
}

/// SQL generator for PostgreSQL.
pub struct PostgresSqlGenerator;

impl PostgresSqlGenerator {
    /// Generate ordered DDL for a schema diff.
    ///
    /// Ordering guarantees: schema creation precedes table creation; table
    /// creation precedes column and index alteration; index, constraint
    /// and column drops precede type alterations on the same table; table
    /// drops come last. Foreign keys for new tables are emitted after all
    /// CREATE TABLE statements so intra-batch references resolve.
    pub fn generate(&self, diff: &SchemaDiff) -> MigrationSql {
        let mut statements = Vec::new();

        for schema in &diff.added_schemas {
            if schema != "public" {
                statements.push(self.create_schema(schema));
            }
        }

        for table in &diff.added_tables {
            statements.push(self.create_table(table));
        }

        for table in &diff.added_tables {
            for (name, index) in &table.indexes {
                statements.push(self.create_index(&table.schema, &table.name, name, index));
            }
        }

        for alter in &diff.modified_tables {
            statements.extend(self.alter_table(alter));
        }

        for table in &diff.added_tables {
            for (name, fk) in &table.foreign_keys {
                statements.push(self.add_foreign_key(&table.schema, &table.name, name, fk));
            }
        }

        for name in &diff.removed_tables {
            statements.push(self.drop_table(name));
        }

        MigrationSql {
            statements,
            data_loss: self.check_data_loss(diff),
        }
    }

    /// Scan a diff for operations that can destroy data.
    pub fn check_data_loss(&self, diff: &SchemaDiff) -> DataLossCheck {
        let mut warnings = Vec::new();

        for name in &diff.removed_tables {
            warnings.push(format!("table '{}' and all of its rows will be dropped", name));
        }

        for alter in &diff.modified_tables {
            for column in &alter.removed_columns {
                warnings.push(format!(
                    "column '{}' on table '{}' will be dropped",
                    column, alter.qualified_name
                ));
            }

            for column in &alter.altered_columns {
                if column.type_changed()
                    && !column
                        .previous
                        .column_type
                        .widens_to(&column.current.column_type)
                {
                    warnings.push(format!(
                        "column '{}' on table '{}' narrows from {} to {}; values that do not cast will be lost",
                        column.name,
                        alter.qualified_name,
                        column.previous.column_type.sql(),
                        column.current.column_type.sql()
                    ));
                }
            }
        }

        let has_data_loss = !warnings.is_empty();
        DataLossCheck {
            has_data_loss,
            warnings,
            requires_confirmation: has_data_loss,
        }
    }

    /// Generate CREATE SCHEMA.
    fn create_schema(&self, name: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(name))
    }

    /// Generate CREATE TABLE with inline constraints.
    fn create_table(&self, table: &TableDef) -> String {
        let mut lines = Vec::new();

        for (name, column) in &table.columns {
            lines.push(self.column_definition(name, column));
        }

        let primary_key: Vec<String> = table
            .columns
            .iter()
            .filter(|(_, c)| c.primary_key)
            .map(|(name, _)| quote_ident(name))
            .collect();
        if !primary_key.is_empty() {
            lines.push(format!("PRIMARY KEY ({})", primary_key.join(", ")));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            qualify(&table.schema, &table.name),
            lines.join(",\n    ")
        )
    }

    /// Generate a column definition fragment.
    fn column_definition(&self, name: &str, column: &ColumnDef) -> String {
        let mut parts = vec![quote_ident(name), column.column_type.sql()];

        if !column.nullable && !column.primary_key {
            parts.push("NOT NULL".to_string());
        }

        if column.unique && !column.primary_key {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default));
        }

        parts.join(" ")
    }

    /// Generate ALTER TABLE statements for a modified table.
    ///
    /// Drops run first so type-incompatible alterations never race a
    /// dependent index or constraint on the same column.
    fn alter_table(&self, alter: &TableAlterDiff) -> Vec<String> {
        let (schema, name) = split_qualified(&alter.qualified_name);
        let table = qualify(schema, name);
        let mut statements = Vec::new();

        for index in &alter.removed_indexes {
            statements.push(format!(
                "DROP INDEX IF EXISTS {}.{};",
                quote_ident(schema),
                quote_ident(index)
            ));
        }

        for constraint in &alter.removed_foreign_keys {
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};",
                table,
                quote_ident(constraint)
            ));
        }

        for column in &alter.removed_columns {
            statements.push(format!(
                "ALTER TABLE {} DROP COLUMN IF EXISTS {};",
                table,
                quote_ident(column)
            ));
        }

        for column in &alter.altered_columns {
            statements.extend(self.alter_column(&table, column));
        }

        for (column, definition) in &alter.added_columns {
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
                table,
                self.column_definition(column, definition)
            ));
        }

        for (index, definition) in &alter.added_indexes {
            statements.push(self.create_index(schema, name, index, definition));
        }

        for (constraint, fk) in &alter.added_foreign_keys {
            statements.push(self.add_foreign_key(schema, name, constraint, fk));
        }

        statements
    }

    /// Generate ALTER COLUMN statements.
    fn alter_column(&self, table: &str, column: &ColumnAlterDiff) -> Vec<String> {
        let mut statements = Vec::new();
        let ident = quote_ident(&column.name);

        if column.type_changed() {
            let target = column.current.column_type.sql();
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                table, ident, target, ident, target
            ));
        }

        if column.nullable_changed() {
            if column.current.nullable {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;",
                    table, ident
                ));
            } else {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;",
                    table, ident
                ));
            }
        }

        if column.default_changed() {
            match &column.current.default {
                Some(default) => statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {};",
                    table, ident, default
                )),
                None => statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                    table, ident
                )),
            }
        }

        statements
    }

    /// Generate CREATE INDEX.
    fn create_index(&self, schema: &str, table: &str, name: &str, index: &IndexDef) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        let columns: Vec<String> = index.columns.iter().map(|c| quote_ident(c)).collect();

        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            unique,
            quote_ident(name),
            qualify(schema, table),
            columns.join(", ")
        )
    }

    /// Generate ADD CONSTRAINT for a foreign key.
    fn add_foreign_key(
        &self,
        schema: &str,
        table: &str,
        constraint: &str,
        fk: &ForeignKeyDef,
    ) -> String {
        let columns: Vec<String> = fk.columns.iter().map(|c| quote_ident(c)).collect();
        let referenced: Vec<String> = fk
            .references_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect();

        let on_delete = fk
            .on_delete
            .as_ref()
            .map(|action| format!(" ON DELETE {}", action))
            .unwrap_or_default();

        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){};",
            qualify(schema, table),
            quote_ident(constraint),
            columns.join(", "),
            qualify(schema, &fk.references_table),
            referenced.join(", "),
            on_delete
        )
    }

    /// Generate DROP TABLE.
    fn drop_table(&self, qualified_name: &str) -> String {
        let (schema, name) = split_qualified(qualified_name);
        format!("DROP TABLE IF EXISTS {} CASCADE;", qualify(schema, name))
    }
}

/// Quote a PostgreSQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a qualified `schema.table` pair.
pub(crate) fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Split a qualified name into schema and object name.
pub(crate) fn split_qualified(qualified: &str) -> (&str, &str) {
    match qualified.split_once('.') {
        Some((schema, name)) => (schema, name),
        None => ("public", qualified),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strata_schema::{
        ColumnSpec, ColumnType, ForeignKeySpec, IndexSpec, PluginSchema, ReferentialAction,
        SchemaSnapshot, TableSpec,
    };

    use super::*;
    use crate::diff::SnapshotDiffer;

    fn snapshot(tables: Vec<TableSpec>) -> SchemaSnapshot {
        let schema = PluginSchema {
            tables,
            extensions: Vec::new(),
        };
        SchemaSnapshot::from_schema(&schema).unwrap()
    }

    fn base_table() -> TableSpec {
        TableSpec::new("memories")
            .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key())
            .column(ColumnSpec::new("name", ColumnType::Text))
    }

    #[test]
    fn test_fresh_table_generates_single_create() {
        let current = snapshot(vec![base_table()]);
        let diff = SnapshotDiffer::new(&current).diff();
        let sql = PostgresSqlGenerator.generate(&diff);

        let creates: Vec<_> = sql
            .statements
            .iter()
            .filter(|s| s.starts_with("CREATE TABLE"))
            .collect();
        assert_eq!(creates.len(), 1);
        assert!(creates[0].contains("\"public\".\"memories\""));
        assert!(creates[0].contains("PRIMARY KEY (\"id\")"));
        assert!(!sql.data_loss.has_data_loss);
    }

    #[test]
    fn test_added_column_generates_single_add_column() {
        let previous = snapshot(vec![base_table()]);
        let current = snapshot(vec![
            base_table().column(ColumnSpec::new("age", ColumnType::Integer).nullable()),
        ]);

        let diff = SnapshotDiffer::new(&current).with_previous(&previous).diff();
        let sql = PostgresSqlGenerator.generate(&diff);

        let adds: Vec<_> = sql
            .statements
            .iter()
            .filter(|s| s.contains("ADD COLUMN"))
            .collect();
        assert_eq!(adds.len(), 1);
        assert!(adds[0].contains("\"age\" INTEGER"));
    }

    #[test]
    fn test_schema_creation_precedes_table_creation() {
        let current = snapshot(vec![base_table().in_schema("agent")]);
        let diff = SnapshotDiffer::new(&current).diff();
        let sql = PostgresSqlGenerator.generate(&diff);

        let schema_pos = sql
            .statements
            .iter()
            .position(|s| s.starts_with("CREATE SCHEMA"))
            .unwrap();
        let table_pos = sql
            .statements
            .iter()
            .position(|s| s.starts_with("CREATE TABLE"))
            .unwrap();
        assert!(schema_pos < table_pos);
    }

    #[test]
    fn test_drops_precede_type_alterations() {
        let previous = snapshot(vec![
            base_table()
                .column(ColumnSpec::new("score", ColumnType::Text))
                .column(ColumnSpec::new("stale", ColumnType::Text))
                .index(IndexSpec::on(["stale"])),
        ]);
        let current = snapshot(vec![
            base_table().column(ColumnSpec::new("score", ColumnType::Integer)),
        ]);

        let diff = SnapshotDiffer::new(&current).with_previous(&previous).diff();
        let sql = PostgresSqlGenerator.generate(&diff);

        let drop_index = sql
            .statements
            .iter()
            .position(|s| s.starts_with("DROP INDEX"))
            .unwrap();
        let drop_column = sql
            .statements
            .iter()
            .position(|s| s.contains("DROP COLUMN"))
            .unwrap();
        let alter_type = sql
            .statements
            .iter()
            .position(|s| s.contains("ALTER COLUMN \"score\" TYPE"))
            .unwrap();

        assert!(drop_index < alter_type);
        assert!(drop_column < alter_type);
        assert!(sql.statements[alter_type].contains("USING \"score\"::INTEGER"));
    }

    #[test]
    fn test_narrowing_change_flagged_as_data_loss() {
        let previous = snapshot(vec![
            base_table().column(ColumnSpec::new("score", ColumnType::Text)),
        ]);
        let current = snapshot(vec![
            base_table().column(ColumnSpec::new("score", ColumnType::Integer)),
        ]);

        let diff = SnapshotDiffer::new(&current).with_previous(&previous).diff();
        let check = PostgresSqlGenerator.check_data_loss(&diff);

        assert!(check.has_data_loss);
        assert!(check.requires_confirmation);
        assert!(check.warnings[0].contains("narrows"));
    }

    #[test]
    fn test_widening_change_is_not_data_loss() {
        let previous = snapshot(vec![
            base_table().column(ColumnSpec::new("count", ColumnType::Integer)),
        ]);
        let current = snapshot(vec![
            base_table().column(ColumnSpec::new("count", ColumnType::BigInt)),
        ]);

        let diff = SnapshotDiffer::new(&current).with_previous(&previous).diff();
        let check = PostgresSqlGenerator.check_data_loss(&diff);
        assert!(!check.has_data_loss);
    }

    #[test]
    fn test_dropped_column_flagged_as_data_loss() {
        let previous = snapshot(vec![
            base_table().column(ColumnSpec::new("age", ColumnType::Integer)),
        ]);
        let current = snapshot(vec![base_table()]);

        let diff = SnapshotDiffer::new(&current).with_previous(&previous).diff();
        let sql = PostgresSqlGenerator.generate(&diff);

        assert!(sql.data_loss.has_data_loss);
        assert!(sql.data_loss.warnings[0].contains("'age'"));
        assert!(sql.statements.iter().any(|s| s.contains("DROP COLUMN IF EXISTS \"age\"")));
    }

    #[test]
    fn test_table_drop_comes_last() {
        let previous = snapshot(vec![base_table(), TableSpec::new("rooms").column(
            ColumnSpec::new("id", ColumnType::Uuid).primary_key(),
        )]);
        let current = snapshot(vec![
            base_table().column(ColumnSpec::new("age", ColumnType::Integer).nullable()),
        ]);

        let diff = SnapshotDiffer::new(&current).with_previous(&previous).diff();
        let sql = PostgresSqlGenerator.generate(&diff);

        assert!(sql.statements.last().unwrap().starts_with("DROP TABLE"));
        assert!(sql.data_loss.has_data_loss);
    }

    #[test]
    fn test_foreign_keys_emitted_after_all_creates() {
        let current = snapshot(vec![
            TableSpec::new("rooms").column(ColumnSpec::new("id", ColumnType::Uuid).primary_key()),
            TableSpec::new("memories")
                .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key())
                .column(ColumnSpec::new("room_id", ColumnType::Uuid))
                .foreign_key(
                    ForeignKeySpec::new("room_id", "rooms", "id")
                        .on_delete(ReferentialAction::Cascade),
                ),
        ]);

        let diff = SnapshotDiffer::new(&current).diff();
        let sql = PostgresSqlGenerator.generate(&diff);

        let last_create = sql
            .statements
            .iter()
            .rposition(|s| s.starts_with("CREATE TABLE"))
            .unwrap();
        let fk = sql
            .statements
            .iter()
            .position(|s| s.contains("FOREIGN KEY"))
            .unwrap();

        assert!(fk > last_create);
        assert!(sql.statements[fk].contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("memories"), "\"memories\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_split_qualified() {
        assert_eq!(split_qualified("agent.memories"), ("agent", "memories"));
        assert_eq!(split_qualified("memories"), ("public", "memories"));
    }
}
