//! Structural diffing between schema snapshots.

use strata_schema::{ColumnDef, ForeignKeyDef, IndexDef, SchemaSnapshot, TableDef};

/// A diff between two snapshots.
///
/// Produced only by [`SnapshotDiffer::diff`] and never mutated afterwards.
/// The diff is conservative: anything not explicitly classified as added,
/// removed or altered is unchanged. A missed change is a correctness bug;
/// an extra no-op statement downstream is tolerable.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    /// Database schemas to create.
    pub added_schemas: Vec<String>,
    /// Tables to create.
    pub added_tables: Vec<TableDef>,
    /// Qualified names of tables to drop.
    pub removed_tables: Vec<String>,
    /// Tables to alter.
    pub modified_tables: Vec<TableAlterDiff>,
}

impl SchemaDiff {
    /// Check if there are any differences.
    pub fn is_empty(&self) -> bool {
        self.added_schemas.is_empty()
            && self.added_tables.is_empty()
            && self.removed_tables.is_empty()
            && self.modified_tables.is_empty()
    }

    /// Get a human-readable summary of the diff.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.added_schemas.is_empty() {
            parts.push(format!("Create {} schemas", self.added_schemas.len()));
        }
        if !self.added_tables.is_empty() {
            parts.push(format!("Create {} tables", self.added_tables.len()));
        }
        if !self.removed_tables.is_empty() {
            parts.push(format!("Drop {} tables", self.removed_tables.len()));
        }
        if !self.modified_tables.is_empty() {
            parts.push(format!("Alter {} tables", self.modified_tables.len()));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Alterations to a single table.
#[derive(Debug, Clone)]
pub struct TableAlterDiff {
    /// Qualified table name.
    pub qualified_name: String,
    /// Columns to add, with their definitions.
    pub added_columns: Vec<(String, ColumnDef)>,
    /// Columns to drop.
    pub removed_columns: Vec<String>,
    /// Columns whose definition changed.
    pub altered_columns: Vec<ColumnAlterDiff>,
    /// Indexes to create.
    pub added_indexes: Vec<(String, IndexDef)>,
    /// Indexes to drop.
    pub removed_indexes: Vec<String>,
    /// Foreign keys to add.
    pub added_foreign_keys: Vec<(String, ForeignKeyDef)>,
    /// Foreign keys to drop.
    pub removed_foreign_keys: Vec<String>,
}

impl TableAlterDiff {
    fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.altered_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
            && self.added_foreign_keys.is_empty()
            && self.removed_foreign_keys.is_empty()
    }
}

/// A column whose definition changed between snapshots.
#[derive(Debug, Clone)]
pub struct ColumnAlterDiff {
    /// Column name.
    pub name: String,
    /// Definition in the previous snapshot.
    pub previous: ColumnDef,
    /// Definition in the current snapshot.
    pub current: ColumnDef,
}

impl ColumnAlterDiff {
    /// Whether the column type changed.
    pub fn type_changed(&self) -> bool {
        self.previous.column_type != self.current.column_type
    }

    /// Whether nullability changed.
    pub fn nullable_changed(&self) -> bool {
        self.previous.nullable != self.current.nullable
    }

    /// Whether the default expression changed.
    pub fn default_changed(&self) -> bool {
        self.previous.default != self.current.default
    }
}

/// Differ comparing a previous snapshot against the desired one.
pub struct SnapshotDiffer<'a> {
    /// Last persisted snapshot. `None` means everything is new.
    previous: Option<&'a SchemaSnapshot>,
    /// Desired state.
    current: &'a SchemaSnapshot,
}

impl<'a> SnapshotDiffer<'a> {
    /// Create a differ with only the desired snapshot.
    pub fn new(current: &'a SchemaSnapshot) -> Self {
        Self {
            previous: None,
            current,
        }
    }

    /// Set the previous snapshot.
    pub fn with_previous(mut self, previous: &'a SchemaSnapshot) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Compute the diff.
    pub fn diff(&self) -> SchemaDiff {
        let mut result = SchemaDiff::default();

        let empty = SchemaSnapshot::empty();
        let previous = self.previous.unwrap_or(&empty);

        for schema in &self.current.schemas {
            if !previous.schemas.contains(schema) {
                result.added_schemas.push(schema.clone());
            }
        }

        for (name, table) in &self.current.tables {
            if !previous.tables.contains_key(name) {
                result.added_tables.push(table.clone());
            }
        }

        for name in previous.tables.keys() {
            if !self.current.tables.contains_key(name) {
                result.removed_tables.push(name.clone());
            }
        }

        for (name, current_table) in &self.current.tables {
            if let Some(previous_table) = previous.tables.get(name)
                && let Some(alter) = diff_tables(previous_table, current_table)
            {
                result.modified_tables.push(alter);
            }
        }

        result
    }
}

/// Diff two table definitions and return alterations if any.
fn diff_tables(previous: &TableDef, current: &TableDef) -> Option<TableAlterDiff> {
    let mut alter = TableAlterDiff {
        qualified_name: current.qualified_name(),
        added_columns: Vec::new(),
        removed_columns: Vec::new(),
        altered_columns: Vec::new(),
        added_indexes: Vec::new(),
        removed_indexes: Vec::new(),
        added_foreign_keys: Vec::new(),
        removed_foreign_keys: Vec::new(),
    };

    for (name, column) in &current.columns {
        match previous.columns.get(name) {
            None => alter.added_columns.push((name.clone(), column.clone())),
            Some(previous_column) if previous_column != column => {
                alter.altered_columns.push(ColumnAlterDiff {
                    name: name.clone(),
                    previous: previous_column.clone(),
                    current: column.clone(),
                });
            }
            Some(_) => {}
        }
    }

    for name in previous.columns.keys() {
        if !current.columns.contains_key(name) {
            alter.removed_columns.push(name.clone());
        }
    }

    for (name, index) in &current.indexes {
        match previous.indexes.get(name) {
            None => alter.added_indexes.push((name.clone(), index.clone())),
            Some(previous_index) if previous_index != index => {
                // An index definition change is a drop-and-recreate.
                alter.removed_indexes.push(name.clone());
                alter.added_indexes.push((name.clone(), index.clone()));
            }
            Some(_) => {}
        }
    }

    for name in previous.indexes.keys() {
        if !current.indexes.contains_key(name) {
            alter.removed_indexes.push(name.clone());
        }
    }

    for (name, fk) in &current.foreign_keys {
        match previous.foreign_keys.get(name) {
            None => alter.added_foreign_keys.push((name.clone(), fk.clone())),
            Some(previous_fk) if previous_fk != fk => {
                alter.removed_foreign_keys.push(name.clone());
                alter.added_foreign_keys.push((name.clone(), fk.clone()));
            }
            Some(_) => {}
        }
    }

    for name in previous.foreign_keys.keys() {
        if !current.foreign_keys.contains_key(name) {
            alter.removed_foreign_keys.push(name.clone());
        }
    }

    if alter.is_empty() { None } else { Some(alter) }
}
