//! Content-addressed schema snapshots.
//!
//! A [`SchemaSnapshot`] is the canonical, ordering-independent description
//! of a plugin's tables at one point in time. Snapshots are pure functions
//! of the schema definition: no timestamps, no declaration-order
//! dependence, so structurally identical schemas always hash identically.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SchemaResult;
use crate::spec::{ColumnType, PluginSchema};

/// Normalized structural description of a plugin's tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Tables keyed by qualified name (`schema.table`).
    pub tables: BTreeMap<String, TableDef>,
    /// Database schemas referenced by the tables.
    pub schemas: BTreeSet<String>,
}

/// Normalized table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Schema the table lives in.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Columns keyed by name.
    pub columns: BTreeMap<String, ColumnDef>,
    /// Indexes keyed by resolved name.
    pub indexes: BTreeMap<String, IndexDef>,
    /// Foreign keys keyed by constraint name.
    pub foreign_keys: BTreeMap<String, ForeignKeyDef>,
}

impl TableDef {
    /// `schema.table` qualified name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Whether the table defines the given column.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }
}

/// Normalized column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression, rendered as SQL.
    pub default: Option<String>,
    /// Whether the column is (part of) the primary key.
    pub primary_key: bool,
    /// Whether the column carries a UNIQUE constraint.
    pub unique: bool,
}

/// Normalized index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
}

/// Normalized foreign key definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table (unqualified).
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
    /// ON DELETE action, rendered as SQL.
    pub on_delete: Option<String>,
}

impl SchemaSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from a schema definition.
    ///
    /// Validates the definition first; malformed input never yields a
    /// partial snapshot.
    pub fn from_schema(schema: &PluginSchema) -> SchemaResult<Self> {
        schema.validate()?;

        let mut tables = BTreeMap::new();
        let mut schemas = BTreeSet::new();

        for table in &schema.tables {
            schemas.insert(table.schema_name().to_string());

            let columns = table
                .columns
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        ColumnDef {
                            column_type: c.column_type,
                            nullable: c.nullable,
                            default: c.default.as_ref().map(|d| d.sql()),
                            primary_key: c.primary_key,
                            unique: c.unique,
                        },
                    )
                })
                .collect();

            let indexes = table
                .indexes
                .iter()
                .map(|i| {
                    (
                        i.resolved_name(&table.name),
                        IndexDef {
                            columns: i.columns.clone(),
                            unique: i.unique,
                        },
                    )
                })
                .collect();

            let foreign_keys = table
                .foreign_keys
                .iter()
                .map(|fk| {
                    (
                        fk.constraint_name(&table.name),
                        ForeignKeyDef {
                            columns: fk.columns.clone(),
                            references_table: fk.references_table.clone(),
                            references_columns: fk.references_columns.clone(),
                            on_delete: fk.on_delete.map(|a| a.sql().to_string()),
                        },
                    )
                })
                .collect();

            tables.insert(
                table.qualified_name(),
                TableDef {
                    schema: table.schema_name().to_string(),
                    name: table.name.clone(),
                    columns,
                    indexes,
                    foreign_keys,
                },
            );
        }

        Ok(Self { tables, schemas })
    }

    /// Content digest of the snapshot.
    ///
    /// Two snapshots hash identically exactly when diffing them yields no
    /// actionable changes.
    pub fn hash(&self) -> SchemaResult<String> {
        let canonical = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&canonical);
        Ok(hex::encode(digest))
    }

    /// Serialize the snapshot for persistence.
    pub fn to_json(&self) -> SchemaResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a persisted snapshot.
    pub fn from_json(json: &str) -> SchemaResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether the snapshot holds no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look up a table by qualified name.
    pub fn get_table(&self, qualified_name: &str) -> Option<&TableDef> {
        self.tables.get(qualified_name)
    }
}
