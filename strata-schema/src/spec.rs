//! Typed schema definitions.
//!
//! A plugin describes its tables through [`PluginSchema`], a strongly-typed
//! intermediate representation built with the builder methods below. The
//! diff and SQL layers never see anything looser than these structs; all
//! validation happens here, at the boundary.

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

/// Maximum identifier length accepted by PostgreSQL.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a SQL identifier (table, column, index or schema name).
pub fn validate_identifier(name: &str) -> SchemaResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');

    if !valid_start
        || name.len() > MAX_IDENTIFIER_LEN
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(SchemaError::InvalidIdentifier(name.to_string()));
    }

    Ok(())
}

/// The declarative schema of one plugin: tables plus the database
/// extensions those tables require.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSchema {
    /// Tables owned by the plugin.
    pub tables: Vec<TableSpec>,
    /// Extensions that must exist before the tables can be created
    /// (e.g. "vector", "fuzzystrmatch").
    pub extensions: Vec<String>,
}

impl PluginSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn table(mut self, table: TableSpec) -> Self {
        self.tables.push(table);
        self
    }

    /// Require a database extension.
    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    /// Qualified names of every declared table.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.qualified_name()).collect()
    }

    /// Validate the whole schema definition.
    ///
    /// Malformed input is a fatal configuration error; nothing downstream
    /// runs until the definition passes.
    pub fn validate(&self) -> SchemaResult<()> {
        let mut seen = std::collections::BTreeSet::new();

        for ext in &self.extensions {
            validate_identifier(ext)?;
        }

        for table in &self.tables {
            table.validate()?;
            if !seen.insert(table.qualified_name()) {
                return Err(SchemaError::DuplicateTable(table.qualified_name()));
            }
        }

        Ok(())
    }
}

/// A single table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Database schema the table lives in. `None` means `public`.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnSpec>,
    /// Secondary indexes.
    pub indexes: Vec<IndexSpec>,
    /// Foreign key constraints.
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl TableSpec {
    /// Create a table in the `public` schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Place the table in a named schema.
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Add an index.
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key.
    pub fn foreign_key(mut self, fk: ForeignKeySpec) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Schema name, defaulting to `public`.
    pub fn schema_name(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }

    /// `schema.table` qualified name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema_name(), self.name)
    }

    /// Look up a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn validate(&self) -> SchemaResult<()> {
        validate_identifier(&self.name)?;
        if let Some(schema) = &self.schema {
            validate_identifier(schema)?;
        }

        if self.columns.is_empty() {
            return Err(SchemaError::EmptyTable(self.qualified_name()));
        }

        let mut seen = std::collections::BTreeSet::new();
        for column in &self.columns {
            column.validate()?;
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.qualified_name(),
                    column: column.name.clone(),
                });
            }
        }

        for index in &self.indexes {
            if let Some(name) = &index.name {
                validate_identifier(name)?;
            }
            for column in &index.columns {
                if self.get_column(column).is_none() {
                    return Err(SchemaError::UnknownIndexColumn {
                        table: self.qualified_name(),
                        column: column.clone(),
                    });
                }
            }
        }

        for fk in &self.foreign_keys {
            validate_identifier(&fk.references_table)?;
            for column in &fk.columns {
                if self.get_column(column).is_none() {
                    return Err(SchemaError::UnknownForeignKeyColumn {
                        table: self.qualified_name(),
                        column: column.clone(),
                    });
                }
            }
            for column in &fk.references_columns {
                validate_identifier(column)?;
            }
        }

        Ok(())
    }
}

/// A single column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed. Columns are NOT NULL unless made nullable.
    pub nullable: bool,
    /// Default value.
    pub default: Option<DefaultValue>,
    /// Whether this column is (part of) the primary key.
    pub primary_key: bool,
    /// Whether the column carries a UNIQUE constraint.
    pub unique: bool,
}

impl ColumnSpec {
    /// Create a NOT NULL column of the given type.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    /// Allow NULL values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark as primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Add a UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the default value.
    pub fn default_value(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    fn validate(&self) -> SchemaResult<()> {
        validate_identifier(&self.name)?;
        if let ColumnType::Vector(0) = self.column_type {
            return Err(SchemaError::InvalidVectorDimensions(self.name.clone()));
        }
        Ok(())
    }
}

/// Column types supported by the migration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// `UUID`
    Uuid,
    /// `TEXT`
    Text,
    /// `INTEGER`
    Integer,
    /// `BIGINT`
    BigInt,
    /// `DOUBLE PRECISION`
    Real,
    /// `BOOLEAN`
    Boolean,
    /// `JSONB`
    Jsonb,
    /// `TIMESTAMP WITH TIME ZONE`
    TimestampTz,
    /// `BYTEA`
    Bytea,
    /// `vector(n)` from the pgvector extension.
    Vector(u16),
}

impl ColumnType {
    /// Render the PostgreSQL type name.
    pub fn sql(&self) -> String {
        match self {
            Self::Uuid => "UUID".to_string(),
            Self::Text => "TEXT".to_string(),
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Real => "DOUBLE PRECISION".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Jsonb => "JSONB".to_string(),
            Self::TimestampTz => "TIMESTAMP WITH TIME ZONE".to_string(),
            Self::Bytea => "BYTEA".to_string(),
            Self::Vector(dims) => format!("vector({})", dims),
        }
    }

    /// Map a PostgreSQL UDT name (as reported by information_schema)
    /// back to a column type. Unknown UDTs map to `Text` so introspected
    /// baselines stay conservative instead of failing the upgrade path.
    pub fn from_udt_name(udt: &str) -> Self {
        match udt {
            "uuid" => Self::Uuid,
            "int2" | "int4" => Self::Integer,
            "int8" => Self::BigInt,
            "float4" | "float8" | "numeric" => Self::Real,
            "bool" => Self::Boolean,
            "jsonb" | "json" => Self::Jsonb,
            "timestamptz" | "timestamp" => Self::TimestampTz,
            "bytea" => Self::Bytea,
            "vector" => Self::Vector(0),
            _ => Self::Text,
        }
    }

    /// Whether a change from `self` to `target` preserves all values.
    ///
    /// Anything not on this whitelist is treated as potentially narrowing,
    /// which keeps data-loss detection conservative.
    pub fn widens_to(&self, target: &Self) -> bool {
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Self::Integer, Self::BigInt)
                | (Self::Integer, Self::Real)
                | (Self::BigInt, Self::Real)
                | (Self::Uuid, Self::Text)
                | (Self::Jsonb, Self::Text)
        )
    }
}

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// A string literal.
    Text(String),
    /// An integer literal.
    Integer(i64),
    /// A boolean literal.
    Boolean(bool),
    /// A raw SQL expression such as `now()` or `gen_random_uuid()`.
    Expression(String),
}

impl DefaultValue {
    /// Render the default as SQL.
    pub fn sql(&self) -> String {
        match self {
            Self::Text(value) => format!("'{}'", value.replace('\'', "''")),
            Self::Integer(value) => value.to_string(),
            Self::Boolean(value) => value.to_string(),
            Self::Expression(expr) => expr.clone(),
        }
    }
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name. `None` derives `{table}_{columns}_idx`.
    pub name: Option<String>,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
}

impl IndexSpec {
    /// Create an index over the given columns.
    pub fn on<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Give the index an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Make the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Resolve the index name, deriving one from the table and columns
    /// when no explicit name was given.
    pub fn resolved_name(&self, table: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_idx", table, self.columns.join("_")))
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Local columns.
    pub columns: Vec<String>,
    /// Referenced table (unqualified; resolved in the same schema).
    pub references_table: String,
    /// Referenced columns.
    pub references_columns: Vec<String>,
    /// ON DELETE action.
    pub on_delete: Option<ReferentialAction>,
}

impl ForeignKeySpec {
    /// Create a foreign key from one local column to one referenced column.
    pub fn new(
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            columns: vec![column.into()],
            references_table: references_table.into(),
            references_columns: vec![references_column.into()],
            on_delete: None,
        }
    }

    /// Set the ON DELETE action.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    /// Derived constraint name, following the PostgreSQL convention.
    pub fn constraint_name(&self, table: &str) -> String {
        format!("{}_{}_fkey", table, self.columns.join("_"))
    }
}

/// Referential action for foreign keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// `ON DELETE CASCADE`
    Cascade,
    /// `ON DELETE SET NULL`
    SetNull,
    /// `ON DELETE RESTRICT`
    Restrict,
}

impl ReferentialAction {
    /// Render the action as SQL.
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
        }
    }
}
