//! Policy classification and SQL generation.
//!
//! Every table is classified by which isolation columns it carries. Server
//! isolation applies to any table with the tenant key column. Entity
//! isolation picks one column by strict priority — shared-access columns
//! first (`room_id`, `channel_id`), then direct-access columns
//! (`entity_id`, `author_id`) — and tables carrying none are skipped.

use strata_schema::TableDef;

use crate::config::{RlsConfig, SharedAccessColumn};

/// Name of the server isolation policy on each secured table.
pub const SERVER_POLICY_NAME: &str = "strata_server_isolation";

/// Name of the entity isolation policy on each secured table.
pub const ENTITY_POLICY_NAME: &str = "strata_entity_isolation";

/// How the current entity gains access to a table's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityAccess {
    /// Row visibility gated through a membership table (e.g. `room_id`
    /// must be one of the rooms the entity participates in).
    Shared(SharedAccessColumn),
    /// Row visibility requires direct equality with the current entity.
    Direct(String),
}

impl EntityAccess {
    /// The isolation column on the secured table.
    pub fn column(&self) -> &str {
        match self {
            Self::Shared(shared) => &shared.column,
            Self::Direct(column) => column,
        }
    }
}

/// Result of classifying one table.
#[derive(Debug, Clone)]
pub struct TableClassification {
    /// Qualified table name.
    pub qualified_name: String,
    /// Whether the table carries the tenant key column.
    pub server_isolated: bool,
    /// Selected entity isolation column, if any.
    pub entity_access: Option<EntityAccess>,
    /// Whether the entity policy is strict (no context means zero rows).
    pub strict: bool,
}

impl TableClassification {
    /// Whether any policy applies to the table.
    pub fn is_secured(&self) -> bool {
        self.server_isolated || self.entity_access.is_some()
    }
}

/// Classifies tables and renders policy DDL.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: RlsConfig,
}

impl PolicyEngine {
    /// Create an engine with the given config.
    pub fn new(config: RlsConfig) -> Self {
        Self { config }
    }

    /// Get the config.
    pub fn config(&self) -> &RlsConfig {
        &self.config
    }

    /// Classify a table by the isolation columns it carries.
    pub fn classify(&self, table: &TableDef) -> TableClassification {
        let server_isolated = table.has_column(&self.config.server_column);

        let entity_access = if self.config.is_excluded(&table.name) {
            None
        } else {
            self.config
                .shared_columns
                .iter()
                .find(|shared| table.has_column(&shared.column))
                .map(|shared| EntityAccess::Shared(shared.clone()))
                .or_else(|| {
                    self.config
                        .direct_columns
                        .iter()
                        .find(|column| table.has_column(column))
                        .map(|column| EntityAccess::Direct(column.clone()))
                })
        };

        TableClassification {
            qualified_name: table.qualified_name(),
            server_isolated,
            entity_access,
            strict: self.config.is_strict(&table.name),
        }
    }

    /// SQL for the two session-reading functions the policies reference.
    ///
    /// `CREATE OR REPLACE` keeps installation idempotent. The functions
    /// read missing session variables as NULL instead of erroring, which
    /// is what the permissive/strict predicates branch on.
    pub fn session_function_sql(&self) -> Vec<String> {
        vec![
            session_function(
                "current_server_id",
                &self.config.server_session_variable,
            ),
            session_function(
                "current_entity_id",
                &self.config.entity_session_variable,
            ),
        ]
    }

    /// SQL installing every applicable policy on one table.
    ///
    /// Idempotent: policies are dropped before they are recreated, and
    /// enabling row-level security twice is harmless.
    pub fn install_sql(&self, table: &TableDef) -> Vec<String> {
        let classification = self.classify(table);
        if !classification.is_secured() {
            return Vec::new();
        }

        let target = qualify(&table.schema, &table.name);
        let mut statements = vec![
            format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY;", target),
            format!("ALTER TABLE {} FORCE ROW LEVEL SECURITY;", target),
        ];

        if classification.server_isolated {
            let predicate = self.server_predicate();
            statements.push(format!(
                "DROP POLICY IF EXISTS {} ON {};",
                quote_ident(SERVER_POLICY_NAME),
                target
            ));
            statements.push(create_policy(SERVER_POLICY_NAME, &target, &predicate));
            // Inserts are auto-tagged with the current tenant.
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT current_server_id();",
                target,
                quote_ident(&self.config.server_column)
            ));
        }

        if let Some(access) = &classification.entity_access {
            let predicate = self.entity_predicate(access, classification.strict);
            statements.push(format!(
                "DROP POLICY IF EXISTS {} ON {};",
                quote_ident(ENTITY_POLICY_NAME),
                target
            ));
            statements.push(create_policy(ENTITY_POLICY_NAME, &target, &predicate));
        }

        statements
    }

    /// SQL removing every policy from one table.
    pub fn teardown_sql(&self, table: &TableDef) -> Vec<String> {
        let target = qualify(&table.schema, &table.name);
        let mut statements = vec![
            format!(
                "DROP POLICY IF EXISTS {} ON {};",
                quote_ident(SERVER_POLICY_NAME),
                target
            ),
            format!(
                "DROP POLICY IF EXISTS {} ON {};",
                quote_ident(ENTITY_POLICY_NAME),
                target
            ),
            format!("ALTER TABLE {} DISABLE ROW LEVEL SECURITY;", target),
        ];

        if table.has_column(&self.config.server_column) {
            statements.push(format!(
                "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT;",
                target,
                quote_ident(&self.config.server_column)
            ));
        }

        statements
    }

    /// Server isolation predicate. Permissive with no server context so
    /// background and maintenance operations see all tenants.
    fn server_predicate(&self) -> String {
        format!(
            "current_server_id() IS NULL OR {} = current_server_id()",
            quote_ident(&self.config.server_column)
        )
    }

    /// Entity isolation predicate, permissive or strict.
    fn entity_predicate(&self, access: &EntityAccess, strict: bool) -> String {
        let check = match access {
            EntityAccess::Shared(shared) => format!(
                "{} IN (SELECT {} FROM {} WHERE {} = current_entity_id())",
                quote_ident(&shared.column),
                quote_ident(&shared.membership_key_column),
                quote_ident(&shared.membership_table),
                quote_ident(&shared.membership_entity_column)
            ),
            EntityAccess::Direct(column) => {
                format!("{} = current_entity_id()", quote_ident(column))
            }
        };

        if strict {
            format!("current_entity_id() IS NOT NULL AND ({})", check)
        } else {
            format!("current_entity_id() IS NULL OR ({})", check)
        }
    }
}

fn session_function(name: &str, session_variable: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {}() RETURNS uuid AS $$\n    \
         SELECT NULLIF(current_setting('{}', true), '')::uuid\n\
         $$ LANGUAGE sql STABLE;",
        name, session_variable
    )
}

fn create_policy(name: &str, target: &str, predicate: &str) -> String {
    format!(
        "CREATE POLICY {} ON {}\n    AS PERMISSIVE\n    FOR ALL\n    TO PUBLIC\n    \
         USING ({})\n    WITH CHECK ({});",
        quote_ident(name),
        target,
        predicate,
        predicate
    )
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a qualified `schema.table` pair.
fn qualify(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strata_schema::{ColumnSpec, ColumnType, PluginSchema, SchemaSnapshot, TableSpec};

    use super::*;

    fn table_with(columns: &[&str]) -> TableDef {
        let mut spec = TableSpec::new("messages")
            .column(ColumnSpec::new("id", ColumnType::Uuid).primary_key());
        for column in columns {
            spec = spec.column(ColumnSpec::new(*column, ColumnType::Uuid));
        }

        let schema = PluginSchema::new().table(spec);
        SchemaSnapshot::from_schema(&schema)
            .unwrap()
            .get_table("public.messages")
            .unwrap()
            .clone()
    }

    #[test]
    fn test_room_id_wins_over_entity_id() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let classification = engine.classify(&table_with(&["room_id", "entity_id"]));

        assert_eq!(
            classification.entity_access.unwrap().column(),
            "room_id"
        );
    }

    #[test]
    fn test_entity_id_selected_when_alone() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let classification = engine.classify(&table_with(&["entity_id"]));

        assert!(matches!(
            classification.entity_access,
            Some(EntityAccess::Direct(ref column)) if column == "entity_id"
        ));
    }

    #[test]
    fn test_channel_id_wins_over_author_id() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let classification = engine.classify(&table_with(&["author_id", "channel_id"]));

        assert_eq!(
            classification.entity_access.unwrap().column(),
            "channel_id"
        );
    }

    #[test]
    fn test_unclassified_table_is_skipped() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let table = table_with(&[]);
        let classification = engine.classify(&table);

        assert!(classification.entity_access.is_none());
        assert!(!classification.server_isolated);
        assert!(engine.install_sql(&table).is_empty());
    }

    #[test]
    fn test_server_column_triggers_server_policy_and_default() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let table = table_with(&["server_id"]);
        let statements = engine.install_sql(&table);

        assert!(statements.iter().any(|s| s.contains("ENABLE ROW LEVEL SECURITY")));
        assert!(statements.iter().any(|s| s.contains(SERVER_POLICY_NAME)));
        assert!(
            statements
                .iter()
                .any(|s| s.contains("SET DEFAULT current_server_id()"))
        );
    }

    #[test]
    fn test_shared_policy_uses_membership_subquery() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let statements = engine.install_sql(&table_with(&["room_id"]));

        let policy = statements
            .iter()
            .find(|s| s.contains(ENTITY_POLICY_NAME) && s.starts_with("CREATE POLICY"))
            .unwrap();
        assert!(policy.contains(
            "\"room_id\" IN (SELECT \"room_id\" FROM \"participants\" WHERE \"entity_id\" = current_entity_id())"
        ));
        // Permissive by default: no context sees everything.
        assert!(policy.contains("current_entity_id() IS NULL OR"));
    }

    #[test]
    fn test_strict_mode_requires_context() {
        let engine = PolicyEngine::new(RlsConfig::default().strict_table("messages"));
        let statements = engine.install_sql(&table_with(&["room_id"]));

        let policy = statements
            .iter()
            .find(|s| s.contains(ENTITY_POLICY_NAME) && s.starts_with("CREATE POLICY"))
            .unwrap();
        assert!(policy.contains("current_entity_id() IS NOT NULL AND"));
    }

    #[test]
    fn test_excluded_table_gets_no_entity_policy() {
        let engine = PolicyEngine::new(RlsConfig::default());

        let mut table = table_with(&["entity_id"]);
        table.name = "servers".to_string();

        let classification = engine.classify(&table);
        assert!(classification.entity_access.is_none());
    }

    #[test]
    fn test_install_is_drop_then_create() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let statements = engine.install_sql(&table_with(&["server_id", "room_id"]));

        let drop = statements
            .iter()
            .position(|s| s.starts_with("DROP POLICY IF EXISTS \"strata_entity_isolation\""))
            .unwrap();
        let create = statements
            .iter()
            .position(|s| s.starts_with("CREATE POLICY \"strata_entity_isolation\""))
            .unwrap();
        assert!(drop < create);
    }

    #[test]
    fn test_session_functions_read_missing_variables_as_null() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let functions = engine.session_function_sql();

        assert_eq!(functions.len(), 2);
        assert!(functions[0].contains("current_setting('app.current_server_id', true)"));
        assert!(functions[1].contains("current_setting('app.current_entity_id', true)"));
        assert!(functions.iter().all(|f| f.starts_with("CREATE OR REPLACE FUNCTION")));
    }

    #[test]
    fn test_teardown_drops_policies_and_default() {
        let engine = PolicyEngine::new(RlsConfig::default());
        let statements = engine.teardown_sql(&table_with(&["server_id"]));

        assert!(statements.iter().any(|s| s.contains("DISABLE ROW LEVEL SECURITY")));
        assert!(statements.iter().any(|s| s.contains("DROP DEFAULT")));
    }
}
