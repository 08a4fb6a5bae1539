//! Configuration for the RLS policy engine.

use std::collections::BTreeSet;

/// A shared-access isolation column and the membership table that decides
/// which values the current entity may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAccessColumn {
    /// Column on the secured table (e.g. `room_id`).
    pub column: String,
    /// Membership table holding (key, entity) pairs.
    pub membership_table: String,
    /// Key column on the membership table.
    pub membership_key_column: String,
    /// Entity column on the membership table.
    pub membership_entity_column: String,
}

impl SharedAccessColumn {
    /// Create a shared-access mapping.
    pub fn new(
        column: impl Into<String>,
        membership_table: impl Into<String>,
        membership_key_column: impl Into<String>,
        membership_entity_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            membership_table: membership_table.into(),
            membership_key_column: membership_key_column.into(),
            membership_entity_column: membership_entity_column.into(),
        }
    }
}

/// Configuration for two-tier row-level isolation.
///
/// Entity classification walks `shared_columns` first, then
/// `direct_columns`, giving the strict priority
/// `room_id > channel_id > entity_id > author_id` with the defaults.
#[derive(Debug, Clone)]
pub struct RlsConfig {
    /// Whether isolation is enabled at all. When disabled, installation
    /// and context application become no-ops.
    pub enabled: bool,
    /// Tenant key column (`server_id`).
    pub server_column: String,
    /// Shared-access entity columns, in priority order.
    pub shared_columns: Vec<SharedAccessColumn>,
    /// Direct-access entity columns, in priority order after the shared
    /// ones.
    pub direct_columns: Vec<String>,
    /// Unqualified table names never given an entity policy: the tenant
    /// registry, auth/mapping tables, and migration bookkeeping.
    pub excluded_tables: BTreeSet<String>,
    /// Unqualified table names whose entity policy is strict (no entity
    /// context means zero rows).
    pub strict_tables: BTreeSet<String>,
    /// Session variable the server policies read.
    pub server_session_variable: String,
    /// Session variable the entity policies read.
    pub entity_session_variable: String,
}

impl Default for RlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_column: "server_id".to_string(),
            shared_columns: vec![
                SharedAccessColumn::new("room_id", "participants", "room_id", "entity_id"),
                SharedAccessColumn::new(
                    "channel_id",
                    "channel_participants",
                    "channel_id",
                    "user_id",
                ),
            ],
            direct_columns: vec!["entity_id".to_string(), "author_id".to_string()],
            excluded_tables: [
                "servers",
                "server_agents",
                "_strata_migrations",
                "_strata_journal",
                "_strata_snapshots",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            strict_tables: BTreeSet::new(),
            server_session_variable: "app.current_server_id".to_string(),
            entity_session_variable: "app.current_entity_id".to_string(),
        }
    }
}

impl RlsConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with the global kill-switch read from the process
    /// environment (`STRATA_DISABLE_ISOLATION`).
    pub fn from_env() -> Self {
        Self {
            enabled: !env_flag("STRATA_DISABLE_ISOLATION"),
            ..Self::default()
        }
    }

    /// Enable or disable isolation.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the tenant key column.
    pub fn server_column(mut self, column: impl Into<String>) -> Self {
        self.server_column = column.into();
        self
    }

    /// Exclude a table from entity isolation.
    pub fn exclude_table(mut self, table: impl Into<String>) -> Self {
        self.excluded_tables.insert(table.into());
        self
    }

    /// Put a table's entity policy in strict mode.
    pub fn strict_table(mut self, table: impl Into<String>) -> Self {
        self.strict_tables.insert(table.into());
        self
    }

    /// Whether a table is excluded from entity isolation.
    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables.contains(table)
    }

    /// Whether a table's entity policy is strict.
    pub fn is_strict(&self, table: &str) -> bool {
        self.strict_tables.contains(table)
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_priority_order() {
        let config = RlsConfig::default();
        assert_eq!(config.shared_columns[0].column, "room_id");
        assert_eq!(config.shared_columns[1].column, "channel_id");
        assert_eq!(
            config.direct_columns,
            vec!["entity_id".to_string(), "author_id".to_string()]
        );
    }

    #[test]
    fn test_default_exclusions_cover_bookkeeping() {
        let config = RlsConfig::default();
        assert!(config.is_excluded("servers"));
        assert!(config.is_excluded("_strata_migrations"));
        assert!(!config.is_excluded("memories"));
    }

    #[test]
    fn test_builder() {
        let config = RlsConfig::new()
            .server_column("org_id")
            .strict_table("secrets")
            .exclude_table("lookups");

        assert_eq!(config.server_column, "org_id");
        assert!(config.is_strict("secrets"));
        assert!(config.is_excluded("lookups"));
    }
}
