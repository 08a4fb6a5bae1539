//! # strata-rls
//!
//! Two-tier row-level isolation for the strata storage layer.
//!
//! Independently of migrations, every table is classified by the
//! isolation column it carries (`room_id > channel_id > entity_id >
//! author_id`, plus the tenant key `server_id`) and given two database
//! policies:
//!
//! - **Server isolation** restricts rows to the current tenant, read from
//!   `current_server_id()`; the tenant column also defaults to that
//!   function so inserts are auto-tagged.
//! - **Entity isolation** restricts rows to the current end-user — by
//!   direct ownership, or through membership in the row's room/channel.
//!
//! Policies come in two modes: **permissive** (no entity context set
//! means all rows are visible, for server-side work) and **strict** (no
//! context means zero rows, for sensitive per-user tables).
//!
//! The isolation context itself is an explicit, transaction-scoped value
//! ([`IsolationContext`]) applied through parameterized
//! `set_config(.., true)` calls — never ambient state, never string
//! interpolation.

pub mod config;
pub mod context;
pub mod error;
pub mod installer;
pub mod policy;

pub use config::{RlsConfig, SharedAccessColumn};
pub use context::{
    IsolatedWork, IsolationBackend, IsolationContext, IsolationSession, SET_CONFIG_SQL,
};
pub use error::{RlsError, RlsResult};
pub use installer::{InstallReport, PolicyInstaller};
pub use policy::{
    ENTITY_POLICY_NAME, EntityAccess, PolicyEngine, SERVER_POLICY_NAME, TableClassification,
};
