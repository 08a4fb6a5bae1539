//! Transaction-scoped isolation context.
//!
//! The context is an explicit value threaded through every transactional
//! call, never ambient state. It exists only for the duration of one
//! transaction: the session variables it sets use transaction-local scope
//! (`set_config(.., true)`), so a pooled connection reused later never
//! inherits a stale tenant or entity.

use async_trait::async_trait;
use futures::future::BoxFuture;
use strata_migrate::driver::{SqlRow, SqlValue};
use uuid::Uuid;

use crate::config::RlsConfig;
use crate::error::{RlsError, RlsResult};

/// Parameterized session-variable assignment. Never interpolated: both
/// the variable name and the value travel as bind parameters.
pub const SET_CONFIG_SQL: &str = "SELECT set_config($1, $2, true)";

/// Tenant and entity scope for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsolationContext {
    /// Current tenant, if any.
    pub server_id: Option<Uuid>,
    /// Current entity, if any.
    pub entity_id: Option<Uuid>,
}

impl IsolationContext {
    /// A context with no scope set. Policies fall back to their
    /// permissive or strict default behavior.
    pub fn none() -> Self {
        Self::default()
    }

    /// Scope to a tenant.
    pub fn server(server_id: Uuid) -> Self {
        Self {
            server_id: Some(server_id),
            entity_id: None,
        }
    }

    /// Scope to a tenant and an entity within it.
    pub fn server_and_entity(server_id: Uuid, entity_id: Uuid) -> Self {
        Self {
            server_id: Some(server_id),
            entity_id: Some(entity_id),
        }
    }

    /// Scope to an entity only.
    pub fn entity(entity_id: Uuid) -> Self {
        Self {
            server_id: None,
            entity_id: Some(entity_id),
        }
    }

    /// Parse a context from externally supplied strings.
    ///
    /// Malformed values are rejected here, before anything reaches the
    /// database.
    pub fn parse(server_id: Option<&str>, entity_id: Option<&str>) -> RlsResult<Self> {
        let server_id = server_id
            .map(|value| {
                Uuid::parse_str(value).map_err(|_| RlsError::InvalidIsolationValue {
                    field: "server_id",
                    value: value.to_string(),
                })
            })
            .transpose()?;

        let entity_id = entity_id
            .map(|value| {
                Uuid::parse_str(value).map_err(|_| RlsError::InvalidIsolationValue {
                    field: "entity_id",
                    value: value.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            server_id,
            entity_id,
        })
    }

    /// Whether the context carries no scope at all.
    pub fn is_empty(&self) -> bool {
        self.server_id.is_none() && self.entity_id.is_none()
    }

    /// The (variable, value) pairs to assign for this context.
    pub fn assignments(&self, config: &RlsConfig) -> Vec<(String, String)> {
        let mut assignments = Vec::new();

        if let Some(server_id) = self.server_id {
            assignments.push((
                config.server_session_variable.clone(),
                server_id.to_string(),
            ));
        }
        if let Some(entity_id) = self.entity_id {
            assignments.push((
                config.entity_session_variable.clone(),
                entity_id.to_string(),
            ));
        }

        assignments
    }
}

/// Query surface handed to isolated units of work.
#[async_trait]
pub trait IsolationSession: Send + Sync {
    /// Execute a statement inside the isolated transaction.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> RlsResult<u64>;

    /// Run a query inside the isolated transaction.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> RlsResult<Vec<SqlRow>>;
}

/// A unit of work run inside an isolated transaction.
pub type IsolatedWork<'a> =
    Box<dyn for<'t> FnOnce(&'t dyn IsolationSession) -> BoxFuture<'t, RlsResult<()>> + Send + 'a>;

/// The one operation every physical driver must expose for
/// transaction-scoped isolation.
///
/// Implementations open a transaction, apply the context's session
/// variables with [`SET_CONFIG_SQL`], run the work, and commit — or roll
/// back on failure. When isolation is globally disabled they run the work
/// with no variables set.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Run `work` inside a transaction scoped to `context`.
    async fn with_isolation(
        &self,
        context: &IsolationContext,
        work: IsolatedWork<'_>,
    ) -> RlsResult<()>;
}
