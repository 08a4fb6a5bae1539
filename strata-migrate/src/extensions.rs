//! Database extension management.

use std::sync::Arc;

use strata_schema::validate_identifier;
use tracing::{debug, warn};

use crate::driver::MigrationDriver;
use crate::error::MigrateResult;
use crate::sql::quote_ident;

/// Ensures required database extensions exist before DDL runs.
pub struct ExtensionManager {
    driver: Arc<dyn MigrationDriver>,
}

impl ExtensionManager {
    /// Create a manager over a driver.
    pub fn new(driver: Arc<dyn MigrationDriver>) -> Self {
        Self { driver }
    }

    /// Install every listed extension with `CREATE EXTENSION IF NOT EXISTS`.
    ///
    /// An extension the server cannot provide is logged as a warning and
    /// skipped; tables that genuinely need its types will fail inside the
    /// migration transaction and roll back cleanly.
    pub async fn ensure(&self, extensions: &[String]) -> MigrateResult<()> {
        for extension in extensions {
            validate_identifier(extension)?;

            let sql = format!(
                "CREATE EXTENSION IF NOT EXISTS {};",
                quote_ident(extension)
            );
            match self.driver.execute_batch(&sql).await {
                Ok(()) => debug!(extension, "extension ensured"),
                Err(e) => warn!(extension, error = %e, "could not install extension; continuing"),
            }
        }

        Ok(())
    }
}
