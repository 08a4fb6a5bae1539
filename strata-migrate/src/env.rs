//! Environment switches for the migration engine.

/// Runtime environment detection and destructive-change override.
///
/// Read once at startup via [`RuntimeEnv::from_env`] and threaded through
/// the engine configuration; the engine itself never touches process
/// state.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEnv {
    /// Whether we are running against a production database.
    pub production: bool,
    /// Whether destructive migrations are globally permitted.
    pub allow_destructive: bool,
}

impl RuntimeEnv {
    /// Detect the environment from process variables.
    ///
    /// `STRATA_ENV=production` (or `prod`) marks production;
    /// `STRATA_ALLOW_DESTRUCTIVE` set to `1`/`true`/`yes` permits
    /// destructive migrations everywhere.
    pub fn from_env() -> Self {
        let production = std::env::var("STRATA_ENV")
            .map(|v| {
                let v = v.to_ascii_lowercase();
                v == "production" || v == "prod"
            })
            .unwrap_or(false);

        Self {
            production,
            allow_destructive: env_flag("STRATA_ALLOW_DESTRUCTIVE"),
        }
    }

    /// A development environment (the default).
    pub fn development() -> Self {
        Self::default()
    }

    /// Mark as production.
    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Permit destructive migrations.
    pub fn allow_destructive(mut self, allow: bool) -> Self {
        self.allow_destructive = allow;
        self
    }
}

/// Read a boolean environment flag.
pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.to_ascii_lowercase();
            v == "1" || v == "true" || v == "yes"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_development() {
        let env = RuntimeEnv::development();
        assert!(!env.production);
        assert!(!env.allow_destructive);
    }

    #[test]
    fn test_builder() {
        let env = RuntimeEnv::development()
            .production(true)
            .allow_destructive(true);
        assert!(env.production);
        assert!(env.allow_destructive);
    }
}
