//! Advisory lock coordination for concurrent migrations.
//!
//! Two processes migrating the same plugin serialize on an advisory lock
//! whose key is derived deterministically from the plugin name. Locking is
//! only engaged against server-backed databases; embedded single-process
//! engines skip it (no cross-process contention is possible). A failing
//! lock subsystem degrades to an unlocked migration with a warning, never
//! a fatal error.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::driver::{AdvisoryLockHandle, MigrationDriver};
use crate::error::{MigrateResult, MigrationError};

/// Key used when the masked digest collapses to zero.
const ZERO_KEY_FALLBACK: i64 = 0x5354_5241_5441_u64 as i64;

/// A 63-bit positive advisory lock key derived from a plugin name.
///
/// The key is stable for the lifetime of the plugin name and is used only
/// as a coordination token; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvisoryLockKey(i64);

impl AdvisoryLockKey {
    /// Derive the key for a plugin name.
    ///
    /// The sign bit is masked off to avoid positive/negative ambiguity
    /// across drivers, and zero is remapped so the key is never the
    /// "no lock" sentinel some backends reserve.
    pub fn derive(plugin_name: &str) -> Self {
        let digest = Sha256::digest(plugin_name.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);

        let masked = (u64::from_be_bytes(bytes) & 0x7FFF_FFFF_FFFF_FFFF) as i64;
        Self(if masked == 0 { ZERO_KEY_FALLBACK } else { masked })
    }

    /// Validate an externally supplied key.
    pub fn validate(value: i64) -> MigrateResult<Self> {
        if value <= 0 {
            return Err(MigrationError::InvalidLockKey(value));
        }
        Ok(Self(value))
    }

    /// The raw key value.
    pub fn value(&self) -> i64 {
        self.0
    }
}

/// Outcome of a lock acquisition attempt.
pub enum LockAcquisition {
    /// The lock is held; must be released after the migration.
    Held(Box<dyn AdvisoryLockHandle>),
    /// Migration proceeds without a lock (unsupported backend or a
    /// degraded lock subsystem).
    Unlocked,
}

impl LockAcquisition {
    /// Whether a lock is actually held.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held(_))
    }

    /// Release the lock if held. Release failures are logged, not
    /// propagated: the migration outcome is already decided by the time
    /// this runs.
    pub async fn release(self) {
        if let Self::Held(handle) = self {
            let key = handle.key();
            if let Err(e) = handle.release().await {
                warn!(key, error = %e, "failed to release advisory lock");
            }
        }
    }
}

/// Coordinator serializing same-plugin migrations across processes.
pub struct LockCoordinator {
    driver: Arc<dyn MigrationDriver>,
}

impl LockCoordinator {
    /// Create a coordinator over a driver.
    pub fn new(driver: Arc<dyn MigrationDriver>) -> Self {
        Self { driver }
    }

    /// Acquire the migration lock for a plugin.
    ///
    /// Tries a non-blocking acquisition first; on contention, blocks until
    /// the other process finishes. After this returns the caller must
    /// re-check the tracker hash — the competing process may have applied
    /// the identical migration while we waited.
    pub async fn acquire(&self, plugin: &str) -> LockAcquisition {
        if !self.driver.supports_advisory_locks() {
            debug!(plugin, "backend has no cross-process contention; skipping advisory lock");
            return LockAcquisition::Unlocked;
        }

        let key = AdvisoryLockKey::derive(plugin);

        match self.driver.try_advisory_lock(key.value()).await {
            Ok(Some(handle)) => {
                debug!(plugin, key = key.value(), "advisory lock acquired");
                LockAcquisition::Held(handle)
            }
            Ok(None) => {
                info!(
                    plugin,
                    key = key.value(),
                    "another process is migrating this plugin; waiting for the lock"
                );
                match self.driver.advisory_lock(key.value()).await {
                    Ok(handle) => LockAcquisition::Held(handle),
                    Err(e) => {
                        warn!(plugin, error = %e, "advisory lock wait failed; proceeding without lock");
                        LockAcquisition::Unlocked
                    }
                }
            }
            Err(e) => {
                warn!(plugin, error = %e, "advisory locks unavailable; proceeding without lock");
                LockAcquisition::Unlocked
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_key_is_stable() {
        let a = AdvisoryLockKey::derive("memory");
        let b = AdvisoryLockKey::derive("memory");
        assert_eq!(a, b);
    }

    #[test]
    fn test_keys_differ_per_plugin() {
        let a = AdvisoryLockKey::derive("memory");
        let b = AdvisoryLockKey::derive("knowledge");
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_is_positive_63_bit() {
        for name in ["memory", "knowledge", "a", "", "plugin-with-long-name"] {
            let key = AdvisoryLockKey::derive(name);
            assert!(key.value() > 0, "key for '{}' must be positive", name);
        }
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        assert!(AdvisoryLockKey::validate(0).is_err());
        assert!(AdvisoryLockKey::validate(-7).is_err());
        assert!(AdvisoryLockKey::validate(42).is_ok());
    }
}
