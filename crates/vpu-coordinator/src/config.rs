use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::CoordinatorError;

/// Tunables for a [`crate::Coordinator`].
///
/// Every field has a default, so a partial JSON document (or none at all) is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Number of logical decoder instances sharing the engine.
    pub slot_count: usize,
    /// Upper bound on how long the dispatcher sleeps on an empty queue before re-polling.
    pub idle_poll_ms: u64,
    /// How long a confirmed command may take before it is declared timed out.
    pub irq_timeout_ms: u64,
    /// Per-slot bound for acknowledging a forced CLOSE.
    pub force_close_timeout_ms: u64,
    /// Work memory handed to each instance at INIT.
    pub work_region_bytes: u64,
    /// Size of the work-memory window reserved when the engine powers up.
    pub work_pool_bytes: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            slot_count: 16,
            idle_poll_ms: 50,
            irq_timeout_ms: 200,
            force_close_timeout_ms: 200,
            work_region_bytes: 1 << 20,
            work_pool_bytes: 16 << 20,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.slot_count == 0 {
            return Err(CoordinatorError::InvalidConfig("slot_count must be non-zero"));
        }
        if self.idle_poll_ms == 0 {
            return Err(CoordinatorError::InvalidConfig("idle_poll_ms must be non-zero"));
        }
        if self.irq_timeout_ms == 0 {
            return Err(CoordinatorError::InvalidConfig("irq_timeout_ms must be non-zero"));
        }
        if self.force_close_timeout_ms == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "force_close_timeout_ms must be non-zero",
            ));
        }
        if self.work_region_bytes == 0 {
            return Err(CoordinatorError::InvalidConfig(
                "work_region_bytes must be non-zero",
            ));
        }
        if self.work_region_bytes > self.work_pool_bytes {
            return Err(CoordinatorError::InvalidConfig(
                "work_region_bytes exceeds work_pool_bytes",
            ));
        }
        Ok(())
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn irq_timeout(&self) -> Duration {
        Duration::from_millis(self.irq_timeout_ms)
    }

    pub fn force_close_timeout(&self) -> Duration {
        Duration::from_millis(self.force_close_timeout_ms)
    }
}
