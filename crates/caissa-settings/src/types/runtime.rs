//! Scheduler, session, streaming, and supervisor settings.

use serde::{Deserialize, Serialize};

/// Admission queue settings, shared by every family.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSettings {
    /// Waiting requests allowed per family before new ones are rejected.
    pub queue_capacity: usize,
    /// Longest a request may wait for a slot in milliseconds.
    pub max_wait_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            max_wait_ms: 30_000,
        }
    }
}

/// Per-job engine session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Depth used when a request names no limit.
    pub default_depth: u32,
    /// Upper bound on requested variations.
    pub max_multipv: u32,
    /// How long a cancelled search may take to report `bestmove`.
    pub stop_grace_ms: u64,
    /// Timeout for the `isready` sync before each search.
    pub sync_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_depth: 20,
            max_multipv: 5,
            stop_grace_ms: 2_000,
            sync_timeout_ms: 10_000,
        }
    }
}

/// Update throttling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingSettings {
    /// Minimum interval between forwarded updates of one variation at the
    /// same depth. Depth increases are always forwarded.
    pub throttle_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self { throttle_ms: 100 }
    }
}

/// Engine process supervision.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// First restart delay in milliseconds.
    pub restart_base_ms: u64,
    /// Restart delay cap in milliseconds.
    pub restart_max_ms: u64,
    /// Interval between liveness checks of idle engines.
    pub health_check_interval_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            restart_base_ms: 500,
            restart_max_ms: 30_000,
            health_check_interval_ms: 5_000,
        }
    }
}
