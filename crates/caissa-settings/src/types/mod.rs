//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it changes. Each type implements [`Default`]
//! with production values.

mod engines;
mod runtime;
mod server;

pub use engines::*;
pub use runtime::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "engines": { "stockfish": { "ceiling": 2 } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaissaSettings {
    /// Network listener settings.
    pub server: ServerSettings,
    /// Engine binaries, options, and pool sizes.
    pub engines: EnginesSettings,
    /// Admission queue settings.
    pub scheduler: SchedulerSettings,
    /// Per-job engine session settings.
    pub session: SessionSettings,
    /// Update throttling.
    pub streaming: StreamingSettings,
    /// Process restart and health-check settings.
    pub supervisor: SupervisorSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl CaissaSettings {
    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, engine) in [
            ("stockfish", &self.engines.stockfish),
            ("leela", &self.engines.leela),
        ] {
            if engine.enabled && engine.ceiling == 0 {
                return Err(SettingsError::ZeroCeiling { engine: name });
            }
            non_zero(&format!("engines.{name}.handshakeTimeoutMs"), engine.handshake_timeout_ms)?;
            non_zero(&format!("engines.{name}.idleTimeoutMs"), engine.idle_timeout_ms)?;
        }
        non_zero("server.heartbeatIntervalMs", self.server.heartbeat_interval_ms)?;
        non_zero("server.heartbeatTimeoutMs", self.server.heartbeat_timeout_ms)?;
        non_zero("session.syncTimeoutMs", self.session.sync_timeout_ms)?;
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundBuffer must be at least 1".to_string(),
            ));
        }
        if self.session.max_multipv == 0 {
            return Err(SettingsError::InvalidValue(
                "session.maxMultipv must be at least 1".to_string(),
            ));
        }
        if self.supervisor.restart_base_ms > self.supervisor.restart_max_ms {
            return Err(SettingsError::InvalidValue(
                "supervisor.restartBaseMs exceeds restartMaxMs".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_zero(key: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(SettingsError::ZeroDuration {
            key: key.to_string(),
        });
    }
    Ok(())
}
