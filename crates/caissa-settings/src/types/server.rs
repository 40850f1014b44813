//! Server and logging settings.

use serde::{Deserialize, Serialize};

/// Network listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket/HTTP port.
    pub port: u16,
    /// Outbound message buffer per connection. Intermediate updates are
    /// dropped when it is full.
    pub outbound_buffer: usize,
    /// Interval between server pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection that has not answered a ping for this long.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound message in bytes.
    pub max_message_bytes: usize,
    /// How long a closing connection waits for its job to release the engine.
    pub disconnect_grace_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            outbound_buffer: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_bytes: 64 * 1024,
            disconnect_grace_ms: 5_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
