//! Server configuration.

use std::time::Duration;

use caissa_settings::CaissaSettings;

/// Runtime configuration for the gateway.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` picks a free port).
    pub port: u16,
    /// Per-connection outbound queue length.
    pub outbound_buffer: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// Silence after which a client is disconnected.
    pub heartbeat_timeout: Duration,
    /// Largest accepted inbound message.
    pub max_message_bytes: usize,
    /// How long a disconnect waits for the connection's job to wind down.
    pub disconnect_grace: Duration,
    /// Depth used when a request names no limit.
    pub default_depth: u32,
}

impl ServerConfig {
    /// Derive the gateway configuration from settings.
    pub fn from_settings(settings: &CaissaSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            outbound_buffer: server.outbound_buffer,
            heartbeat_interval: Duration::from_millis(server.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(server.heartbeat_timeout_ms),
            max_message_bytes: server.max_message_bytes,
            disconnect_grace: Duration::from_millis(server.disconnect_grace_ms),
            default_depth: settings.session.default_depth,
        }
    }

    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&CaissaSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8765);
        assert_eq!(cfg.outbound_buffer, 256);
        assert_eq!(cfg.default_depth, 20);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn bind_address_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_address(), "127.0.0.1:0");
    }

    #[test]
    fn custom_settings_flow_through() {
        let mut settings = CaissaSettings::default();
        settings.server.port = 9000;
        settings.server.disconnect_grace_ms = 250;
        settings.session.default_depth = 12;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.disconnect_grace, Duration::from_millis(250));
        assert_eq!(cfg.default_depth, 12);
    }
}
