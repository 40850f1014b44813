//! Registry of connected clients.

use std::sync::Arc;

use caissa_core::ConnectionId;
use dashmap::DashMap;
use metrics::{counter, gauge};

use super::connection::ClientConnection;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

/// Connected clients indexed by id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    #[allow(clippy::cast_precision_loss)]
    pub fn register(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.count() as f64);
    }

    /// Remove a connection. Returns it if it was registered.
    #[allow(clippy::cast_precision_loss)]
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = self.connections.remove(id).map(|(_, c)| c);
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.count() as f64);
        removed
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of connected clients.
    pub fn count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn connection(id: &str) -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(ClientConnection::new(ConnectionId::from(id), tx))
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new();
        registry.register(connection("a"));
        registry.register(connection("b"));
        assert_eq!(registry.count(), 2);
        assert!(registry.get(&ConnectionId::from("a")).is_some());

        assert!(registry.unregister(&ConnectionId::from("a")).is_some());
        assert!(registry.unregister(&ConnectionId::from("a")).is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn same_id_registers_once() {
        let registry = ConnectionRegistry::new();
        registry.register(connection("a"));
        registry.register(connection("a"));
        assert_eq!(registry.count(), 1);
    }
}
