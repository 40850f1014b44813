//! WebSocket client connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use caissa_core::ConnectionId;
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::metrics::WS_MESSAGES_DROPPED_TOTAL;
use crate::protocol::ServerMessage;

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection id.
    pub id: ConnectionId,
    tx: mpsc::Sender<String>,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection writing replies into `tx`.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a reply without waiting.
    ///
    /// Returns `false` if the queue is full or closed; a full queue counts
    /// as a dropped message.
    pub fn send(&self, message: &ServerMessage) -> bool {
        match self.tx.try_send(message.to_json()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_MESSAGES_DROPPED_TOTAL).increment(1);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a direct reply, waiting up to `wait` for room.
    ///
    /// Used for answers to client requests, which must not be lost to a
    /// momentarily full queue. Returns `false` if the wait ran out (counted
    /// as a drop) or the queue is closed.
    pub async fn reply(&self, message: &ServerMessage, wait: Duration) -> bool {
        match self.tx.send_timeout(message.to_json(), wait).await {
            Ok(()) => true,
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_MESSAGES_DROPPED_TOTAL).increment(1);
                false
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => false,
        }
    }

    /// Replies dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record activity from the client (any frame, including pongs).
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the client was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
