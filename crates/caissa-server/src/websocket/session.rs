//! WebSocket session lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use caissa_core::{AnalysisError, ConnectionId};
use caissa_engine::JobEvent;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::MessageHandler;
use crate::protocol::ServerMessage;
use crate::server::AppState;

/// How long a direct reply may wait for room in the outbound queue.
const REPLY_WAIT: Duration = Duration::from_secs(5);
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Run a WebSocket session for a connected client.
///
/// 1. Registers the connection
/// 2. Dispatches inbound text frames through a [`MessageHandler`]
/// 3. Writes replies and job events from a dedicated writer task, with
///    periodic pings; a client silent for longer than the heartbeat timeout
///    is disconnected
/// 4. On disconnect, cancels the connection's job and waits briefly for it
///    to release its engine
#[instrument(skip_all, fields(client_id = %connection_id))]
pub async fn run_ws_session(ws: WebSocket, connection_id: ConnectionId, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let config = Arc::clone(&state.config);

    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(config.outbound_buffer);
    let (event_tx, mut event_rx) = mpsc::channel::<JobEvent>(config.outbound_buffer);
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), reply_tx));
    state.registry.register(Arc::clone(&connection));
    info!(connections = state.registry.count(), "client connected");

    let writer_conn = Arc::clone(&connection);
    let heartbeat_interval = config.heartbeat_interval;
    let heartbeat_timeout = config.heartbeat_timeout;
    let mut writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL));
        let _ = ping.tick().await;

        loop {
            let text = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(text) => text,
                    None => break,
                },
                event = event_rx.recv() => match event {
                    Some(event) => ServerMessage::from_event(event).to_json(),
                    None => break,
                },
                _ = ping.tick() => {
                    if writer_conn.idle_for() > heartbeat_timeout {
                        warn!(idle = ?writer_conn.idle_for(), "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let shutdown = state.shutdown.token();
    let mut handler = MessageHandler::new(
        Arc::clone(&state.service),
        Arc::clone(&state.registry),
        config.default_depth,
        event_tx,
    );
    let mut writer_finished = false;

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            _ = &mut writer => {
                writer_finished = true;
                break;
            }
            () = shutdown.cancelled() => {
                debug!("server shutting down, closing connection");
                break;
            }
        };
        let Some(Ok(frame)) = frame else { break };
        connection.mark_alive();

        let text = match frame {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    let error = AnalysisError::MalformedMessage("binary frame is not UTF-8".into());
                    let _ = connection.reply(&ServerMessage::error(&error), REPLY_WAIT).await;
                    continue;
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let Some(reply) = handler.handle(&text) {
            if !connection.reply(&reply, REPLY_WAIT).await {
                debug!("reply dropped, client queue full or closed");
            }
        }
    }

    if let Some(job) = handler.take_job() {
        let job_id = job.id().clone();
        if !job.stop_within(config.disconnect_grace).await {
            warn!(%job_id, "job still stopping after disconnect grace period");
        }
    }
    drop(handler);
    let _ = state.registry.unregister(&connection_id);
    if !writer_finished {
        writer.abort();
    }
    info!(
        age_secs = connection.age().as_secs(),
        dropped = connection.drop_count(),
        "client disconnected"
    );
}
