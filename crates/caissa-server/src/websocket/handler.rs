//! Message dispatch for one connection.
//!
//! Parses a text frame and acts on it. `analyze` starts a job that supersedes
//! the connection's current one; `status` and `ping` are answered directly.
//! Bad input is answered with an `error` and the connection stays open.

use std::sync::Arc;

use caissa_engine::{AnalysisService, JobEvent, JobHandle};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;
use crate::metrics::WS_MALFORMED_MESSAGES_TOTAL;
use crate::protocol::{ClientMessage, ServerMessage, parse_client_message};

/// Per-connection dispatch state. Holds at most one active job.
pub struct MessageHandler {
    service: Arc<AnalysisService>,
    registry: Arc<ConnectionRegistry>,
    default_depth: u32,
    events: mpsc::Sender<JobEvent>,
    job: Option<JobHandle>,
}

impl MessageHandler {
    /// Create a handler whose jobs report into `events`.
    pub fn new(
        service: Arc<AnalysisService>,
        registry: Arc<ConnectionRegistry>,
        default_depth: u32,
        events: mpsc::Sender<JobEvent>,
    ) -> Self {
        Self {
            service,
            registry,
            default_depth,
            events,
            job: None,
        }
    }

    /// Handle one inbound text frame. Returns the direct reply, if any.
    pub fn handle(&mut self, text: &str) -> Option<ServerMessage> {
        let message = match parse_client_message(text) {
            Ok(message) => message,
            Err(error) => {
                warn!(error = %error, "malformed client message");
                counter!(WS_MALFORMED_MESSAGES_TOTAL).increment(1);
                return Some(ServerMessage::error(&error));
            }
        };

        match message {
            ClientMessage::Analyze(params) => match params.into_request(self.default_depth) {
                Ok(request) => {
                    let previous = self.job.take();
                    if let Some(previous) = &previous {
                        debug!(job_id = %previous.id(), "superseding running job");
                    }
                    let handle = self.service.start_job(request, self.events.clone(), previous);
                    info!(job_id = %handle.id(), family = %handle.family(), "analysis requested");
                    self.job = Some(handle);
                    None
                }
                Err(error) => {
                    debug!(error = %error, "analyze rejected");
                    Some(ServerMessage::error(&error))
                }
            },
            ClientMessage::Status => Some(ServerMessage::status(
                self.registry.count(),
                &self.service.load(),
            )),
            ClientMessage::Ping { timestamp } => Some(ServerMessage::pong(timestamp)),
        }
    }

    /// The job started most recently, if it has not been taken.
    pub fn current_job(&self) -> Option<&JobHandle> {
        self.job.as_ref()
    }

    /// Take the current job, leaving none.
    pub fn take_job(&mut self) -> Option<JobHandle> {
        self.job.take()
    }
}
