//! Throttled delivery of job output to the owning connection.
//!
//! Progress updates are best effort. A variation's update is forwarded when
//! its depth increases, otherwise at most once per throttle interval. When
//! the connection's channel is full the update is dropped so the engine read
//! loop never waits on a slow client. The terminal event always goes out and
//! is never throttled.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use caissa_core::{AnalysisError, AnalysisResult, AnalysisUpdate, EngineFamily, JobId};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

use crate::session::SessionOutcome;

/// Something a job reports to its connection.
#[derive(Clone, Debug)]
pub struct JobEvent {
    /// Job that produced the event.
    pub job_id: JobId,
    /// Family the job asked for.
    pub family: EngineFamily,
    /// Position under analysis.
    pub fen: Arc<str>,
    /// Payload.
    pub kind: JobEventKind,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq)]
pub enum JobEventKind {
    /// Intermediate progress.
    Update(AnalysisUpdate),
    /// Terminal result. `cancelled` marks a stopped search.
    Finished {
        /// Best move and final lines.
        result: AnalysisResult,
        /// Whether the search was stopped early.
        cancelled: bool,
    },
    /// Terminal failure, including admission errors.
    Failed(AnalysisError),
}

impl JobEventKind {
    /// Whether this is the last event of its job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Update(_))
    }
}

/// Forwards one job's events.
pub struct ResultStreamer {
    job_id: JobId,
    family: EngineFamily,
    fen: Arc<str>,
    tx: mpsc::Sender<JobEvent>,
    stream: bool,
    throttle: Duration,
    last: BTreeMap<u32, (u32, Instant)>,
    forwarded: u64,
    dropped: u64,
}

impl ResultStreamer {
    /// Create a streamer. With `stream` off only the terminal event is sent.
    pub fn new(
        job_id: JobId,
        family: EngineFamily,
        fen: Arc<str>,
        tx: mpsc::Sender<JobEvent>,
        stream: bool,
        throttle: Duration,
    ) -> Self {
        Self {
            job_id,
            family,
            fen,
            tx,
            stream,
            throttle,
            last: BTreeMap::new(),
            forwarded: 0,
            dropped: 0,
        }
    }

    /// Offer a progress update. Never blocks. Returns whether it was sent.
    pub fn offer(&mut self, update: AnalysisUpdate) -> bool {
        if !self.stream {
            return false;
        }
        let now = Instant::now();
        if let Some(&(depth, at)) = self.last.get(&update.multipv) {
            if update.depth <= depth && now.duration_since(at) < self.throttle {
                trace!(job_id = %self.job_id, multipv = update.multipv, "update throttled");
                return false;
            }
        }

        let key = (update.multipv, update.depth);
        match self.tx.try_send(self.event(JobEventKind::Update(update))) {
            Ok(()) => {
                let _ = self.last.insert(key.0, (key.1, now));
                self.forwarded += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                counter!("stream_updates_dropped_total").increment(1);
                trace!(job_id = %self.job_id, "client slow, update dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Deliver the terminal event for a finished session.
    pub async fn finish(self, outcome: SessionOutcome) {
        let kind = match outcome {
            SessionOutcome::Completed(result) => JobEventKind::Finished {
                result,
                cancelled: false,
            },
            SessionOutcome::Cancelled(result) if result.is_empty() => {
                JobEventKind::Failed(AnalysisError::Cancelled)
            }
            SessionOutcome::Cancelled(result) => JobEventKind::Finished {
                result,
                cancelled: true,
            },
            SessionOutcome::Failed(error) => JobEventKind::Failed(error),
        };
        self.deliver(kind).await;
    }

    /// Deliver a terminal failure for a job that never reached an engine.
    pub async fn fail(self, error: AnalysisError) {
        self.deliver(JobEventKind::Failed(error)).await;
    }

    /// Updates sent so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Updates dropped because the connection was saturated.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    async fn deliver(self, kind: JobEventKind) {
        debug!(
            job_id = %self.job_id,
            forwarded = self.forwarded,
            dropped = self.dropped,
            "job finished"
        );
        // a closed channel means the connection is gone
        let _ = self.tx.send(self.event(kind)).await;
    }

    fn event(&self, kind: JobEventKind) -> JobEvent {
        JobEvent {
            job_id: self.job_id.clone(),
            family: self.family,
            fen: Arc::clone(&self.fen),
            kind,
        }
    }
}
