//! Job runner tying admission, sessions, and streaming together.
//!
//! [`AnalysisService::start_job`] spawns one task per request. The task waits
//! for the job it supersedes to finish, gets a slot from the scheduler, drives
//! an [`EngineSession`] on it, returns the engine to the pool, and sends the
//! terminal event. Every job sends exactly one terminal event.

use std::sync::Arc;
use std::time::Duration;

use caissa_core::{AnalysisError, AnalysisRequest, EngineFamily, JobId};
use caissa_settings::CaissaSettings;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::pool::{EngineHealth, EnginePool, FamilyStatus};
use crate::scheduler::{Admission, AdmissionScheduler};
use crate::session::{EngineSession, SessionOutcome, SessionTimeouts};
use crate::streamer::{JobEvent, ResultStreamer};

const FALLBACK_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-job limits.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Upper bound on requested variations.
    pub max_multipv: u32,
    /// Minimum gap between same-depth updates of one variation.
    pub throttle: Duration,
    /// Wait for `bestmove` after `stop`.
    pub stop_grace: Duration,
    /// Wait for `readyok` before searching.
    pub sync_timeout: Duration,
}

impl ServiceConfig {
    /// Derive job limits from settings.
    pub fn from_settings(settings: &CaissaSettings) -> Self {
        Self {
            max_multipv: settings.session.max_multipv,
            throttle: Duration::from_millis(settings.streaming.throttle_ms),
            stop_grace: Duration::from_millis(settings.session.stop_grace_ms),
            sync_timeout: Duration::from_millis(settings.session.sync_timeout_ms),
        }
    }
}

/// Load on one family: pool slots plus admission queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamilyLoad {
    /// Slot snapshot.
    pub pool: FamilyStatus,
    /// Requests waiting for a slot.
    pub queued: usize,
}

/// Entry point for running analysis jobs.
pub struct AnalysisService {
    scheduler: Arc<AdmissionScheduler>,
    config: ServiceConfig,
}

impl AnalysisService {
    /// Create a service on top of a running scheduler.
    pub fn new(scheduler: Arc<AdmissionScheduler>, config: ServiceConfig) -> Arc<Self> {
        Arc::new(Self { scheduler, config })
    }

    /// The engine pool.
    pub fn pool(&self) -> &Arc<EnginePool> {
        self.scheduler.pool()
    }

    /// Slot and queue snapshot for every family.
    pub fn load(&self) -> Vec<FamilyLoad> {
        self.pool()
            .status()
            .into_iter()
            .map(|pool| FamilyLoad {
                queued: self.scheduler.queued(pool.family),
                pool,
            })
            .collect()
    }

    /// Start a job. If `previous` is given it is cancelled and awaited before
    /// this job asks for a slot, so its terminal event is delivered first.
    pub fn start_job(
        self: &Arc<Self>,
        request: AnalysisRequest,
        events: mpsc::Sender<JobEvent>,
        previous: Option<JobHandle>,
    ) -> JobHandle {
        let id = JobId::new();
        let family = request.family();
        let cancel = CancellationToken::new();
        let request = request.with_max_multipv(self.config.max_multipv);

        let span = info_span!("job", job_id = %id, %family);
        let join = tokio::spawn(
            Arc::clone(self)
                .run_job(id.clone(), request, events, cancel.clone(), previous)
                .instrument(span),
        );

        JobHandle {
            id,
            family,
            cancel,
            join,
        }
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: JobId,
        request: AnalysisRequest,
        events: mpsc::Sender<JobEvent>,
        cancel: CancellationToken,
        previous: Option<JobHandle>,
    ) {
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let family = request.family();
        let mut streamer = ResultStreamer::new(
            job_id.clone(),
            family,
            Arc::from(request.position().fen()),
            events,
            request.stream(),
            self.config.throttle,
        );

        if cancel.is_cancelled() {
            record(family, "cancelled");
            streamer.fail(AnalysisError::Cancelled).await;
            return;
        }

        let mut lease = match self.scheduler.submit(&job_id, family) {
            Admission::Accepted(lease) => lease,
            Admission::Queued(ticket) => match ticket.wait(&cancel).await {
                Ok(lease) => lease,
                Err(error) => {
                    record(family, outcome_label(&error));
                    streamer.fail(error).await;
                    return;
                }
            },
            Admission::Rejected(error) => {
                record(family, "rejected");
                streamer.fail(error).await;
                return;
            }
        };
        debug!(slot = lease.slot(), "job started");

        let timeouts = SessionTimeouts {
            idle: self
                .pool()
                .family_config(family)
                .map_or(FALLBACK_IDLE_TIMEOUT, |c| c.idle_timeout),
            stop_grace: self.config.stop_grace,
            sync: self.config.sync_timeout,
        };

        let (outcome, health) = match lease.io_mut() {
            Some(io) => {
                EngineSession::new(&request, io, timeouts)
                    .run(&cancel, &mut streamer)
                    .await
            }
            None => (
                SessionOutcome::Failed(AnalysisError::EngineCrashed {
                    family,
                    detail: "leased slot has no engine".to_string(),
                }),
                EngineHealth::Unhealthy,
            ),
        };
        self.pool().release(lease, health);

        record(
            family,
            match &outcome {
                SessionOutcome::Completed(_) => "completed",
                SessionOutcome::Cancelled(_) => "cancelled",
                SessionOutcome::Failed(error) => outcome_label(error),
            },
        );
        streamer.finish(outcome).await;
    }
}

fn outcome_label(error: &AnalysisError) -> &'static str {
    match error {
        AnalysisError::Cancelled => "cancelled",
        AnalysisError::QueueTimeout { .. } | AnalysisError::EngineUnavailable { .. } => "rejected",
        AnalysisError::Timeout { .. } => "timeout",
        _ => "failed",
    }
}

fn record(family: EngineFamily, outcome: &'static str) {
    counter!("analysis_jobs_total", "family" => family.wire_name(), "outcome" => outcome)
        .increment(1);
}

/// Handle to a running job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    family: EngineFamily,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl JobHandle {
    /// Job identifier.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Family the job asked for.
    pub fn family(&self) -> EngineFamily {
        self.family
    }

    /// Ask the job to stop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the job task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the job and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.join.await;
    }

    /// Cancel the job and wait at most `grace` for it. Returns whether it
    /// finished in time; a job still running keeps running detached and
    /// releases its engine when it ends.
    pub async fn stop_within(self, grace: Duration) -> bool {
        self.cancel.cancel();
        tokio::time::timeout(grace, self.join).await.is_ok()
    }

    /// Wait for the job to finish without cancelling it.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use caissa_core::{Position, SearchLimit};

    use super::*;
    use crate::pool::PoolConfig;
    use crate::streamer::JobEventKind;
    use crate::testutil::{FakeBehavior, FakeLauncher, GoBehavior, LaunchFailure, fast_pool_config};

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn config() -> ServiceConfig {
        ServiceConfig {
            max_multipv: 2,
            throttle: Duration::ZERO,
            stop_grace: Duration::from_millis(200),
            sync_timeout: Duration::from_secs(1),
        }
    }

    async fn service(
        launcher: Arc<FakeLauncher>,
        classical: usize,
        capacity: usize,
        max_wait: Duration,
    ) -> (Arc<AnalysisService>, CancellationToken) {
        service_with(launcher, fast_pool_config(classical, 1), capacity, max_wait).await
    }

    async fn service_with(
        launcher: Arc<FakeLauncher>,
        pool_config: PoolConfig,
        capacity: usize,
        max_wait: Duration,
    ) -> (Arc<AnalysisService>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let pool = EnginePool::start(launcher, pool_config, shutdown.clone()).await;
        let scheduler = AdmissionScheduler::new(pool, capacity, max_wait);
        let _ = scheduler.spawn_dispatchers(&shutdown);
        (AnalysisService::new(scheduler, config()), shutdown)
    }

    fn request(limit: SearchLimit, multipv: u32, stream: bool) -> AnalysisRequest {
        AnalysisRequest::new(
            Position::parse(START).unwrap(),
            EngineFamily::Classical,
            limit,
            multipv,
            stream,
        )
        .unwrap()
    }

    async fn terminal(rx: &mut mpsc::Receiver<JobEvent>) -> JobEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if event.kind.is_terminal() {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn job_streams_then_finishes() {
        let launcher = FakeLauncher::new(FakeBehavior::default());
        let (service, _shutdown) = service(launcher, 1, 4, Duration::from_secs(1)).await;
        let (tx, mut rx) = mpsc::channel(256);

        let handle = service.start_job(request(SearchLimit::Depth(3), 1, true), tx, None);
        let id = handle.id().clone();

        let mut updates = 0;
        let finished = loop {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.job_id, id);
            match event.kind {
                JobEventKind::Update(_) => updates += 1,
                other => break other,
            }
        };
        assert!(updates >= 1);
        let result = assert_matches!(finished, JobEventKind::Finished { result, cancelled: false } => result);
        assert_eq!(result.best_move.as_deref(), Some("e2e4"));
        handle.join().await;
        assert_eq!(service.pool().family_status(EngineFamily::Classical).unwrap().ready, 1);
    }

    #[tokio::test]
    async fn multipv_is_capped() {
        let launcher = FakeLauncher::new(FakeBehavior::default());
        let (service, _shutdown) = service(launcher, 1, 4, Duration::from_secs(1)).await;
        let (tx, mut rx) = mpsc::channel(256);

        let _handle = service.start_job(request(SearchLimit::Depth(2), 4, false), tx, None);

        let event = terminal(&mut rx).await;
        let result = assert_matches!(event.kind, JobEventKind::Finished { result, .. } => result);
        assert_eq!(result.lines.len(), 2);
    }

    #[tokio::test]
    async fn superseding_job_cancels_previous_first() {
        let launcher = FakeLauncher::new(FakeBehavior::slow(Duration::from_millis(10)));
        let (service, _shutdown) = service(launcher, 1, 4, Duration::from_secs(1)).await;
        let (tx, mut rx) = mpsc::channel(256);

        let first = service.start_job(request(SearchLimit::Infinite, 1, true), tx.clone(), None);
        let first_id = first.id().clone();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = service.start_job(request(SearchLimit::Depth(2), 1, true), tx, Some(first));
        let second_id = second.id().clone();

        let event = terminal(&mut rx).await;
        assert_eq!(event.job_id, first_id);
        assert_matches!(event.kind, JobEventKind::Finished { cancelled: true, .. });

        let event = terminal(&mut rx).await;
        assert_eq!(event.job_id, second_id);
        assert_matches!(event.kind, JobEventKind::Finished { cancelled: false, .. });
    }

    #[tokio::test]
    async fn queued_job_times_out() {
        let launcher = FakeLauncher::new(FakeBehavior::slow(Duration::from_millis(10)));
        let (service, _shutdown) = service(launcher, 1, 4, Duration::from_millis(50)).await;
        let (tx, mut rx) = mpsc::channel(256);

        let running = service.start_job(request(SearchLimit::Infinite, 1, false), tx.clone(), None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiting = service.start_job(request(SearchLimit::Depth(1), 1, false), tx, None);
        let waiting_id = waiting.id().clone();

        let event = terminal(&mut rx).await;
        assert_eq!(event.job_id, waiting_id);
        assert_matches!(event.kind, JobEventKind::Failed(AnalysisError::QueueTimeout { .. }));
        running.stop().await;
    }

    #[tokio::test]
    async fn degraded_family_rejects_immediately() {
        let launcher = FakeLauncher::new(FakeBehavior {
            launch_failure: Some(LaunchFailure::Fatal),
            ..FakeBehavior::default()
        });
        let (service, _shutdown) = service(launcher, 1, 4, Duration::from_secs(1)).await;
        let (tx, mut rx) = mpsc::channel(16);

        let _handle = service.start_job(request(SearchLimit::Depth(1), 1, true), tx, None);

        let event = terminal(&mut rx).await;
        assert_matches!(event.kind, JobEventKind::Failed(AnalysisError::EngineUnavailable { .. }));
    }

    #[tokio::test]
    async fn crashed_engine_is_replaced() {
        let launcher = FakeLauncher::new(FakeBehavior {
            on_go: GoBehavior::Crash,
            ..FakeBehavior::default()
        });
        let pool_config = PoolConfig {
            restart_base_ms: 200,
            restart_max_ms: 400,
            ..fast_pool_config(1, 1)
        };
        let (service, _shutdown) =
            service_with(launcher.clone(), pool_config, 4, Duration::from_secs(2)).await;
        let (tx, mut rx) = mpsc::channel(16);

        let _handle = service.start_job(request(SearchLimit::Depth(3), 1, true), tx.clone(), None);
        let event = terminal(&mut rx).await;
        assert_matches!(event.kind, JobEventKind::Failed(AnalysisError::EngineCrashed { .. }));

        launcher.set_behavior(EngineFamily::Classical, FakeBehavior::default());
        let _handle = service.start_job(request(SearchLimit::Depth(1), 1, true), tx, None);
        let event = terminal(&mut rx).await;
        assert_matches!(event.kind, JobEventKind::Finished { cancelled: false, .. });
    }

    #[tokio::test]
    async fn stop_within_returns_after_cancel() {
        let launcher = FakeLauncher::new(FakeBehavior::slow(Duration::from_millis(10)));
        let (service, _shutdown) = service(launcher, 1, 4, Duration::from_secs(1)).await;
        let (tx, _rx) = mpsc::channel(256);

        let handle = service.start_job(request(SearchLimit::Infinite, 1, true), tx, None);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(handle.stop_within(Duration::from_secs(1)).await);
        assert_eq!(service.load()[0].pool.busy, 0);
    }
}
