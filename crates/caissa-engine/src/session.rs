//! Per-job engine session.
//!
//! ```text
//! Started ──► Running ──► Completed | Cancelled | Failed
//! ```
//!
//! A session borrows a leased engine for one request. It resets the engine,
//! syncs with `isready` so stale output from an earlier job is discarded,
//! starts the search, and turns `info` lines into white-positive updates
//! until `bestmove`. Cancellation sends `stop` and waits a short grace period
//! for the engine's final `bestmove`; an engine that misses it is reported
//! unhealthy so the pool replaces it. [`EngineSession::run`] consumes the
//! session and returns exactly one terminal outcome.

use std::collections::BTreeMap;
use std::time::Duration;

use caissa_core::{AnalysisError, AnalysisLine, AnalysisRequest, AnalysisResult, AnalysisUpdate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dialect::Dialect;
use crate::errors::EngineError;
use crate::parser::{EngineOutput, InfoLine, parse_line};
use crate::pool::EngineHealth;
use crate::process::{EngineIo, millis};
use crate::streamer::ResultStreamer;

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created; engine not yet searching.
    Started,
    /// Search in progress.
    Running,
    /// Engine reported `bestmove` on its own.
    Completed,
    /// Stopped on request.
    Cancelled,
    /// Engine died, failed I/O, or went silent.
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Terminal result of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Search finished normally.
    Completed(AnalysisResult),
    /// Search was stopped; carries whatever the engine had found.
    Cancelled(AnalysisResult),
    /// Search failed.
    Failed(AnalysisError),
}

/// Timeouts applied by a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionTimeouts {
    /// Longest silence tolerated while searching. Any requested movetime is
    /// added on top.
    pub idle: Duration,
    /// How long to wait for `bestmove` after `stop`.
    pub stop_grace: Duration,
    /// How long to wait for `readyok` before the search starts.
    pub sync: Duration,
}

/// One request driving one engine.
pub struct EngineSession<'a> {
    request: &'a AnalysisRequest,
    io: &'a mut EngineIo,
    dialect: Dialect,
    timeouts: SessionTimeouts,
    multipv: u32,
    state: SessionState,
    lines: BTreeMap<u32, AnalysisLine>,
}

impl<'a> EngineSession<'a> {
    /// Bind `request` to a leased engine.
    pub fn new(request: &'a AnalysisRequest, io: &'a mut EngineIo, timeouts: SessionTimeouts) -> Self {
        let dialect = Dialect::for_family(request.family());
        Self {
            request,
            io,
            dialect,
            timeouts,
            multipv: dialect.effective_multipv(request.multipv()),
            state: SessionState::Started,
            lines: BTreeMap::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the search to a terminal state.
    ///
    /// Returns the outcome and whether the engine can be reused.
    pub async fn run(
        mut self,
        cancel: &CancellationToken,
        streamer: &mut ResultStreamer,
    ) -> (SessionOutcome, EngineHealth) {
        if let Err(err) = self.prepare().await {
            return self.fail(&err);
        }
        if cancel.is_cancelled() {
            // engine is synced and idle; nothing to stop
            self.transition(SessionState::Cancelled);
            return (SessionOutcome::Cancelled(self.result(None, None)), EngineHealth::Healthy);
        }
        if let Err(err) = self.io.send(&self.dialect.go_command(self.request.limit())).await {
            return self.fail(&err);
        }
        self.transition(SessionState::Running);

        let idle = self.timeouts.idle + self.request.limit().movetime().unwrap_or_default();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return self.stop().await,
                next = tokio::time::timeout(idle, self.io.next_line()) => next,
            };
            let line = match next {
                Ok(Ok(line)) => line,
                Ok(Err(err)) => return self.fail(&err),
                Err(_) => {
                    return self.fail(&EngineError::Timeout {
                        waiting_for: "search output",
                        timeout_ms: millis(idle),
                    });
                }
            };
            match parse_line(&line) {
                EngineOutput::Info(info) => {
                    if let Some(update) = self.record(&info) {
                        streamer.offer(update);
                    }
                }
                EngineOutput::BestMove { best, ponder } => {
                    self.transition(SessionState::Completed);
                    return (
                        SessionOutcome::Completed(self.result(best, ponder)),
                        EngineHealth::Healthy,
                    );
                }
                EngineOutput::ReadyOk | EngineOutput::Other => {}
            }
        }
    }

    /// Reset the engine, set the position, and wait for it to be idle.
    async fn prepare(&mut self) -> Result<(), EngineError> {
        for command in self.dialect.setup_commands(self.multipv) {
            self.io.send(&command).await?;
        }
        self.io
            .send(&self.dialect.position_command(self.request.position().fen()))
            .await?;
        self.io.send("isready").await?;
        self.io.expect("readyok", self.timeouts.sync).await
    }

    /// Stop the search and wait briefly for the engine to settle.
    async fn stop(mut self) -> (SessionOutcome, EngineHealth) {
        self.transition(SessionState::Cancelled);
        if let Err(err) = self.io.send(self.dialect.stop_command()).await {
            warn!(engine = %self.io.label(), error = %err, "failed to send stop");
            return (SessionOutcome::Cancelled(self.result(None, None)), EngineHealth::Unhealthy);
        }

        let grace = self.timeouts.stop_grace;
        let settled = tokio::time::timeout(grace, async {
            loop {
                match parse_line(&self.io.next_line().await?) {
                    EngineOutput::Info(info) => {
                        let _ = self.record(&info);
                    }
                    EngineOutput::BestMove { best, ponder } => {
                        return Ok::<_, EngineError>((best, ponder));
                    }
                    EngineOutput::ReadyOk | EngineOutput::Other => {}
                }
            }
        })
        .await;

        match settled {
            Ok(Ok((best, ponder))) => (
                SessionOutcome::Cancelled(self.result(best, ponder)),
                EngineHealth::Healthy,
            ),
            Ok(Err(err)) => {
                warn!(engine = %self.io.label(), error = %err, "engine failed while stopping");
                (SessionOutcome::Cancelled(self.result(None, None)), EngineHealth::Unhealthy)
            }
            Err(_) => {
                warn!(
                    engine = %self.io.label(),
                    grace_ms = millis(grace),
                    "engine ignored stop, presumed wedged"
                );
                (SessionOutcome::Cancelled(self.result(None, None)), EngineHealth::Unhealthy)
            }
        }
    }

    fn fail(mut self, err: &EngineError) -> (SessionOutcome, EngineHealth) {
        self.transition(SessionState::Failed);
        let family = self.request.family();
        let error = match err {
            EngineError::Timeout { timeout_ms, .. } => AnalysisError::Timeout {
                family,
                idle_ms: *timeout_ms,
            },
            other => AnalysisError::EngineCrashed {
                family,
                detail: other.to_string(),
            },
        };
        warn!(engine = %self.io.label(), error = %error, "analysis failed");
        (SessionOutcome::Failed(error), EngineHealth::Unhealthy)
    }

    /// Store a progress line. Returns an update unless the line is unusable
    /// or would move its variation to a shallower depth.
    fn record(&mut self, info: &InfoLine) -> Option<AnalysisUpdate> {
        let line = info.to_line(self.request.position().side_to_move())?;
        if line.multipv > self.multipv {
            return None;
        }
        if let Some(previous) = self.lines.get(&line.multipv) {
            if line.depth < previous.depth {
                return None;
            }
        }
        let multipv = line.multipv;
        let depth = line.depth;
        let _ = self.lines.insert(multipv, line);
        Some(AnalysisUpdate {
            multipv,
            depth,
            lines: self.lines.values().cloned().collect(),
        })
    }

    fn result(&self, best: Option<String>, ponder: Option<String>) -> AnalysisResult {
        AnalysisResult::new(best, ponder, self.lines.values().cloned().collect())
    }

    fn transition(&mut self, to: SessionState) {
        debug_assert!(!self.state.is_terminal(), "session already terminal");
        debug!(engine = %self.io.label(), from = ?self.state, to = ?to, "session state");
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use caissa_core::{EngineFamily, JobId, Position, Score, SearchLimit};
    use tokio::sync::mpsc;

    use super::*;
    use crate::pool::{EnginePool, Lease};
    use crate::streamer::{JobEvent, JobEventKind};
    use crate::testutil::{FakeBehavior, FakeLauncher, GoBehavior, fast_pool_config};

    const START: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
    const BLACK_TO_MOVE: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

    struct Harness {
        launcher: Arc<FakeLauncher>,
        pool: Arc<EnginePool>,
        lease: Lease,
        events: mpsc::Receiver<JobEvent>,
        streamer: Option<ResultStreamer>,
    }

    async fn harness(family: EngineFamily, behavior: FakeBehavior) -> Harness {
        let launcher = FakeLauncher::new(behavior);
        let pool = EnginePool::start(
            launcher.clone(),
            fast_pool_config(1, 1),
            CancellationToken::new(),
        )
        .await;
        let lease = pool.acquire(family).unwrap();
        let (tx, events) = mpsc::channel(1024);
        let streamer = ResultStreamer::new(
            JobId::new(),
            family,
            Arc::from(START),
            tx,
            true,
            Duration::ZERO,
        );
        Harness {
            launcher,
            pool,
            lease,
            events,
            streamer: Some(streamer),
        }
    }

    fn request(fen: &str, family: EngineFamily, limit: SearchLimit, multipv: u32) -> AnalysisRequest {
        AnalysisRequest::new(Position::parse(fen).unwrap(), family, limit, multipv, true).unwrap()
    }

    fn timeouts() -> SessionTimeouts {
        SessionTimeouts {
            idle: Duration::from_millis(300),
            stop_grace: Duration::from_millis(200),
            sync: Duration::from_secs(1),
        }
    }

    impl Harness {
        async fn run(
            &mut self,
            request: &AnalysisRequest,
            timeouts: SessionTimeouts,
            cancel: &CancellationToken,
        ) -> (SessionOutcome, EngineHealth) {
            let mut streamer = self.streamer.take().unwrap();
            let io = self.lease.io_mut().unwrap();
            let session = EngineSession::new(request, io, timeouts);
            assert_eq!(session.state(), SessionState::Started);
            session.run(cancel, &mut streamer).await
        }

        fn updates(&mut self) -> Vec<AnalysisUpdate> {
            std::iter::from_fn(|| self.events.try_recv().ok())
                .filter_map(|e| match e.kind {
                    JobEventKind::Update(update) => Some(update),
                    _ => None,
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn depth_limited_search_completes() {
        let mut h = harness(EngineFamily::Classical, FakeBehavior::default()).await;
        let request = request(START, EngineFamily::Classical, SearchLimit::Depth(3), 1);

        let (outcome, health) = h.run(&request, timeouts(), &CancellationToken::new()).await;

        assert_eq!(health, EngineHealth::Healthy);
        let result = assert_matches!(outcome, SessionOutcome::Completed(r) => r);
        assert_eq!(result.best_move.as_deref(), Some("e2e4"));
        assert_eq!(result.ponder.as_deref(), Some("e7e5"));
        assert_eq!(result.depth(), 3);
        assert_eq!(result.score(), Some(Score::Centipawns(23)));

        let depths: Vec<u32> = h.updates().iter().map(|u| u.depth).collect();
        assert_eq!(depths, vec![1, 2, 3]);

        let commands = h.launcher.commands();
        assert!(commands.contains(&"ucinewgame".to_string()));
        assert!(commands.contains(&format!("position fen {START}")));
        assert!(commands.contains(&"go depth 3".to_string()));
    }

    #[tokio::test]
    async fn scores_are_white_positive() {
        let mut h = harness(EngineFamily::Classical, FakeBehavior::default()).await;
        let request = request(BLACK_TO_MOVE, EngineFamily::Classical, SearchLimit::Depth(2), 1);

        let (outcome, _) = h.run(&request, timeouts(), &CancellationToken::new()).await;

        let result = assert_matches!(outcome, SessionOutcome::Completed(r) => r);
        assert_eq!(result.score(), Some(Score::Centipawns(-22)));
    }

    #[tokio::test]
    async fn multipv_reports_every_variation() {
        let mut h = harness(EngineFamily::Classical, FakeBehavior::default()).await;
        let request = request(START, EngineFamily::Classical, SearchLimit::Depth(2), 3);

        let (outcome, _) = h.run(&request, timeouts(), &CancellationToken::new()).await;

        let result = assert_matches!(outcome, SessionOutcome::Completed(r) => r);
        let indexes: Vec<u32> = result.lines.iter().map(|l| l.multipv).collect();
        assert_eq!(indexes, vec![1, 2, 3]);
        assert_eq!(result.lines[1].pv, vec!["d2d4", "d7d5"]);

        let last = h.updates().pop().unwrap();
        assert_eq!(last.lines.len(), 3);
        assert!(h.launcher.commands().contains(&"setoption name MultiPV value 3".to_string()));
    }

    #[tokio::test]
    async fn neural_search_is_single_line_and_node_limited() {
        let mut h = harness(EngineFamily::Neural, FakeBehavior::default()).await;
        let request = request(START, EngineFamily::Neural, SearchLimit::Depth(2), 3);

        let (outcome, health) = h.run(&request, timeouts(), &CancellationToken::new()).await;

        assert_eq!(health, EngineHealth::Healthy);
        let result = assert_matches!(outcome, SessionOutcome::Completed(r) => r);
        assert_eq!(result.lines.len(), 1);
        let commands = h.launcher.commands();
        assert!(commands.contains(&"go nodes 1600".to_string()));
        assert!(!commands.iter().any(|c| c.contains("MultiPV")));
    }

    #[tokio::test]
    async fn cancel_stops_a_running_search() {
        let mut h = harness(
            EngineFamily::Classical,
            FakeBehavior::slow(Duration::from_millis(10)),
        )
        .await;
        let request = request(START, EngineFamily::Classical, SearchLimit::Infinite, 1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            trigger.cancel();
        });

        let (outcome, health) = h.run(&request, timeouts(), &cancel).await;

        assert_eq!(health, EngineHealth::Healthy);
        let result = assert_matches!(outcome, SessionOutcome::Cancelled(r) => r);
        assert_eq!(result.best_move.as_deref(), Some("e2e4"));
        assert!(result.depth() >= 1);
        assert!(h.launcher.commands().contains(&"stop".to_string()));
    }

    #[tokio::test]
    async fn cancel_before_search_skips_go() {
        let mut h = harness(EngineFamily::Classical, FakeBehavior::default()).await;
        let request = request(START, EngineFamily::Classical, SearchLimit::Depth(5), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (outcome, health) = h.run(&request, timeouts(), &cancel).await;

        assert_eq!(health, EngineHealth::Healthy);
        let result = assert_matches!(outcome, SessionOutcome::Cancelled(r) => r);
        assert!(result.is_empty());
        assert!(!h.launcher.commands().iter().any(|c| c.starts_with("go")));
    }

    #[tokio::test]
    async fn engine_ignoring_stop_is_unhealthy() {
        let behavior = FakeBehavior {
            ignore_stop: true,
            ..FakeBehavior::slow(Duration::from_millis(10))
        };
        let mut h = harness(EngineFamily::Classical, behavior).await;
        let request = request(START, EngineFamily::Classical, SearchLimit::Infinite, 1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            trigger.cancel();
        });

        let (outcome, health) = h.run(&request, timeouts(), &cancel).await;

        assert_eq!(health, EngineHealth::Unhealthy);
        assert_matches!(outcome, SessionOutcome::Cancelled(_));
    }

    #[tokio::test]
    async fn crash_mid_search_fails() {
        let behavior = FakeBehavior {
            on_go: GoBehavior::Crash,
            ..FakeBehavior::default()
        };
        let mut h = harness(EngineFamily::Classical, behavior).await;
        let request = request(START, EngineFamily::Classical, SearchLimit::Depth(5), 1);

        let (outcome, health) = h.run(&request, timeouts(), &CancellationToken::new()).await;

        assert_eq!(health, EngineHealth::Unhealthy);
        assert_matches!(
            outcome,
            SessionOutcome::Failed(AnalysisError::EngineCrashed {
                family: EngineFamily::Classical,
                ..
            })
        );
    }

    #[tokio::test]
    async fn silent_engine_times_out() {
        let behavior = FakeBehavior {
            on_go: GoBehavior::Hang,
            ..FakeBehavior::default()
        };
        let mut h = harness(EngineFamily::Classical, behavior).await;
        let request = request(START, EngineFamily::Classical, SearchLimit::Depth(5), 1);
        let timeouts = SessionTimeouts {
            idle: Duration::from_millis(100),
            ..timeouts()
        };

        let (outcome, health) = h.run(&request, timeouts, &CancellationToken::new()).await;

        assert_eq!(health, EngineHealth::Unhealthy);
        assert_matches!(
            outcome,
            SessionOutcome::Failed(AnalysisError::Timeout { idle_ms: 100, .. })
        );
    }

    #[tokio::test]
    async fn healthy_engine_is_reusable() {
        let mut h = harness(EngineFamily::Classical, FakeBehavior::default()).await;
        let first = request(START, EngineFamily::Classical, SearchLimit::Depth(4), 1);
        let (_, health) = h.run(&first, timeouts(), &CancellationToken::new()).await;
        assert_eq!(health, EngineHealth::Healthy);

        let (tx, _events) = mpsc::channel(16);
        let mut streamer = ResultStreamer::new(
            JobId::new(),
            EngineFamily::Classical,
            Arc::from(BLACK_TO_MOVE),
            tx,
            false,
            Duration::ZERO,
        );
        let second = request(BLACK_TO_MOVE, EngineFamily::Classical, SearchLimit::Depth(1), 1);
        let io = h.lease.io_mut().unwrap();
        let (outcome, _) = EngineSession::new(&second, io, timeouts())
            .run(&CancellationToken::new(), &mut streamer)
            .await;

        let result = assert_matches!(outcome, SessionOutcome::Completed(r) => r);
        assert_eq!(result.depth(), 1);
        h.pool.release(h.lease, EngineHealth::Healthy);
    }
}
