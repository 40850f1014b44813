//! Test doubles: a scripted in-memory UCI engine and fast pool settings.
//!
//! The fake engine answers the handshake, honours `MultiPV`, and emits one
//! `info` round per tick until it reaches its target depth, then reports
//! `bestmove`. Behaviour knobs simulate crashes, hangs, and launch failures.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use caissa_core::EngineFamily;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use crate::errors::{DiscoveryError, EngineError};
use crate::pool::{FamilyConfig, PoolConfig};
use crate::process::{EngineIo, EngineLauncher};

/// What the fake engine does when told to `go`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoBehavior {
    /// Search normally.
    Search,
    /// Exit immediately, closing stdout.
    Crash,
    /// Go silent and ignore every further command.
    Hang,
}

/// How launching the fake engine fails, if at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchFailure {
    /// As if the binary were missing.
    Fatal,
    /// A retryable spawn error.
    Transient,
}

/// Fake engine knobs.
#[derive(Clone, Debug)]
pub struct FakeBehavior {
    /// Delay between depth reports.
    pub tick: Duration,
    /// Depth at which timed and node-limited searches stop.
    pub max_depth: u32,
    /// Reaction to `go`.
    pub on_go: GoBehavior,
    /// Treat `stop` as the start of a hang.
    pub ignore_stop: bool,
    /// Fail at launch instead of starting.
    pub launch_failure: Option<LaunchFailure>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(5),
            max_depth: 12,
            on_go: GoBehavior::Search,
            ignore_stop: false,
            launch_failure: None,
        }
    }
}

impl FakeBehavior {
    /// Searches that report slowly, for tests that need jobs to stay busy.
    pub fn slow(tick: Duration) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}

const VARIATIONS: [[&str; 2]; 4] = [
    ["e2e4", "e7e5"],
    ["d2d4", "d7d5"],
    ["g1f3", "g8f6"],
    ["c2c4", "c7c5"],
];

/// Launches scripted engines over in-memory pipes.
#[derive(Default)]
pub struct FakeLauncher {
    behaviors: Mutex<BTreeMap<EngineFamily, FakeBehavior>>,
    launches: AtomicUsize,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    /// Every family uses `behavior`.
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        let launcher = Self::default();
        for family in EngineFamily::ALL {
            launcher.set_behavior(family, behavior.clone());
        }
        Arc::new(launcher)
    }

    /// Change the behaviour of future launches of `family`.
    pub fn set_behavior(&self, family: EngineFamily, behavior: FakeBehavior) {
        let _ = self.behaviors.lock().insert(family, behavior);
    }

    /// Successful and failed launch attempts so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Every command any fake engine has received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl EngineLauncher for FakeLauncher {
    async fn launch(&self, family: EngineFamily, slot: usize) -> Result<EngineIo, EngineError> {
        let _ = self.launches.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .get(&family)
            .cloned()
            .unwrap_or_default();

        match behavior.launch_failure {
            Some(LaunchFailure::Fatal) => {
                return Err(DiscoveryError::BinaryNotFound {
                    family,
                    searched: "fake".into(),
                }
                .into());
            }
            Some(LaunchFailure::Transient) => {
                return Err(EngineError::Io(std::io::Error::other("fake spawn failure")));
            }
            None => {}
        }

        let (client_w, engine_r) = tokio::io::duplex(64 * 1024);
        let (engine_w, client_r) = tokio::io::duplex(64 * 1024);
        let commands = Arc::clone(&self.commands);
        let _ = tokio::spawn(run_fake_engine(behavior, engine_r, engine_w, commands));
        Ok(EngineIo::new(format!("{family}#{slot}"), client_r, client_w, None))
    }
}

struct Search {
    depth: u32,
    target: u32,
}

fn target_depth(go: &str, behavior: &FakeBehavior) -> u32 {
    let tokens: Vec<&str> = go.split_whitespace().collect();
    let value = |key: &str| -> Option<u64> {
        let index = tokens.iter().position(|t| *t == key)?;
        tokens.get(index + 1)?.parse().ok()
    };
    let max = u64::from(behavior.max_depth.max(1));
    let tick_ms = u64::try_from(behavior.tick.as_millis()).unwrap_or(1).max(1);
    let target = if tokens.contains(&"infinite") {
        u64::from(u32::MAX)
    } else if let Some(depth) = value("depth") {
        depth.max(1)
    } else if let Some(nodes) = value("nodes") {
        (nodes / 800).clamp(1, max)
    } else if let Some(ms) = value("movetime") {
        (ms / tick_ms).clamp(1, max)
    } else {
        max
    };
    u32::try_from(target).unwrap_or(u32::MAX)
}

async fn run_fake_engine(
    behavior: FakeBehavior,
    input: DuplexStream,
    mut out: DuplexStream,
    commands: Arc<Mutex<Vec<String>>>,
) {
    let mut lines = BufReader::new(input).lines();
    let mut multipv = 1usize;
    let mut search: Option<Search> = None;
    let mut hung = false;

    loop {
        let searching = search.is_some();
        let mut reply = Vec::new();
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { return };
                commands.lock().push(line.clone());
                if hung {
                    continue;
                }
                match line.split_whitespace().next().unwrap_or("") {
                    "uci" => {
                        reply.push("id name FakeEngine".to_string());
                        reply.push("uciok".to_string());
                    }
                    "isready" => reply.push("readyok".to_string()),
                    "setoption" if line.contains("name MultiPV value") => {
                        multipv = line
                            .rsplit(' ')
                            .next()
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(1)
                            .clamp(1, VARIATIONS.len());
                    }
                    "go" => match behavior.on_go {
                        GoBehavior::Crash => return,
                        GoBehavior::Hang => hung = true,
                        GoBehavior::Search => {
                            search = Some(Search {
                                depth: 0,
                                target: target_depth(&line, &behavior),
                            });
                        }
                    },
                    "stop" if behavior.ignore_stop => hung = true,
                    "stop" => {
                        if search.take().is_some() {
                            reply.push(bestmove());
                        }
                    }
                    "quit" => return,
                    _ => {}
                }
            }
            () = tokio::time::sleep(behavior.tick), if searching => {
                if let Some(state) = search.as_mut() {
                    state.depth += 1;
                    for (index, moves) in VARIATIONS.iter().take(multipv).enumerate() {
                        let cp = 20 + i64::from(state.depth) - 15 * i64::try_from(index).unwrap_or(0);
                        reply.push(format!(
                            "info depth {d} seldepth {d} multipv {k} score cp {cp} nodes {n} nps 100000 time {d} pv {m0} {m1}",
                            d = state.depth,
                            k = index + 1,
                            n = u64::from(state.depth) * 1000,
                            m0 = moves[0],
                            m1 = moves[1],
                        ));
                    }
                    if state.depth >= state.target {
                        search = None;
                        reply.push(bestmove());
                    }
                }
            }
        }
        for line in reply {
            if out.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn bestmove() -> String {
    format!("bestmove {} ponder {}", VARIATIONS[0][0], VARIATIONS[0][1])
}

/// Pool settings with short timeouts and the given ceilings.
pub fn fast_pool_config(classical: usize, neural: usize) -> PoolConfig {
    let family = |family, ceiling| FamilyConfig {
        family,
        ceiling,
        options: vec![("Threads".to_string(), "1".to_string())],
        handshake_timeout: Duration::from_secs(2),
        idle_timeout: Duration::from_secs(2),
    };
    PoolConfig {
        families: vec![
            family(EngineFamily::Classical, classical),
            family(EngineFamily::Neural, neural),
        ],
        restart_base_ms: 10,
        restart_max_ms: 100,
        health_check_interval: Duration::from_millis(50),
    }
}
