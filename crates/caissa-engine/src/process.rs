//! Engine process I/O and launching.
//!
//! An engine is a bidirectional line stream: commands go in on stdin, and
//! replies come back on stdout. [`EngineIo`] wraps any async reader/writer
//! pair so the same code drives real processes and in-memory fakes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use caissa_core::EngineFamily;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

use crate::errors::{DiscoveryError, EngineError};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-oriented connection to one engine.
pub struct EngineIo {
    label: String,
    writer: BoxedWriter,
    lines: Lines<BufReader<BoxedReader>>,
    child: Option<Child>,
}

impl EngineIo {
    /// Wrap a reader/writer pair. `child` is kept so the process can be
    /// polled and is killed when the handle drops.
    pub fn new(
        label: impl Into<String>,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        child: Option<Child>,
    ) -> Self {
        let reader: BoxedReader = Box::new(reader);
        Self {
            label: label.into(),
            writer: Box::new(writer),
            lines: BufReader::new(reader).lines(),
            child,
        }
    }

    /// Label used in logs, e.g. `stockfish#1`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Send one command line.
    pub async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        trace!(engine = %self.label, command, ">>");
        self.writer.write_all(command.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next output line. End of stream is [`EngineError::Closed`].
    pub async fn next_line(&mut self) -> Result<String, EngineError> {
        match self.lines.next_line().await? {
            Some(line) => {
                trace!(engine = %self.label, line = %line, "<<");
                Ok(line)
            }
            None => Err(EngineError::Closed),
        }
    }

    /// Read until a line whose first token is `token`, discarding the rest.
    pub async fn expect(
        &mut self,
        token: &'static str,
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let wait = async {
            loop {
                match self.next_line().await {
                    Ok(line) if line.split_whitespace().next() == Some(token) => return Ok(()),
                    Ok(_) => {}
                    Err(err) => return Err(err),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| EngineError::Timeout {
                waiting_for: token,
                timeout_ms: millis(timeout),
            })?
    }

    /// Whether the underlying process has exited. In-memory engines never
    /// report an exit here; their failure shows up as [`EngineError::Closed`].
    pub fn has_exited(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Ask the engine to quit, then kill it if it lingers.
    pub async fn shutdown(mut self) {
        let _ = self.send("quit").await;
        if let Some(mut child) = self.child.take() {
            if tokio::time::timeout(Duration::from_millis(500), child.wait())
                .await
                .is_err()
            {
                debug!(engine = %self.label, "engine ignored quit, killing");
                let _ = child.kill().await;
            }
        }
    }
}

impl std::fmt::Debug for EngineIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineIo")
            .field("label", &self.label)
            .field("process", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Launching
// ─────────────────────────────────────────────────────────────────────────────

/// Starts engine processes for the pool.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    /// Start a fresh engine for `family` in pool slot `slot`.
    async fn launch(&self, family: EngineFamily, slot: usize) -> Result<EngineIo, EngineError>;
}

/// How to start one engine binary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineCommand {
    /// Executable path.
    pub program: PathBuf,
    /// Command-line arguments.
    pub args: Vec<String>,
}

/// Launches real engine processes via `tokio::process::Command`.
pub struct ProcessLauncher {
    commands: BTreeMap<EngineFamily, Result<EngineCommand, DiscoveryError>>,
}

impl ProcessLauncher {
    /// Build a launcher from resolved commands, one entry per family.
    pub fn new(commands: BTreeMap<EngineFamily, Result<EngineCommand, DiscoveryError>>) -> Self {
        Self { commands }
    }

    /// The resolved command for `family`, or why there is none.
    pub fn command(&self, family: EngineFamily) -> Result<&EngineCommand, DiscoveryError> {
        match self.commands.get(&family) {
            Some(Ok(command)) => Ok(command),
            Some(Err(err)) => Err(err.clone()),
            None => Err(DiscoveryError::Disabled(family)),
        }
    }
}

#[async_trait]
impl EngineLauncher for ProcessLauncher {
    async fn launch(&self, family: EngineFamily, slot: usize) -> Result<EngineIo, EngineError> {
        let command = self.command(family)?;
        let label = format!("{family}#{slot}");

        let mut cmd = Command::new(&command.program);
        let _ = cmd
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(engine = %label, program = %command.program.display(), "spawning engine");

        let mut child = cmd.spawn().map_err(|source| EngineError::Launch {
            program: command.program.display().to_string(),
            source,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(EngineError::Io(std::io::Error::other("engine pipes unavailable")));
        };

        if let Some(stderr) = child.stderr.take() {
            let stderr_label = label.clone();
            let _ = tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(engine = %stderr_label, stderr = %line, "engine stderr");
                }
            });
        }

        Ok(EngineIo::new(label, stdout, stdin, Some(child)))
    }
}

/// Run the UCI handshake: `uci`/`uciok`, the configured options, then
/// `isready`/`readyok`.
pub async fn handshake(
    io: &mut EngineIo,
    options: &[(String, String)],
    timeout: Duration,
) -> Result<(), EngineError> {
    io.send("uci").await?;
    io.expect("uciok", timeout).await?;
    for (name, value) in options {
        io.send(&format!("setoption name {name} value {value}")).await?;
    }
    io.send("isready").await?;
    io.expect("readyok", timeout).await?;
    if io.has_exited() {
        warn!(engine = %io.label(), "engine exited during handshake");
        return Err(EngineError::Closed);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
