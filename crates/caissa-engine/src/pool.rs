//! Engine pool supervisor.
//!
//! Each family owns a fixed set of slots, one engine process per slot, sized
//! to the family's ceiling. Slots are started eagerly by [`EnginePool::start`]
//! so the first request does not pay the engine's startup cost.
//!
//! Slot lifecycle:
//!
//! ```text
//! Starting ──► Ready ──► Busy ──► Ready
//!                          │
//!                          ▼
//!                       Crashed ──► Restarting ──► Ready
//! ```
//!
//! A slot is only handed out from `Ready`, and only through a [`Lease`]. The
//! lease returns the slot exactly once, either through [`EnginePool::release`]
//! or, if the holder forgets, when it drops (the engine is then treated as
//! crashed). Restarts back off exponentially up to the configured cap. A fatal
//! launch error (missing binary, missing weights) degrades the whole family
//! for the life of the process.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use caissa_core::EngineFamily;
use caissa_core::backoff::restart_delay;
use caissa_settings::CaissaSettings;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::EngineError;
use crate::process::{EngineIo, EngineLauncher, handshake, millis};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Pool settings for one family.
#[derive(Clone, Debug)]
pub struct FamilyConfig {
    /// Family these slots serve.
    pub family: EngineFamily,
    /// Number of slots; zero means the family is disabled.
    pub ceiling: usize,
    /// `setoption` pairs sent during the handshake.
    pub options: Vec<(String, String)>,
    /// Time allowed for each handshake step.
    pub handshake_timeout: Duration,
    /// Silence after which a running search is failed.
    pub idle_timeout: Duration,
}

/// Supervisor settings.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Per-family settings.
    pub families: Vec<FamilyConfig>,
    /// First restart delay in milliseconds.
    pub restart_base_ms: u64,
    /// Restart delay cap in milliseconds.
    pub restart_max_ms: u64,
    /// How often idle engines are checked for unexpected exits.
    pub health_check_interval: Duration,
}

impl PoolConfig {
    /// Derive pool settings from the service settings.
    pub fn from_settings(settings: &CaissaSettings) -> Self {
        let families = EngineFamily::ALL
            .into_iter()
            .map(|family| {
                let engine = settings.engines.for_family(family);
                FamilyConfig {
                    family,
                    ceiling: if engine.enabled { engine.ceiling } else { 0 },
                    options: engine
                        .options
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    handshake_timeout: Duration::from_millis(engine.handshake_timeout_ms),
                    idle_timeout: Duration::from_millis(engine.idle_timeout_ms),
                }
            })
            .collect();
        Self {
            families,
            restart_base_ms: settings.supervisor.restart_base_ms,
            restart_max_ms: settings.supervisor.restart_max_ms,
            health_check_interval: Duration::from_millis(
                settings.supervisor.health_check_interval_ms,
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Initial launch in progress.
    Starting,
    /// Idle and handshaken; can be leased.
    Ready,
    /// Leased to a job.
    Busy,
    /// Process died or was declared wedged.
    Crashed,
    /// Waiting out backoff or relaunching.
    Restarting,
}

/// Condition of an engine when its lease is returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineHealth {
    /// Idle and in sync; reuse it.
    Healthy,
    /// Dead, wedged, or in an unknown state; replace it.
    Unhealthy,
}

/// Snapshot of one family's slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamilyStatus {
    /// Family described.
    pub family: EngineFamily,
    /// Configured slot count.
    pub ceiling: usize,
    /// Slots ready to lease.
    pub ready: usize,
    /// Slots leased to jobs.
    pub busy: usize,
    /// Slots starting, crashed, or restarting.
    pub recovering: usize,
    /// Why the family is permanently unavailable, if it is.
    pub degraded: Option<String>,
}

impl FamilyStatus {
    /// At least one live engine (ready or busy) and not degraded.
    pub fn available(&self) -> bool {
        self.degraded.is_none() && self.ready + self.busy > 0
    }
}

struct Slot {
    state: SlotState,
    io: Option<EngineIo>,
    failures: u32,
}

struct FamilyPool {
    config: FamilyConfig,
    slots: Vec<Slot>,
    degraded: Option<String>,
}

impl FamilyPool {
    fn busy(&self) -> usize {
        self.slots.iter().filter(|s| s.state == SlotState::Busy).count()
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_busy(&self) {
        gauge!("engine_slots_busy", "family" => self.config.family.wire_name())
            .set(self.busy() as f64);
    }
}

struct PoolShared {
    families: Mutex<BTreeMap<EngineFamily, FamilyPool>>,
    notifiers: BTreeMap<EngineFamily, Arc<Notify>>,
    launcher: Arc<dyn EngineLauncher>,
    restart_base_ms: u64,
    restart_max_ms: u64,
    shutdown: CancellationToken,
}

/// Supervisor for every family's engine processes.
pub struct EnginePool {
    shared: Arc<PoolShared>,
    health_interval: Duration,
}

impl EnginePool {
    /// Create the pool, launch every slot, and start the health checker.
    ///
    /// Returns once each slot's first launch attempt has finished. Slots that
    /// failed transiently keep retrying in the background.
    pub async fn start(
        launcher: Arc<dyn EngineLauncher>,
        config: PoolConfig,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let mut families = BTreeMap::new();
        let mut notifiers = BTreeMap::new();
        for family_config in &config.families {
            let family = family_config.family;
            let slots = (0..family_config.ceiling)
                .map(|_| Slot {
                    state: SlotState::Starting,
                    io: None,
                    failures: 0,
                })
                .collect();
            let degraded = (family_config.ceiling == 0).then(|| "disabled".to_string());
            let _ = families.insert(
                family,
                FamilyPool {
                    config: family_config.clone(),
                    slots,
                    degraded,
                },
            );
            let _ = notifiers.insert(family, Arc::new(Notify::new()));
        }

        let shared = Arc::new(PoolShared {
            families: Mutex::new(families),
            notifiers,
            launcher,
            restart_base_ms: config.restart_base_ms,
            restart_max_ms: config.restart_max_ms,
            shutdown,
        });

        let launches = config.families.iter().flat_map(|fc| {
            let shared = Arc::clone(&shared);
            (0..fc.ceiling).map(move |slot| {
                let shared = Arc::clone(&shared);
                let family = fc.family;
                async move {
                    let result = shared.launch_slot(family, slot).await;
                    shared.install(family, slot, result);
                }
            })
        });
        let _ = futures::future::join_all(launches).await;

        let pool = Arc::new(Self {
            shared,
            health_interval: config.health_check_interval,
        });
        pool.spawn_health_check();
        pool
    }

    /// Lease a ready engine, or `None` if every slot is busy, recovering, or
    /// the family is degraded. Never waits.
    pub fn acquire(&self, family: EngineFamily) -> Option<Lease> {
        let mut families = self.shared.families.lock();
        let pool = families.get_mut(&family)?;
        if pool.degraded.is_some() {
            return None;
        }
        let (index, slot) = pool
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state == SlotState::Ready && s.io.is_some())?;
        let io = slot.io.take()?;
        slot.state = SlotState::Busy;
        pool.publish_busy();
        debug!(%family, slot = index, "engine leased");
        Some(Lease {
            family,
            slot: index,
            io: Some(io),
            shared: Arc::clone(&self.shared),
            released: false,
        })
    }

    /// Return a leased engine. Healthy engines go back to `Ready`; unhealthy
    /// ones are killed and restarted.
    pub fn release(&self, lease: Lease, health: EngineHealth) {
        lease.release(health);
    }

    /// Signalled whenever a slot of `family` becomes ready.
    pub fn notifier(&self, family: EngineFamily) -> Option<Arc<Notify>> {
        self.shared.notifiers.get(&family).cloned()
    }

    /// Pool settings for `family`.
    pub fn family_config(&self, family: EngineFamily) -> Option<FamilyConfig> {
        self.shared
            .families
            .lock()
            .get(&family)
            .map(|p| p.config.clone())
    }

    /// Why `family` is permanently unavailable, if it is.
    pub fn degraded_reason(&self, family: EngineFamily) -> Option<String> {
        self.shared
            .families
            .lock()
            .get(&family)
            .map_or_else(|| Some("not configured".to_string()), |p| p.degraded.clone())
    }

    /// Snapshot of every family's slots.
    pub fn status(&self) -> Vec<FamilyStatus> {
        let families = self.shared.families.lock();
        families
            .values()
            .map(|pool| {
                let count = |state| pool.slots.iter().filter(|s| s.state == state).count();
                let ready = count(SlotState::Ready);
                let busy = count(SlotState::Busy);
                FamilyStatus {
                    family: pool.config.family,
                    ceiling: pool.config.ceiling,
                    ready,
                    busy,
                    recovering: pool.slots.len() - ready - busy,
                    degraded: pool.degraded.clone(),
                }
            })
            .collect()
    }

    /// Snapshot of one family.
    pub fn family_status(&self, family: EngineFamily) -> Option<FamilyStatus> {
        self.status().into_iter().find(|s| s.family == family)
    }

    /// Stop supervision and ask idle engines to quit. Leased engines are
    /// killed when their leases drop.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let idle: Vec<EngineIo> = {
            let mut families = self.shared.families.lock();
            families
                .values_mut()
                .flat_map(|pool| pool.slots.iter_mut())
                .filter_map(|slot| slot.io.take())
                .collect()
        };
        info!(engines = idle.len(), "shutting down idle engines");
        let _ = futures::future::join_all(idle.into_iter().map(EngineIo::shutdown)).await;
    }

    fn spawn_health_check(&self) {
        if self.health_interval.is_zero() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let interval = self.health_interval;
        let _ = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shared.shutdown.cancelled() => break,
                    _ = ticker.tick() => shared.check_idle_engines(),
                }
            }
        });
    }
}

impl PoolShared {
    async fn launch_slot(
        &self,
        family: EngineFamily,
        slot: usize,
    ) -> Result<EngineIo, EngineError> {
        let (options, timeout) = {
            let families = self.families.lock();
            let Some(pool) = families.get(&family) else {
                return Err(EngineError::Closed);
            };
            (pool.config.options.clone(), pool.config.handshake_timeout)
        };
        let mut io = self.launcher.launch(family, slot).await?;
        handshake(&mut io, &options, timeout).await?;
        Ok(io)
    }

    /// Apply the outcome of a launch attempt to a slot.
    fn install(
        self: &Arc<Self>,
        family: EngineFamily,
        slot: usize,
        result: Result<EngineIo, EngineError>,
    ) {
        match result {
            Ok(io) => {
                let accepted = {
                    let mut families = self.families.lock();
                    match families.get_mut(&family) {
                        Some(pool) if pool.degraded.is_none() && !self.shutdown.is_cancelled() => {
                            let entry = &mut pool.slots[slot];
                            entry.state = SlotState::Ready;
                            entry.io = Some(io);
                            info!(%family, slot, "engine ready");
                            None
                        }
                        _ => Some(io),
                    }
                };
                match accepted {
                    None => self.notify(family),
                    Some(io) => drop(io),
                }
            }
            Err(err) if err.is_fatal() => self.degrade(family, &err),
            Err(err) => {
                warn!(%family, slot, error = %err, "engine launch failed");
                self.schedule_restart(family, slot);
            }
        }
    }

    fn notify(&self, family: EngineFamily) {
        if let Some(notify) = self.notifiers.get(&family) {
            notify.notify_one();
        }
    }

    /// Mark a family permanently unavailable and stop its idle engines.
    fn degrade(&self, family: EngineFamily, err: &EngineError) {
        let idle: Vec<EngineIo> = {
            let mut families = self.families.lock();
            let Some(pool) = families.get_mut(&family) else {
                return;
            };
            if pool.degraded.is_some() {
                return;
            }
            error!(%family, error = %err, "engine cannot be launched, family degraded");
            pool.degraded = Some(err.to_string());
            pool.slots
                .iter_mut()
                .filter(|s| s.state != SlotState::Busy)
                .filter_map(|s| {
                    s.state = SlotState::Crashed;
                    s.io.take()
                })
                .collect()
        };
        drop(idle);
        // wake the scheduler so queued requests are rejected promptly
        self.notify(family);
    }

    /// Put a slot into `Restarting` and relaunch it after a backoff delay.
    fn schedule_restart(self: &Arc<Self>, family: EngineFamily, slot: usize) {
        let attempt = {
            let mut families = self.families.lock();
            let Some(pool) = families.get_mut(&family) else {
                return;
            };
            let entry = &mut pool.slots[slot];
            if pool.degraded.is_some() || self.shutdown.is_cancelled() {
                entry.state = SlotState::Crashed;
                return;
            }
            entry.state = SlotState::Restarting;
            let attempt = entry.failures;
            entry.failures = entry.failures.saturating_add(1);
            attempt
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%family, slot, "no runtime available, engine left crashed");
            return;
        };

        let delay = restart_delay(attempt, self.restart_base_ms, self.restart_max_ms);
        let shared = Arc::clone(self);
        counter!("engine_restarts_total", "family" => family.wire_name()).increment(1);
        info!(%family, slot, attempt, delay_ms = millis(delay), "restarting engine");

        let _ = runtime.spawn(async move {
            tokio::select! {
                () = shared.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            let result = shared.launch_slot(family, slot).await;
            shared.install(family, slot, result);
        });
    }

    /// Return a slot from a lease.
    fn return_slot(
        self: &Arc<Self>,
        family: EngineFamily,
        slot: usize,
        io: Option<EngineIo>,
        health: EngineHealth,
    ) {
        let crashed_io = {
            let mut families = self.families.lock();
            let Some(pool) = families.get_mut(&family) else {
                return;
            };
            let reusable = health == EngineHealth::Healthy
                && pool.degraded.is_none()
                && !self.shutdown.is_cancelled();
            let entry = &mut pool.slots[slot];
            let leftover = match io {
                Some(io) if reusable => {
                    entry.state = SlotState::Ready;
                    entry.io = Some(io);
                    entry.failures = 0;
                    None
                }
                other => {
                    entry.state = SlotState::Crashed;
                    other
                }
            };
            pool.publish_busy();
            leftover
        };

        match (health, crashed_io) {
            (EngineHealth::Healthy, None) => {
                debug!(%family, slot, "engine returned to pool");
                self.notify(family);
            }
            (_, io) => {
                warn!(%family, slot, "engine returned unhealthy");
                drop(io);
                self.schedule_restart(family, slot);
            }
        }
    }

    /// Restart idle engines whose process has exited.
    fn check_idle_engines(self: &Arc<Self>) {
        let mut dead = Vec::new();
        {
            let mut families = self.families.lock();
            for (family, pool) in families.iter_mut() {
                for (index, slot) in pool.slots.iter_mut().enumerate() {
                    if slot.state != SlotState::Ready {
                        continue;
                    }
                    let exited = slot.io.as_mut().is_none_or(EngineIo::has_exited);
                    if exited {
                        slot.state = SlotState::Crashed;
                        dead.push((*family, index, slot.io.take()));
                    }
                }
            }
        }
        for (family, slot, io) in dead {
            warn!(%family, slot, "idle engine exited unexpectedly");
            drop(io);
            self.schedule_restart(family, slot);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lease
// ─────────────────────────────────────────────────────────────────────────────

/// Exclusive use of one engine slot.
///
/// Return it with [`EnginePool::release`]. Dropping an unreleased lease
/// returns the slot as unhealthy, since the engine may be mid-search.
pub struct Lease {
    family: EngineFamily,
    slot: usize,
    io: Option<EngineIo>,
    shared: Arc<PoolShared>,
    released: bool,
}

impl Lease {
    /// Family of the leased engine.
    pub fn family(&self) -> EngineFamily {
        self.family
    }

    /// Slot index within the family.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The engine connection. Present for the lifetime of the lease.
    pub fn io_mut(&mut self) -> Option<&mut EngineIo> {
        self.io.as_mut()
    }

    fn release(mut self, health: EngineHealth) {
        self.released = true;
        let io = self.io.take();
        self.shared.return_slot(self.family, self.slot, io, health);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            warn!(family = %self.family, slot = self.slot, "lease dropped without release");
            self.released = true;
            let io = self.io.take();
            self.shared
                .return_slot(self.family, self.slot, io, EngineHealth::Unhealthy);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("family", &self.family)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
