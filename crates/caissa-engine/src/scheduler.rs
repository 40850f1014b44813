//! Admission control.
//!
//! A request for a family runs immediately when a slot is free and nobody is
//! already waiting. Otherwise it joins that family's FIFO queue, up to
//! `capacity` waiters; beyond that it is rejected. A waiter that is not
//! served within `max_wait` fails with `QueueTimeout`.
//!
//! One dispatcher task per family sleeps on the pool's ready signal and hands
//! freed slots to the oldest waiter.
//!
//! Lock order is scheduler queue, then pool. The pool never calls back into
//! the scheduler.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use caissa_core::{AnalysisError, EngineFamily, JobId};
use metrics::gauge;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pool::{EngineHealth, EnginePool, Lease};
use crate::process::millis;

/// Outcome of [`AdmissionScheduler::submit`].
#[derive(Debug)]
pub enum Admission {
    /// A slot was free; run now.
    Accepted(Lease),
    /// Waiting for a slot.
    Queued(Ticket),
    /// Not admitted; no job is created.
    Rejected(AnalysisError),
}

type Grant = Result<Lease, AnalysisError>;

struct Waiter {
    job_id: JobId,
    tx: oneshot::Sender<Grant>,
}

/// Per-family admission queues in front of the engine pool.
pub struct AdmissionScheduler {
    pool: Arc<EnginePool>,
    queues: Mutex<BTreeMap<EngineFamily, VecDeque<Waiter>>>,
    capacity: usize,
    max_wait: Duration,
}

impl AdmissionScheduler {
    /// Create a scheduler. Call [`Self::spawn_dispatchers`] to start serving
    /// queues.
    pub fn new(pool: Arc<EnginePool>, capacity: usize, max_wait: Duration) -> Arc<Self> {
        Arc::new(Self {
            pool,
            queues: Mutex::new(BTreeMap::new()),
            capacity,
            max_wait,
        })
    }

    /// The pool this scheduler admits into.
    pub fn pool(&self) -> &Arc<EnginePool> {
        &self.pool
    }

    /// Run, queue, or reject a request for `family`.
    pub fn submit(self: &Arc<Self>, job_id: &JobId, family: EngineFamily) -> Admission {
        let mut queues = self.queues.lock();

        if let Some(reason) = self.pool.degraded_reason(family) {
            return Admission::Rejected(AnalysisError::EngineUnavailable { family, reason });
        }

        let queue = queues.entry(family).or_default();
        if queue.is_empty() {
            if let Some(lease) = self.pool.acquire(family) {
                debug!(%job_id, %family, slot = lease.slot(), "admitted");
                return Admission::Accepted(lease);
            }
        }

        if queue.len() >= self.capacity {
            info!(%job_id, %family, waiting = queue.len(), "queue full, rejecting");
            return Admission::Rejected(AnalysisError::EngineUnavailable {
                family,
                reason: "all engines busy and the queue is full".to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        queue.push_back(Waiter {
            job_id: job_id.clone(),
            tx,
        });
        publish_depth(family, queue.len());
        debug!(%job_id, %family, position = queue.len(), "queued");

        Admission::Queued(Ticket {
            job_id: job_id.clone(),
            family,
            rx,
            scheduler: Arc::clone(self),
        })
    }

    /// Remove a waiting request. Returns `false` if it was not queued (already
    /// served, timed out, or never queued).
    pub fn cancel_queued(&self, job_id: &JobId) -> bool {
        let mut queues = self.queues.lock();
        for (family, queue) in queues.iter_mut() {
            if let Some(index) = queue.iter().position(|w| &w.job_id == job_id) {
                let _ = queue.remove(index);
                publish_depth(*family, queue.len());
                debug!(%job_id, %family, "removed from queue");
                return true;
            }
        }
        false
    }

    /// Number of requests waiting for `family`.
    pub fn queued(&self, family: EngineFamily) -> usize {
        self.queues.lock().get(&family).map_or(0, VecDeque::len)
    }

    /// Start one dispatcher per family. They exit when `shutdown` fires,
    /// failing every remaining waiter.
    pub fn spawn_dispatchers(self: &Arc<Self>, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        EngineFamily::ALL
            .into_iter()
            .filter_map(|family| {
                let notify = self.pool.notifier(family)?;
                let scheduler = Arc::clone(self);
                let shutdown = shutdown.clone();
                Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            () = shutdown.cancelled() => {
                                scheduler.fail_all(family, "service is shutting down");
                                break;
                            }
                            () = notify.notified() => scheduler.pump(family),
                        }
                    }
                }))
            })
            .collect()
    }

    /// Hand free slots to waiters, oldest first.
    fn pump(&self, family: EngineFamily) {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(&family) else {
            return;
        };

        if let Some(reason) = self.pool.degraded_reason(family) {
            while let Some(waiter) = queue.pop_front() {
                let _ = waiter.tx.send(Err(AnalysisError::EngineUnavailable {
                    family,
                    reason: reason.clone(),
                }));
            }
            publish_depth(family, 0);
            return;
        }

        while !queue.is_empty() {
            let Some(mut lease) = self.pool.acquire(family) else {
                break;
            };
            // waiters whose receiver is gone are skipped; the lease goes to the next one
            loop {
                let Some(waiter) = queue.pop_front() else {
                    self.pool.release(lease, EngineHealth::Healthy);
                    publish_depth(family, 0);
                    return;
                };
                match waiter.tx.send(Ok(lease)) {
                    Ok(()) => {
                        debug!(job_id = %waiter.job_id, %family, "admitted from queue");
                        break;
                    }
                    Err(Ok(returned)) => lease = returned,
                    Err(Err(_)) => return,
                }
            }
        }
        publish_depth(family, queue.len());
    }

    fn fail_all(&self, family: EngineFamily, reason: &str) {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(&family) {
            for waiter in queue.drain(..) {
                let _ = waiter.tx.send(Err(AnalysisError::EngineUnavailable {
                    family,
                    reason: reason.to_string(),
                }));
            }
        }
        publish_depth(family, 0);
    }
}

#[allow(clippy::cast_precision_loss)]
fn publish_depth(family: EngineFamily, depth: usize) {
    gauge!("scheduler_queue_depth", "family" => family.wire_name()).set(depth as f64);
}

/// A queued request's claim on a future slot.
///
/// Dropping the ticket withdraws the request; a slot granted in the meantime
/// goes straight back to the pool.
pub struct Ticket {
    job_id: JobId,
    family: EngineFamily,
    rx: oneshot::Receiver<Grant>,
    scheduler: Arc<AdmissionScheduler>,
}

impl Ticket {
    /// Family the request is waiting for.
    pub fn family(&self) -> EngineFamily {
        self.family
    }

    /// Wait for a slot, the queue timeout, or cancellation.
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<Lease, AnalysisError> {
        let started = Instant::now();
        let max_wait = self.scheduler.max_wait;
        tokio::select! {
            biased;
            granted = &mut self.rx => granted.unwrap_or_else(|_| {
                Err(AnalysisError::EngineUnavailable {
                    family: self.family,
                    reason: "scheduler stopped".to_string(),
                })
            }),
            () = cancel.cancelled() => Err(AnalysisError::Cancelled),
            () = tokio::time::sleep(max_wait) => {
                // a grant may have landed at the deadline
                match self.rx.try_recv() {
                    Ok(granted) => granted,
                    Err(_) => {
                        info!(job_id = %self.job_id, family = %self.family, "queue wait timed out");
                        Err(AnalysisError::QueueTimeout {
                            family: self.family,
                            waited_ms: millis(started.elapsed()),
                        })
                    }
                }
            }
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.scheduler.cancel_queued(&self.job_id) {
            if let Ok(Ok(lease)) = self.rx.try_recv() {
                self.scheduler.pool.release(lease, EngineHealth::Healthy);
            }
        }
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("job_id", &self.job_id)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
