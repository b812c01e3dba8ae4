//! Self-rescheduling poll loop.
//!
//! The next cycle is scheduled a fixed interval after the previous one
//! *finishes*, so at most one cycle is ever in flight.

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use crate::poller::CycleRunner;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PollCycle {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: CycleOutcome,
}

struct Inner {
    runner: Arc<dyn CycleRunner>,
    interval: Duration,
    running: AtomicBool,
    generation: AtomicU64,
    wake: Notify,
    cycle_lock: tokio::sync::Mutex<()>,
    last_cycle: RwLock<Option<PollCycle>>,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(self: Arc<Self>, generation: u64) {
        while self.is_current(generation) {
            self.run_once().await;

            // Registered before the re-check so a stop() in between is not missed.
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();
            if !self.is_current(generation) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = woken => {}
            }
        }
        debug!("Poll loop {} exited", generation);
    }

    async fn run_once(&self) -> PollCycle {
        // A loop from before a stop/start may still be finishing its cycle.
        let _guard = self.cycle_lock.lock().await;

        let started_at = Utc::now();
        let clock = Instant::now();
        debug!("Poll cycle started at {}", started_at.to_rfc3339());

        // Own task, so a panicking cycle fails alone instead of ending the loop.
        let runner = self.runner.clone();
        let result = tokio::spawn(async move { runner.run_cycle().await }).await;

        let outcome = match result {
            Ok(Ok(report)) => {
                info!(
                    "Poll cycle finished in {:?}: {} fetched, {} new, mail sent: {}",
                    clock.elapsed(),
                    report.fetched,
                    report.new_records,
                    report.dispatched
                );
                CycleOutcome::Succeeded
            }
            Ok(Err(e)) => {
                error!("Polling error: {}", e);
                CycleOutcome::Failed { reason: e.to_string() }
            }
            Err(e) => {
                error!("Poll cycle aborted: {}", e);
                CycleOutcome::Failed { reason: format!("cycle aborted: {}", e) }
            }
        };

        let cycle = PollCycle {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            outcome,
        };
        *self.last_cycle.write().unwrap_or_else(PoisonError::into_inner) = Some(cycle.clone());
        cycle
    }
}

pub struct PollScheduler {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                interval,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                wake: Notify::new(),
                cycle_lock: tokio::sync::Mutex::new(()),
                last_cycle: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Begin polling with an immediate first cycle. No-op when already running.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Polling service started (interval {:?})", self.inner.interval);

        let inner = self.inner.clone();
        let handle = tokio::spawn(inner.run(generation));
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Prevent further cycles. A cycle already in flight runs to completion.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            self.inner.wake.notify_waiters();
            info!("Polling service stopped");
        }
    }

    /// Wait for the current loop task to exit. Call after `stop()`.
    pub async fn join(&self) {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Poll loop task failed: {}", e);
            }
        }
    }

    /// Run a single cycle outside the loop.
    pub async fn run_once(&self) -> PollCycle {
        self.inner.run_once().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn last_cycle(&self) -> Option<PollCycle> {
        self.inner.last_cycle.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
