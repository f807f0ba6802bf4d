//! Fixed-interval driver for a reconciler
//!
//! A poller owns one background task. Each interval it runs one tick of its
//! reconciler under a single-flight guard, so a tick that outlasts the
//! interval makes the next one a no-op instead of running alongside it.
//! A failed or panicking tick is logged and the loop keeps going.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{OrchestratorError, Result};
use crate::guard::SingleFlight;

/// Counts for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Records fetched in this tick
    pub examined: usize,
    /// Records that moved forward
    pub progressed: usize,
    /// Records left as they were (nothing to do yet, or someone else moved them)
    pub unchanged: usize,
    /// Records whose processing failed
    pub failed: usize,
    pub escalated: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.examined == 0
    }
}

/// One pass over a batch of records
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Process one batch. An `Err` means the batch could not be fetched at
    /// all; per-record failures are counted in the report.
    async fn tick(&self) -> Result<TickReport>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed(TickReport),
    /// Another tick of the same loop was still in flight
    Skipped,
    Failed(String),
}

#[derive(Clone)]
pub struct Poller {
    reconciler: Arc<dyn Reconciler>,
    interval: Duration,
    flight: SingleFlight,
    running: Arc<AtomicBool>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    stop_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl Poller {
    pub fn new(reconciler: Arc<dyn Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            flight: SingleFlight::new(),
            running: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
            stop_tx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Whether a tick is executing right now
    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    /// Run a single tick now, unless one is already in flight
    pub async fn run_once(&self) -> TickOutcome {
        let name = self.reconciler.name();
        let Some(_flight) = self.flight.try_acquire() else {
            debug!(poller = name, "Previous tick still running, skipping");
            return TickOutcome::Skipped;
        };

        match AssertUnwindSafe(self.reconciler.tick()).catch_unwind().await {
            Ok(Ok(report)) => {
                if !report.is_idle() {
                    info!(
                        poller = name,
                        examined = report.examined,
                        progressed = report.progressed,
                        unchanged = report.unchanged,
                        failed = report.failed,
                        escalated = report.escalated,
                        "Tick complete"
                    );
                }
                TickOutcome::Completed(report)
            }
            Ok(Err(e)) => {
                error!(poller = name, error = %e, "Tick failed");
                TickOutcome::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(poller = name, panic = %message, "Tick panicked");
                TickOutcome::Failed(message)
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(OrchestratorError::AlreadyRunning(self.name()));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        *self.stop_tx.lock().await = Some(stop_tx);

        let poller = self.clone();
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        poller.run_once().await;
                    }
                }
            }
            debug!(poller = poller.name(), "Poll loop exited");
        });

        *self.task.lock().await = Some(task);
        info!(poller = self.name(), interval_ms = period.as_millis() as u64, "Poller started");
        Ok(())
    }

    /// Stop the loop, waiting for an in-flight tick to finish
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Err(OrchestratorError::NotRunning(self.name()));
        }

        if let Some(stop_tx) = self.stop_tx.lock().await.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }

        self.running.store(false, Ordering::Relaxed);
        info!(poller = self.name(), "Poller stopped");
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
