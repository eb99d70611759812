//! Interval scheduler for ingestion cycles.
//!
//! One background task ticks at a fixed interval. A tick starts a cycle only
//! when none is in flight; otherwise it is dropped, never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::pipeline::Ingestor;

/// At-most-one-cycle guard.
///
/// `try_acquire()` flips an `AtomicBool` with compare-and-swap; the returned
/// permit clears it on drop, including during a panic unwind.
#[derive(Debug, Default)]
pub struct CycleGuard {
    running: AtomicBool,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard. `None` if a cycle already holds it.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CyclePermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit {
                guard: Arc::clone(self),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Proof of holding the [`CycleGuard`]; releases it when dropped.
#[derive(Debug)]
pub struct CyclePermit {
    guard: Arc<CycleGuard>,
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

/// Result of a single scheduler tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// A cycle was spawned; the handle completes when it finishes.
    Started(JoinHandle<()>),
    /// A cycle was already running.
    Skipped,
}

/// Start a cycle unless one is in flight.
pub fn tick(ingestor: &Arc<Ingestor>, guard: &Arc<CycleGuard>) -> TickOutcome {
    let Some(permit) = guard.try_acquire() else {
        debug!("Previous ingestion cycle still running, skipping tick");
        return TickOutcome::Skipped;
    };

    let ingestor = Arc::clone(ingestor);
    TickOutcome::Started(tokio::spawn(async move {
        let _permit = permit;
        if let Err(e) = ingestor.run_cycle().await {
            error!(error = %e, "Ingestion cycle failed");
        }
    }))
}

/// Spawn the background scheduling loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop the loop
/// at its next tick; a cycle already in flight runs to completion.
pub fn spawn_ingest_scheduler(
    ingestor: Arc<Ingestor>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let guard = Arc::new(CycleGuard::new());

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs_f64(), "Ingestion scheduler started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Ingestion scheduler shutting down");
                return;
            }

            tick(&ingestor, &guard);
        }
    });

    (handle, shutdown_flag)
}
