use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::error::SchedulingResult;

/// Skip-if-running guard for one job. Shared between the timer loop and the
/// manual trigger endpoint.
#[derive(Debug)]
pub struct JobGuard {
    name: &'static str,
    running: AtomicBool,
}

/// Held while a run is active; dropping it frees the guard.
#[derive(Debug)]
pub struct JobRun<'a> {
    guard: &'a JobGuard,
}

impl Drop for JobRun<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}

impl JobGuard {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `None` when a previous run is still active.
    pub fn try_begin(&self) -> Option<JobRun<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobRun { guard: self })
    }

    /// Runs `job` unless a run is already active. `None` means skipped.
    pub async fn run<F, Fut>(&self, job: F) -> Option<SchedulingResult<u64>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SchedulingResult<u64>>,
    {
        let Some(_run) = self.try_begin() else {
            warn!(job = self.name, "previous run still active; skipping");
            return None;
        };
        Some(job().await)
    }
}

/// Runs `job` every `period` until the runtime shuts down. Each run gets its
/// own task, so errors and panics are logged and never end the loop.
pub fn spawn_periodic<F, Fut>(guard: Arc<JobGuard>, period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = SchedulingResult<u64>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = guard.name(), every = ?period, "periodic job started");

        loop {
            ticker.tick().await;
            let Some(_run) = guard.try_begin() else {
                warn!(job = guard.name(), "previous run still active; skipping");
                continue;
            };

            match tokio::spawn(job()).await {
                Ok(Ok(n)) => debug!(job = guard.name(), affected = n, "job run finished"),
                Ok(Err(e)) => error!(job = guard.name(), error = %e, "job run failed"),
                Err(e) if e.is_panic() => error!(job = guard.name(), "job run panicked"),
                Err(e) => error!(job = guard.name(), error = %e, "job run cancelled"),
            }
        }
    })
}
