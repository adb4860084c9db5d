//! Periodic Task
//!
//! Generic fixed-interval worker. Runs a job on every tick until the
//! cancellation token fires. A tick that overruns the interval swallows the
//! missed ticks instead of bursting, so two runs of the same job never
//! overlap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Work executed once per tick.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Execute one tick. Failures are the job's to handle and log.
    async fn run_once(&self);
}

/// Drives a [`PeriodicJob`] on a timer.
pub struct PeriodicTask<J: PeriodicJob> {
    job: Arc<J>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<J: PeriodicJob> PeriodicTask<J> {
    /// Create a task. The first run happens immediately.
    #[must_use]
    pub const fn new(job: Arc<J>, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            job,
            interval,
            cancel,
        }
    }

    /// Run the loop until cancelled.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            job = self.job.name(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Periodic task started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!(job = self.job.name(), "Periodic task cancelled");
                    break;
                }
                _ = interval.tick() => {
                    // A tick in progress finishes unless shutdown arrives first.
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {
                            tracing::info!(job = self.job.name(), "Periodic task cancelled mid-tick");
                            break;
                        }
                        () = self.job.run_once() => {}
                    }
                }
            }
        }
    }

    /// Spawn the loop onto the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
