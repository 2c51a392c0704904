use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tracing::warn;

use crate::job::{ConcurrentPolicy, Job, JobContext};

/// Lock waits longer than this are logged; the outcome does not change.
const DELAY_WAIT_WARN_THRESHOLD: Duration = Duration::from_secs(5);

enum Gate {
    /// Single-slot non-blocking permit: overlapping invocations are dropped.
    Skip(Semaphore),
    /// FIFO lock: overlapping invocations wait for the previous one.
    Delay(Mutex<()>),
}

/// Wrapper enforcing a job's concurrency policy.
///
/// Guard outcomes (a dropped or aborted invocation) are visible only in
/// logs, never in the job's return value.
pub struct Guarded {
    inner: Arc<dyn Job>,
    gate: Gate,
}

impl Guarded {
    /// Wrap `job` per `policy`. `Allow` needs no coordination and returns
    /// the job untouched.
    pub fn wrap(job: Arc<dyn Job>, policy: ConcurrentPolicy) -> Arc<dyn Job> {
        let gate = match policy {
            ConcurrentPolicy::Allow => return job,
            ConcurrentPolicy::Skip => Gate::Skip(Semaphore::new(1)),
            ConcurrentPolicy::Delay => Gate::Delay(Mutex::new(())),
        };
        Arc::new(Self { inner: job, gate })
    }
}

#[async_trait]
impl Job for Guarded {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        match &self.gate {
            Gate::Skip(permit) => {
                let Ok(_permit) = permit.try_acquire() else {
                    warn!(
                        job = ctx.job_name(),
                        "previous run still in progress, skipping"
                    );
                    return Ok(());
                };
                self.inner.run(ctx).await
            }
            Gate::Delay(lock) => {
                let wait_start = Instant::now();
                let _guard = lock.lock().await;
                let waited = wait_start.elapsed();
                if waited > DELAY_WAIT_WARN_THRESHOLD {
                    warn!(
                        job = ctx.job_name(),
                        waited_ms = waited.as_millis() as u64,
                        "run delayed behind previous invocation"
                    );
                }
                // The wait may have outlived the shutdown signal.
                if ctx.is_cancelled() {
                    warn!(
                        job = ctx.job_name(),
                        "cancelled while waiting for previous run, aborting"
                    );
                    return Ok(());
                }
                self.inner.run(ctx).await
            }
        }
    }
}
