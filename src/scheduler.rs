use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job::{Job, JobContext};
use crate::schedule::Schedule;

/// Upper bound on a single sleep when nothing is due; the loop re-checks on
/// wake anyway.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    ctx: JobContext,
    job: Arc<dyn Job>,
    schedule: Box<dyn Schedule>,
    next_at: DateTime<Utc>,
}

/// Dispatches scheduled jobs when they come due.
///
/// The entry collection is mutated only by `schedule`/`remove` and read by
/// the dispatch loop, behind a single mutex. Each due entry is dispatched
/// as its own task; job bodies never block the loop or each other.
pub struct Scheduler {
    entries: Arc<Mutex<Vec<Entry>>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            wake: Arc::new(Notify::new()),
            shutdown,
            loop_handle: None,
        }
    }

    /// Add an entry and wake the loop, since the new entry's due time may be
    /// sooner than the current sleep.
    ///
    /// `ctx` carries the job name and the cancellation token every
    /// dispatched invocation will observe.
    pub fn schedule(&self, ctx: JobContext, job: Arc<dyn Job>, mut schedule: Box<dyn Schedule>) {
        let Some(next_at) = schedule.next(Utc::now()) else {
            warn!(
                job = ctx.job_name(),
                "schedule has no upcoming occurrence, not scheduling"
            );
            return;
        };
        debug!(job = ctx.job_name(), next_at = %next_at, "scheduled job");
        self.entries.lock().unwrap().push(Entry {
            ctx,
            job,
            schedule,
            next_at,
        });
        self.wake.notify_one();
    }

    /// Remove all entries registered under `name`.
    pub fn remove(&self, name: &str) {
        self.entries.lock().unwrap().retain(|e| e.ctx.job_name() != name);
        self.wake.notify_one();
    }

    /// Start the dispatch loop on its own task.
    pub fn start(&mut self) {
        let entries = Arc::clone(&self.entries);
        let wake = Arc::clone(&self.wake);
        let shutdown = self.shutdown.clone();
        self.loop_handle = Some(tokio::spawn(run_loop(entries, wake, shutdown)));
    }

    /// Signal the loop to exit and wait until it has drained. Dispatched job
    /// tasks are not waited on, only the loop itself.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }
    }
}

async fn run_loop(
    entries: Arc<Mutex<Vec<Entry>>>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
) {
    info!("job dispatch loop started");
    loop {
        let sleep_for = time_until_next_due(&entries);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {
                dispatch_due(&entries);
            }
            _ = wake.notified() => {
                // Entry set changed; recompute the sleep.
            }
            _ = shutdown.cancelled() => {
                break;
            }
        }
    }
    info!("job dispatch loop stopped");
}

fn time_until_next_due(entries: &Mutex<Vec<Entry>>) -> Duration {
    let entries = entries.lock().unwrap();
    let now = Utc::now();
    let mut min = IDLE_CHECK_INTERVAL;
    for entry in entries.iter() {
        if entry.next_at <= now {
            return Duration::ZERO;
        }
        let until = (entry.next_at - now).to_std().unwrap_or(Duration::ZERO);
        if until < min {
            min = until;
        }
    }
    min
}

/// Dispatch every due entry on its own task and advance its next-due time.
/// Entries whose schedule is exhausted are retired.
fn dispatch_due(entries: &Mutex<Vec<Entry>>) {
    let now = Utc::now();
    let mut entries = entries.lock().unwrap();
    entries.retain_mut(|entry| {
        if entry.next_at > now {
            return true;
        }

        debug!(job = entry.ctx.job_name(), "dispatching scheduled run");
        let job = Arc::clone(&entry.job);
        let ctx = entry.ctx.clone();
        tokio::spawn(async move {
            // Outcomes are terminal at the logging/metrics layer.
            let _ = job.run(&ctx).await;
        });

        match entry.schedule.next(now) {
            Some(next_at) => {
                entry.next_at = next_at;
                true
            }
            None => {
                warn!(
                    job = entry.ctx.job_name(),
                    "schedule has no further occurrences, retiring entry"
                );
                false
            }
        }
    });
}
