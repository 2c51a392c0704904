use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::JobsConfig;
use crate::job::{ConcurrentPolicy, Job, JobContext};
use crate::metrics;
use crate::middleware::{wrap_cron_job, wrap_server_job};
use crate::registry::Registry;
use crate::schedule::{self, Schedule};
use crate::scheduler::Scheduler;

/// Generic long-running component contract. The hosting application
/// lifecycle starts and stops all of its background components through
/// this, the job runner included.
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Runs exactly once, asynchronously, at startup.
    OneShot,
    /// Runs repeatedly at times computed by its schedule.
    Scheduled,
}

/// Read-only snapshot of a job the runner owns, for admin and diagnostic
/// surfaces.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub name: String,
    pub kind: JobKind,
    pub schedule: Option<String>,
    pub immediately: bool,
    pub concurrent_policy: ConcurrentPolicy,
}

struct OneShotEntry {
    ctx: JobContext,
    job: Arc<dyn Job>,
}

struct ScheduledEntry {
    ctx: JobContext,
    job: Arc<dyn Job>,
    schedule: Box<dyn Schedule>,
}

/// Owns every enabled job for the process lifetime: one-shot jobs run once
/// at startup on their own tasks, scheduled jobs are handed to the dispatch
/// loop. Job outcomes are terminal at the logging/metrics layer and never
/// surface through `start`/`stop`.
pub struct JobRunner {
    one_shots: Mutex<Vec<OneShotEntry>>,
    scheduled: Mutex<Vec<ScheduledEntry>>,
    scheduler: Mutex<Scheduler>,
    shutdown: CancellationToken,
    infos: Vec<JobInfo>,
}

impl JobRunner {
    /// Build entries from the registry's resolved configs.
    ///
    /// Fails when an enabled job's schedule does not parse: a malformed
    /// schedule can never become valid at runtime, so it aborts startup.
    pub fn new(registry: &Registry, config: &JobsConfig) -> Result<Self> {
        metrics::set_enabled(config.instrumentation);
        metrics::init_metrics();

        let shutdown = CancellationToken::new();
        let mut one_shots = Vec::new();
        let mut scheduled = Vec::new();
        let mut infos = Vec::new();

        for resolved in registry.registered_jobs() {
            if resolved.disable {
                debug!(job = %resolved.name, "job disabled, not scheduled");
                continue;
            }

            // Clone before wrapping; the registry's stored config stays
            // untouched and can be re-wrapped later.
            let cfg = resolved.clone();
            let ctx = JobContext::new(&cfg.name, shutdown.child_token());
            infos.push(JobInfo {
                name: cfg.name.clone(),
                kind: if cfg.is_one_shot() {
                    JobKind::OneShot
                } else {
                    JobKind::Scheduled
                },
                schedule: cfg.schedule.clone(),
                immediately: cfg.immediately,
                concurrent_policy: cfg.concurrent_policy,
            });

            if cfg.is_one_shot() {
                let job = wrap_server_job(Arc::clone(&cfg.job));
                one_shots.push(OneShotEntry { ctx, job });
            } else {
                let schedule = schedule::for_config(&cfg)
                    .with_context(|| format!("job {}: invalid schedule", cfg.name))?;
                let job = wrap_cron_job(Arc::clone(&cfg.job), cfg.concurrent_policy);
                scheduled.push(ScheduledEntry { ctx, job, schedule });
            }
        }

        Ok(Self {
            one_shots: Mutex::new(one_shots),
            scheduled: Mutex::new(scheduled),
            scheduler: Mutex::new(Scheduler::new(shutdown.clone())),
            shutdown,
            infos,
        })
    }

    /// Snapshot of the jobs the runner owns.
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.infos.clone()
    }
}

#[async_trait]
impl Component for JobRunner {
    fn name(&self) -> &str {
        "job-runner"
    }

    async fn start(&self) -> Result<()> {
        let mut scheduler = self.scheduler.lock().await;
        for entry in self.scheduled.lock().await.drain(..) {
            scheduler.schedule(entry.ctx, entry.job, entry.schedule);
        }
        scheduler.start();

        for entry in self.one_shots.lock().await.drain(..) {
            info!(job = entry.ctx.job_name(), "starting one-shot job");
            tokio::spawn(async move {
                let _ = entry.job.run(&entry.ctx).await;
            });
        }

        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        // Signals every in-flight and future invocation, then waits for the
        // dispatch loop only; job bodies that ignore cancellation are not
        // forcibly terminated.
        self.shutdown.cancel();
        self.scheduler.lock().await.stop().await;
        Ok(())
    }
}
