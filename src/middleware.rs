use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, Instrument};

use crate::job::{ConcurrentPolicy, Job, JobContext};
use crate::metrics;
use crate::policy::Guarded;

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";
pub const OUTCOME_PANIC: &str = "panic";

/// Outermost wrapper: contains panics from anywhere in the chain below it,
/// including the instrumentation bookkeeping itself.
///
/// A panicking run is logged with a stack trace and counted as a `panic`
/// outcome; it is never re-raised and never converted into an error return.
/// One crashing job must not take down the dispatch loop.
struct Recovered {
    inner: Arc<dyn Job>,
}

#[async_trait]
impl Job for Recovered {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        let start = Instant::now();
        match AssertUnwindSafe(self.inner.run(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let backtrace = Backtrace::force_capture();
                error!(
                    job = ctx.job_name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    panic = %panic_message(payload.as_ref()),
                    "job panicked\n{backtrace}"
                );
                metrics::record_job_run(ctx.job_name(), OUTCOME_PANIC, start.elapsed());
                Ok(())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs the job inside a span named after it; an error is recorded onto the
/// span before it closes.
struct Traced {
    inner: Arc<dyn Job>,
}

#[async_trait]
impl Job for Traced {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        let span = tracing::info_span!(
            "job_run",
            job = ctx.job_name(),
            kind = "internal",
            error = tracing::field::Empty,
        );
        async {
            let result = self.inner.run(ctx).await;
            if let Err(err) = &result {
                tracing::Span::current().record("error", tracing::field::display(err));
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Decrements the running gauge on drop, so a panic unwinding through the
/// chain cannot leave the gauge stuck.
struct RunningGuard<'a>(&'a str);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        metrics::set_job_running(self.0, false);
    }
}

struct Metered {
    inner: Arc<dyn Job>,
}

#[async_trait]
impl Job for Metered {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        let start = Instant::now();
        metrics::set_job_running(ctx.job_name(), true);
        let _running = RunningGuard(ctx.job_name());

        let result = self.inner.run(ctx).await;

        let outcome = if result.is_ok() {
            OUTCOME_SUCCESS
        } else {
            OUTCOME_FAILURE
        };
        metrics::record_job_run(ctx.job_name(), outcome, start.elapsed());
        result
    }
}

struct Logged {
    inner: Arc<dyn Job>,
}

#[async_trait]
impl Job for Logged {
    async fn run(&self, ctx: &JobContext) -> Result<()> {
        debug!(job = ctx.job_name(), "run");
        let start = Instant::now();

        let result = self.inner.run(ctx).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => debug!(job = ctx.job_name(), elapsed_ms, "done"),
            Err(err) => error!(job = ctx.job_name(), elapsed_ms, error = %err, "err done"),
        }
        result
    }
}

/// Instrumentation chain for scheduled jobs:
/// recovery → concurrency guard → tracing → metrics → logging → job.
///
/// The guard sits inside recovery but outside the instrumentation wrappers:
/// a dropped or aborted invocation produces no span, no run metric and no
/// "done" log line.
pub fn wrap_cron_job(job: Arc<dyn Job>, policy: ConcurrentPolicy) -> Arc<dyn Job> {
    let job: Arc<dyn Job> = Arc::new(Logged { inner: job });
    let job: Arc<dyn Job> = Arc::new(Metered { inner: job });
    let job: Arc<dyn Job> = Arc::new(Traced { inner: job });
    let job = Guarded::wrap(job, policy);
    Arc::new(Recovered { inner: job })
}

/// Instrumentation chain for one-shot jobs: same as the scheduled chain but
/// without a concurrency guard, since a one-shot runs exactly once.
pub fn wrap_server_job(job: Arc<dyn Job>) -> Arc<dyn Job> {
    let job: Arc<dyn Job> = Arc::new(Logged { inner: job });
    let job: Arc<dyn Job> = Arc::new(Metered { inner: job });
    let job: Arc<dyn Job> = Arc::new(Traced { inner: job });
    Arc::new(Recovered { inner: job })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        async fn run(&self, _ctx: &JobContext) -> Result<()> {
            panic!("boom");
        }
    }

    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        async fn run(&self, _ctx: &JobContext) -> Result<()> {
            Err(anyhow!("job body failed"))
        }
    }

    struct SlowJob {
        executions: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for SlowJob {
        async fn run(&self, _ctx: &JobContext) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ctx(name: &str) -> JobContext {
        JobContext::new(name, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        metrics::init_metrics();
        let wrapped = wrap_cron_job(Arc::new(PanickingJob), ConcurrentPolicy::Allow);

        let before = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["panicking_job", OUTCOME_PANIC])
            .get();

        // A panicking run returns Ok; the panic is logged, not raised.
        wrapped.run(&ctx("panicking_job")).await.unwrap();

        let after = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["panicking_job", OUTCOME_PANIC])
            .get();
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn test_panic_does_not_leak_running_gauge() {
        metrics::init_metrics();
        let wrapped = wrap_cron_job(Arc::new(PanickingJob), ConcurrentPolicy::Allow);

        wrapped.run(&ctx("gauge_leak_job")).await.unwrap();

        assert_eq!(
            metrics::JOB_RUNNING.with_label_values(&["gauge_leak_job"]).get(),
            0
        );
    }

    #[tokio::test]
    async fn test_failure_outcome_recorded_and_error_propagated() {
        metrics::init_metrics();
        let wrapped = wrap_cron_job(Arc::new(FailingJob), ConcurrentPolicy::Allow);

        let before = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["failing_job", OUTCOME_FAILURE])
            .get();

        // The pipeline reports the error to its caller (the dispatch task
        // discards it there).
        let result = wrapped.run(&ctx("failing_job")).await;
        assert!(result.is_err());

        let after = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["failing_job", OUTCOME_FAILURE])
            .get();
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn test_success_outcome_recorded() {
        metrics::init_metrics();
        let executions = Arc::new(AtomicUsize::new(0));
        let wrapped = wrap_server_job(Arc::new(SlowJob {
            executions: executions.clone(),
        }));

        let before = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["slow_job", OUTCOME_SUCCESS])
            .get();

        wrapped.run(&ctx("slow_job")).await.unwrap();

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        let after = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["slow_job", OUTCOME_SUCCESS])
            .get();
        assert_eq!(after, before + 1);
    }

    #[tokio::test]
    async fn test_skipped_run_records_no_run_metric() {
        metrics::init_metrics();
        let executions = Arc::new(AtomicUsize::new(0));
        let wrapped = wrap_cron_job(
            Arc::new(SlowJob {
                executions: executions.clone(),
            }),
            ConcurrentPolicy::Skip,
        );

        let success_before = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["skipped_job", OUTCOME_SUCCESS])
            .get();

        let first = tokio::spawn({
            let wrapped = wrapped.clone();
            async move { wrapped.run(&ctx("skipped_job")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Overlapping invocation: dropped by the guard before it reaches
        // the metrics wrapper.
        wrapped.run(&ctx("skipped_job")).await.unwrap();

        first.await.unwrap().unwrap();
        assert_eq!(executions.load(Ordering::SeqCst), 1);

        let success_after = metrics::JOB_RUNS_TOTAL
            .with_label_values(&["skipped_job", OUTCOME_SUCCESS])
            .get();
        // Exactly one run recorded: the one that actually executed.
        assert_eq!(success_after, success_before + 1);
    }
}
