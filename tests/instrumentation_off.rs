//! Runs in its own process: turning instrumentation off flips a
//! process-global switch, so this must not share a test binary with tests
//! that assert on recorded metrics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use taskmill::config::{JobsConfig, JobsFileConfig};
use taskmill::{metrics, Component, Job, JobContext, JobRunner, Registry};

struct NoisyJob {
    executions: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for NoisyJob {
    async fn run(&self, _ctx: &JobContext) -> Result<()> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn instrumentation_off_records_no_metrics() {
    let file: JobsFileConfig = toml::from_str("instrumentation = false").unwrap();
    let config = JobsConfig::resolve(Some(file)).unwrap();
    assert!(!config.instrumentation);

    let mut registry = Registry::new(config.overrides.clone());
    let executions = Arc::new(AtomicUsize::new(0));
    registry.register(
        "quiet_job",
        Arc::new(NoisyJob {
            executions: executions.clone(),
        }),
    );

    let runner = JobRunner::new(&registry, &config).unwrap();
    runner.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    runner.stop().await.unwrap();

    // The job ran, but nothing was recorded.
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(
        metrics::JOB_RUNS_TOTAL
            .with_label_values(&["quiet_job", "success"])
            .get(),
        0
    );
    assert_eq!(
        metrics::JOB_RUNNING.with_label_values(&["quiet_job"]).get(),
        0
    );
}
