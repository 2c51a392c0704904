use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Per-job rule governing overlapping invocations of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrentPolicy {
    /// Overlapping invocations run concurrently with no coordination.
    #[default]
    Allow,
    /// An invocation due while a previous one is still running is dropped.
    Skip,
    /// An invocation due while a previous one is still running waits its turn.
    Delay,
}

impl ConcurrentPolicy {
    /// Parse a policy name, case-insensitively. Used by the file config.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Some(ConcurrentPolicy::Allow),
            "skip" => Some(ConcurrentPolicy::Skip),
            "delay" => Some(ConcurrentPolicy::Delay),
            _ => None,
        }
    }
}

impl fmt::Display for ConcurrentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrentPolicy::Allow => write!(f, "allow"),
            ConcurrentPolicy::Skip => write!(f, "skip"),
            ConcurrentPolicy::Delay => write!(f, "delay"),
        }
    }
}

/// Context provided to a job for the duration of one invocation.
///
/// Carries the job name (so the instrumentation wrappers can label logs,
/// spans and metrics without extra parameters) and a cancellation token
/// derived from the runner's shutdown token.
#[derive(Clone)]
pub struct JobContext {
    job_name: Arc<str>,
    cancellation_token: CancellationToken,
}

impl JobContext {
    pub fn new(job_name: &str, cancellation_token: CancellationToken) -> Self {
        Self {
            job_name: Arc::from(job_name),
            cancellation_token,
        }
    }

    /// Name of the job this invocation belongs to.
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Check if shutdown has been requested.
    ///
    /// Jobs should periodically check this during long-running operations
    /// and return early if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Completes when shutdown is requested. Suitable for `tokio::select!`
    /// against the job's own work.
    pub async fn cancelled(&self) {
        self.cancellation_token.cancelled().await;
    }
}

/// Trait for background jobs.
///
/// A job is a named unit of work that either runs once at startup (when it
/// resolves with no schedule) or repeatedly on a cron schedule. The three
/// provided methods are self-declared defaults: they are read once at
/// registration time and can each be overridden field-by-field by the
/// external job configuration.
#[async_trait]
pub trait Job: Send + Sync {
    /// Execute the job.
    ///
    /// Long-running implementations should observe `ctx.is_cancelled()` and
    /// return promptly on shutdown; the runner never forcibly terminates a
    /// job body.
    async fn run(&self, ctx: &JobContext) -> Result<()>;

    /// Default cron schedule. `None` means the job runs once at startup
    /// unless a schedule is supplied by the external configuration.
    fn schedule(&self) -> Option<String> {
        None
    }

    /// Whether the first scheduled run should happen immediately at startup
    /// rather than at the first cron boundary.
    fn immediately(&self) -> Option<bool> {
        None
    }

    /// Default policy for overlapping invocations.
    fn concurrent_policy(&self) -> Option<ConcurrentPolicy> {
        None
    }
}

/// Resolved configuration for a registered job.
///
/// Built once by the registry by merging the job's self-declared defaults
/// with the external override for its name; immutable afterwards. The runner
/// clones it before wrapping the job with middleware, so the registry's
/// stored copy is never touched.
#[derive(Clone)]
pub struct JobConfig {
    pub name: String,
    /// Cron expression. `None` makes the job a one-shot.
    pub schedule: Option<String>,
    pub immediately: bool,
    pub concurrent_policy: ConcurrentPolicy,
    pub disable: bool,
    pub job: Arc<dyn Job>,
}

impl JobConfig {
    pub fn is_one_shot(&self) -> bool {
        self.schedule.is_none()
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("immediately", &self.immediately)
            .field("concurrent_policy", &self.concurrent_policy)
            .field("disable", &self.disable)
            .finish_non_exhaustive()
    }
}
