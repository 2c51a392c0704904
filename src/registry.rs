use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::JobOverride;
use crate::job::{Job, JobConfig};

/// Collects job registrations and resolves each one's effective
/// configuration.
///
/// Resolution merges, in order: a zero-valued config, the job's
/// self-declared defaults (each applied only when declared), then the
/// external override for the job's name, field-by-field. The resolved
/// configs are owned by the registry until the runner consumes them; the
/// runner clones before wrapping, so they are never mutated.
///
/// Duplicate names are not rejected: registering the same name twice yields
/// two independent entries, which allows one handler to run under several
/// cadences.
pub struct Registry {
    overrides: HashMap<String, JobOverride>,
    jobs: Vec<JobConfig>,
}

impl Registry {
    pub fn new(overrides: HashMap<String, JobOverride>) -> Self {
        Self {
            overrides,
            jobs: Vec::new(),
        }
    }

    /// Register a job under `name`, resolving its effective configuration.
    pub fn register(&mut self, name: &str, job: Arc<dyn Job>) {
        let config = self.resolve(name, job);
        debug!(
            job = name,
            schedule = config.schedule.as_deref().unwrap_or("<one-shot>"),
            policy = %config.concurrent_policy,
            disable = config.disable,
            "registered job"
        );
        self.jobs.push(config);
    }

    /// Resolved configs, in registration order.
    pub fn registered_jobs(&self) -> &[JobConfig] {
        &self.jobs
    }

    fn resolve(&self, name: &str, job: Arc<dyn Job>) -> JobConfig {
        let mut config = JobConfig {
            name: name.to_string(),
            schedule: None,
            immediately: false,
            concurrent_policy: Default::default(),
            disable: false,
            job: Arc::clone(&job),
        };

        // Self-declared defaults, each applied only when the job declares it.
        if let Some(schedule) = job.schedule() {
            config.schedule = Some(schedule);
        }
        if let Some(immediately) = job.immediately() {
            config.immediately = immediately;
        }
        if let Some(policy) = job.concurrent_policy() {
            config.concurrent_policy = policy;
        }

        // External override wins field-by-field; unset fields are no-ops.
        if let Some(override_) = self.overrides.get(name) {
            if let Some(schedule) = &override_.schedule {
                config.schedule = Some(schedule.clone());
            }
            if let Some(immediately) = override_.immediately {
                config.immediately = immediately;
            }
            if let Some(policy) = override_.concurrent_policy {
                config.concurrent_policy = policy;
            }
            if let Some(disable) = override_.disable {
                config.disable = disable;
            }
        }

        // An empty schedule means "one-shot", same as no schedule at all.
        if config.schedule.as_deref() == Some("") {
            config.schedule = None;
        }

        config
    }
}
