mod file_config;

pub use file_config::{JobOverrideConfig, JobsFileConfig};

use crate::job::ConcurrentPolicy;
use anyhow::{bail, Result};
use std::collections::HashMap;

/// Per-job override resolved from the file config. `None` fields leave the
/// job's self-declared default in place.
#[derive(Debug, Clone, Default)]
pub struct JobOverride {
    pub schedule: Option<String>,
    pub immediately: Option<bool>,
    pub concurrent_policy: Option<ConcurrentPolicy>,
    pub disable: Option<bool>,
}

/// Resolved configuration for the job system.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Whether the metrics wrappers record anything.
    pub instrumentation: bool,
    /// Per-job overrides, keyed by job name.
    pub overrides: HashMap<String, JobOverride>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            instrumentation: true,
            overrides: HashMap::new(),
        }
    }
}

impl JobsConfig {
    /// Resolve configuration from an optional TOML file config.
    pub fn resolve(file_config: Option<JobsFileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let instrumentation = file.instrumentation.unwrap_or(true);

        let mut overrides = HashMap::new();
        for (name, job) in file.jobs {
            let concurrent_policy = match &job.concurrent_policy {
                Some(value) => match ConcurrentPolicy::parse(value) {
                    Some(policy) => Some(policy),
                    None => bail!("job {}: unknown concurrent policy {:?}", name, value),
                },
                None => None,
            };
            overrides.insert(
                name,
                JobOverride {
                    schedule: job.schedule,
                    immediately: job.immediately,
                    concurrent_policy,
                    disable: job.disable,
                },
            );
        }

        Ok(Self {
            instrumentation,
            overrides,
        })
    }

    pub fn override_for(&self, name: &str) -> Option<&JobOverride> {
        self.overrides.get(name)
    }
}
