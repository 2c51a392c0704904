use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct JobsFileConfig {
    /// Set to false to turn the metrics wrappers into no-ops.
    pub instrumentation: Option<bool>,

    /// Per-job overrides, keyed by job name.
    pub jobs: HashMap<String, JobOverrideConfig>,
}

/// Partial per-job configuration. Every field is optional so a file can
/// override a single field without restating the job's defaults.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobOverrideConfig {
    pub schedule: Option<String>,
    pub immediately: Option<bool>,
    /// Policy name: "allow", "skip" or "delay"
    pub concurrent_policy: Option<String>,
    pub disable: Option<bool>,
}

impl JobsFileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
