use std::borrow::Cow;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::JobConfig;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule spec: {0}")]
    InvalidSpec(#[from] cron::error::Error),
    #[error("job has no schedule")]
    MissingSpec,
}

/// Computes the next due time given the current time.
///
/// `next` takes `&mut self` because the immediate-first decorator carries
/// one bit of state; each scheduled entry owns its `Schedule` exclusively
/// and the dispatch loop computes next-due times single-threaded.
pub trait Schedule: Send {
    /// The next occurrence strictly after `after`, or `None` when the
    /// schedule has no further occurrences.
    fn next(&mut self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

struct CronSchedule {
    inner: cron::Schedule,
}

impl Schedule for CronSchedule {
    fn next(&mut self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }
}

/// Decorator that fires once at "now" before delegating to the wrapped
/// schedule forever after.
struct ImmediateFirst {
    fired: bool,
    inner: Box<dyn Schedule>,
}

impl Schedule for ImmediateFirst {
    fn next(&mut self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.fired {
            self.fired = true;
            return Some(after);
        }
        self.inner.next(after)
    }
}

/// The cron parser wants a seconds field; plain five-field expressions get
/// one prepended. `@hourly`-style descriptors pass through untouched.
fn normalize(spec: &str) -> Cow<'_, str> {
    let trimmed = spec.trim();
    if !trimmed.starts_with('@') && trimmed.split_whitespace().count() == 5 {
        return Cow::Owned(format!("0 {}", trimmed));
    }
    Cow::Borrowed(trimmed)
}

/// Parse a cron expression into a `Schedule`.
pub fn parse(spec: &str) -> Result<Box<dyn Schedule>, ScheduleError> {
    let inner = cron::Schedule::from_str(&normalize(spec))?;
    Ok(Box::new(CronSchedule { inner }))
}

/// Parse a resolved job's schedule, honoring its immediate-first flag.
pub fn for_config(config: &JobConfig) -> Result<Box<dyn Schedule>, ScheduleError> {
    let spec = config.schedule.as_deref().ok_or(ScheduleError::MissingSpec)?;
    let inner = parse(spec)?;
    if config.immediately {
        return Ok(Box::new(ImmediateFirst {
            fired: false,
            inner,
        }));
    }
    Ok(inner)
}
