use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::job::{Job, PayloadError};

/// Rebuilds a job value from its stored payload bytes.
pub type JobFactory = fn(&[u8]) -> Result<Box<dyn Job>, PayloadError>;

/// Map from job type tag to the factory that revives stored payloads.
///
/// Registration is process-wide and must happen before `run()` recovers
/// envelopes; a stored envelope whose tag has no factory is skipped.
pub struct JobRegistry {
    factories: Mutex<HashMap<String, JobFactory>>,
}

static GLOBAL: OnceLock<JobRegistry> = OnceLock::new();

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry {
            factories: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry used by every runner.
    pub fn global() -> &'static JobRegistry {
        GLOBAL.get_or_init(JobRegistry::new)
    }

    /// Register `T` under `tag`. Registering a tag twice keeps the first
    /// factory and logs a warning; callers commonly register from several
    /// startup paths and the first one wins.
    pub fn register<T>(&self, tag: &str)
    where
        T: Job + DeserializeOwned,
    {
        let mut factories = self.factories.lock().unwrap();
        if factories.contains_key(tag) {
            warn!(tag, "job type already registered, keeping existing factory");
            return;
        }
        factories.insert(tag.to_string(), revive_json::<T>);
    }

    pub fn resolve(&self, tag: &str) -> Option<JobFactory> {
        self.factories.lock().unwrap().get(tag).copied()
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.factories.lock().unwrap().contains_key(tag)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        JobRegistry::new()
    }
}

fn revive_json<T>(payload: &[u8]) -> Result<Box<dyn Job>, PayloadError>
where
    T: Job + DeserializeOwned,
{
    let job: T = serde_json::from_slice(payload)?;
    Ok(Box::new(job))
}
