//! Caller-facing facade over the per-connection runners.
//!
//! Queues are cheap handles: every queue opened for the same connection
//! name shares one runner, one store, and one set of counters. The
//! process-wide runner registry refcounts facades so the store closes
//! only when the last facade for a name is closed or dropped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::envelope::Envelope;
use crate::extend::{ExecutionExtender, NoopExtender};
use crate::job::Job;
use crate::registry::JobRegistry;
use crate::runner::Runner;
use crate::settings::QueueSettings;
use crate::stats::StatsSnapshot;
use crate::store::StoreError;

struct RegisteredRunner {
    runner: Arc<Runner>,
    facades: usize,
}

static RUNNERS: OnceLock<Mutex<HashMap<String, RegisteredRunner>>> = OnceLock::new();

fn runner_registry() -> &'static Mutex<HashMap<String, RegisteredRunner>> {
    RUNNERS.get_or_init(Default::default)
}

/// Decrement a name's facade count; hand back the runner once it hits zero.
fn release_entry(name: &str) -> Option<Arc<Runner>> {
    let mut registry = runner_registry().lock().unwrap();
    if let Some(entry) = registry.get_mut(name) {
        entry.facades = entry.facades.saturating_sub(1);
        if entry.facades == 0 {
            return registry.remove(name).map(|e| e.runner);
        }
    }
    None
}

/// Handle to one connection's scheduler.
pub struct Queue {
    connection: Connection,
    runner: Arc<Runner>,
    released: bool,
}

impl Queue {
    /// Open a queue for `connection`, reusing the existing runner when one
    /// is already open under the same name. The first open of a name fixes
    /// the runner's mode; later opens with a different mode share the
    /// existing engine.
    pub async fn open(
        connection: Connection,
        settings: &QueueSettings,
        extender: Arc<dyn ExecutionExtender>,
    ) -> Result<Self, StoreError> {
        {
            let mut registry = runner_registry().lock().unwrap();
            if let Some(entry) = registry.get_mut(&connection.name) {
                entry.facades += 1;
                return Ok(Queue {
                    connection,
                    runner: Arc::clone(&entry.runner),
                    released: false,
                });
            }
        }

        let cfg = settings.store_config(&connection.name);
        let fresh = Runner::open(connection.clone(), &cfg, extender).await?;

        // Another task may have opened the same name while ours was opening
        let (runner, duplicate) = {
            let mut registry = runner_registry().lock().unwrap();
            match registry.entry(connection.name.clone()) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().facades += 1;
                    (Arc::clone(&entry.get().runner), Some(fresh))
                }
                Entry::Vacant(slot) => {
                    slot.insert(RegisteredRunner {
                        runner: Arc::clone(&fresh),
                        facades: 1,
                    });
                    (fresh, None)
                }
            }
        };
        if let Some(duplicate) = duplicate {
            debug!(name = %connection.name, "lost open race, closing duplicate runner");
            if let Err(e) = duplicate.close().await {
                warn!(name = %connection.name, error = %e, "failed to close duplicate runner");
            }
        }

        Ok(Queue {
            connection,
            runner,
            released: false,
        })
    }

    /// Open a queue with the default connection and no extension support.
    pub async fn open_default(settings: &QueueSettings) -> Result<Self, StoreError> {
        Queue::open(Connection::default(), settings, NoopExtender::new()).await
    }

    /// Register `T` under `tag` in the process-wide job registry.
    /// Must happen before `run()` so stored envelopes of this type revive.
    pub fn register<T>(tag: &str)
    where
        T: Job + DeserializeOwned,
    {
        JobRegistry::global().register::<T>(tag);
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.runner.stats()
    }

    /// Offer a job to this connection. Returns the envelope tracking it.
    pub async fn dispatch<J: Job>(&self, job: J) -> Arc<Envelope> {
        self.runner.dispatch(Box::new(job)).await
    }

    /// Recover stored envelopes and offer them to the queue again.
    pub async fn run(&self) -> Result<(), StoreError> {
        self.runner.run().await
    }

    /// Release this facade; flush and close the store when it is the last
    /// one for the connection name.
    pub async fn close(mut self) -> Result<(), StoreError> {
        self.released = true;
        if let Some(runner) = release_entry(&self.connection.name) {
            debug!(name = %self.connection.name, "closing last facade, shutting runner down");
            runner.close().await?;
        }
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if !self.released {
            // Dropping without close() releases the refcount but cannot
            // close the store gracefully; the db handle cleans up on its
            // own drop.
            release_entry(&self.connection.name);
        }
    }
}

/// Close every open runner in the process, regardless of facade counts.
/// Intended for host shutdown paths.
pub async fn close_all() -> Result<(), CloseAllError> {
    let drained: Vec<(String, Arc<Runner>)> = {
        let mut registry = runner_registry().lock().unwrap();
        registry
            .drain()
            .map(|(name, entry)| (name, entry.runner))
            .collect()
    };

    let mut errors: Vec<(String, StoreError)> = Vec::new();
    for (name, runner) in drained {
        if let Err(e) = runner.close().await {
            errors.push((name, e));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CloseAllError { errors })
    }
}

#[derive(Debug, Error)]
pub struct CloseAllError {
    pub errors: Vec<(String, StoreError)>,
}

impl std::fmt::Display for CloseAllError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} runner(s) failed to close", self.errors.len())
    }
}
