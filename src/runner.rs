//! Per-connection execution engine.
//!
//! A runner owns one connection's store and drives its envelopes through
//! execution units.
//!
//! # Key Invariants
//!
//! - At most one in-flight unit per envelope id. Enforced by the
//!   `inflight` set, which admission inserts into atomically and
//!   completion clears before the outcome is handled, so a released
//!   envelope can be re-admitted.
//! - Admission declines silently. A terminal state, a spent attempt
//!   budget, a passed expiration or retry deadline, or a duplicate id all
//!   drop the offer with a debug log; dispatch still returns the envelope.
//! - Parallelism is bounded by a semaphore sized from the connection
//!   mode. Blocking connections additionally chain each unit to its
//!   predecessor's outcome, so one failure cascades down the chain
//!   without running anything.
//! - Completion runs exactly one of: remove (success or drop), or
//!   remove + reset + re-offer (release). The re-offer goes back through
//!   admission and may be declined.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Semaphore};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::envelope::{Envelope, EnvelopeState};
use crate::extend::{ExecutionExtender, ExtensionToken};
use crate::job::{FailAction, Job};
use crate::registry::JobRegistry;
use crate::settings::StoreConfig;
use crate::stats::{QueueStats, StatsSnapshot};
use crate::store::{now_epoch_ms, JobStore, StoreError};
use crate::unit::{ExecutionUnit, Outcome};

pub struct Runner {
    connection: Connection,
    store: JobStore,
    extender: Arc<dyn ExecutionExtender>,
    semaphore: Arc<Semaphore>,
    inflight: Mutex<HashSet<String>>,
    /// Outcome channel of the most recently admitted unit, kept only on
    /// blocking connections.
    last_admitted: Mutex<Option<watch::Receiver<Option<bool>>>>,
    stats: Arc<QueueStats>,
}

impl Runner {
    pub async fn open(
        connection: Connection,
        cfg: &StoreConfig,
        extender: Arc<dyn ExecutionExtender>,
    ) -> Result<Arc<Self>, StoreError> {
        let store = JobStore::open(cfg).await?;
        let permits = connection.mode.max_parallel();
        debug!(connection = %connection, permits, "opened runner");
        Ok(Arc::new(Runner {
            connection,
            store,
            extender,
            semaphore: Arc::new(Semaphore::new(permits)),
            inflight: Mutex::new(HashSet::new()),
            last_admitted: Mutex::new(None),
            stats: Arc::new(QueueStats::new()),
        }))
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wrap a job in a fresh envelope and offer it to the queue. The
    /// envelope comes back to the caller either way; admission may still
    /// have declined it.
    pub async fn dispatch(self: &Arc<Self>, job: Box<dyn Job>) -> Arc<Envelope> {
        let envelope = Arc::new(Envelope::new(job));
        self.stats.record_dispatched();
        debug!(id = %envelope.id(), job_type = %envelope.job_type(), "dispatching job");
        self.enqueue(Arc::clone(&envelope)).await;
        envelope
    }

    /// Reload every stored envelope and offer each to the queue again.
    ///
    /// Safe to call repeatedly: terminal envelopes and in-flight ids are
    /// declined by admission, and envelopes whose job type is missing from
    /// the registry were already skipped by the store scan.
    pub async fn run(self: &Arc<Self>) -> Result<(), StoreError> {
        let envelopes = self.store.load_all(JobRegistry::global()).await?;
        debug!(
            connection = %self.connection,
            count = envelopes.len(),
            "recovering stored envelopes"
        );
        for envelope in envelopes {
            self.enqueue(Arc::new(envelope)).await;
        }
        Ok(())
    }

    /// Admission: decide whether this envelope gets an execution unit.
    pub(crate) async fn enqueue(self: &Arc<Self>, envelope: Arc<Envelope>) {
        let now = now_epoch_ms();
        if !envelope.state().is_enqueueable() {
            debug!(id = %envelope.id(), state = ?envelope.state(), "declining terminal envelope");
            return;
        }
        if envelope.tries() >= envelope.max_tries() {
            debug!(
                id = %envelope.id(),
                tries = envelope.tries(),
                "declining envelope with spent attempt budget"
            );
            return;
        }
        if let Some(expiration) = envelope.expiration_ms() {
            if expiration <= now {
                debug!(id = %envelope.id(), "declining expired envelope");
                return;
            }
        }
        if let Some(retry_until) = envelope.retry_until_ms() {
            if envelope.tries() > 0 && retry_until <= now {
                debug!(id = %envelope.id(), "declining envelope past its retry deadline");
                return;
            }
        }
        {
            let mut inflight = self.inflight.lock().unwrap();
            if !inflight.insert(envelope.id().to_string()) {
                debug!(id = %envelope.id(), "declining envelope already in flight");
                return;
            }
        }

        envelope.set_state(EnvelopeState::Queued);
        if let Err(e) = self.store.put(&envelope).await {
            warn!(id = %envelope.id(), error = %e, "failed to persist queued envelope");
        }

        let unit = ExecutionUnit::new(
            Arc::clone(&envelope),
            self.store.clone(),
            Arc::clone(&self.stats),
        );

        if self.connection.mode.is_blocking() {
            let mut last = self.last_admitted.lock().unwrap();
            if let Some(previous) = last.take() {
                unit.set_dependency(previous);
            }
            *last = Some(unit.outcome_channel());
        }

        // The grant brackets the whole unit, acquired before the unit can
        // run and released when its task finishes.
        let grant = if envelope.continue_in_background() {
            let expire_unit = Arc::clone(&unit);
            self.extender.begin(Box::new(move || expire_unit.cancel()))
        } else {
            None
        };

        self.spawn_unit(unit, grant);
    }

    fn spawn_unit(self: &Arc<Self>, unit: Arc<ExecutionUnit>, grant: Option<ExtensionToken>) {
        let runner = Arc::clone(self);
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let envelope = Arc::clone(unit.envelope());

            // Dependency gate first, permit second: a successor must not
            // hold the permit its predecessor still needs.
            if !unit.await_dependency().await {
                let outcome = unit.fail_dependency().await;
                if let Some(token) = grant {
                    runner.extender.end(token);
                }
                runner.complete(envelope, outcome).await;
                return;
            }

            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Engine shut down before the unit could start
                    if let Some(token) = grant {
                        runner.extender.end(token);
                    }
                    return;
                }
            };
            let outcome = unit.run().await;
            drop(permit);
            if let Some(token) = grant {
                runner.extender.end(token);
            }
            runner.complete(envelope, outcome).await;
        });
    }

    /// Handle a unit's terminal outcome.
    async fn complete(self: &Arc<Self>, envelope: Arc<Envelope>, outcome: Outcome) {
        // Clear in-flight before deciding, so a release can re-admit
        self.inflight.lock().unwrap().remove(envelope.id());

        match outcome {
            Outcome::Succeeded => {
                self.stats.record_succeeded();
                debug!(id = %envelope.id(), "job succeeded");
                envelope.job_did_succeed();
                self.remove_envelope(&envelope).await;
            }
            Outcome::Failed(reason) => {
                self.stats.record_failed();
                debug!(id = %envelope.id(), reason = %reason, "job failed");
                match envelope.job_did_fail(&reason) {
                    FailAction::Drop => {
                        self.stats.record_dropped();
                        self.remove_envelope(&envelope).await;
                    }
                    FailAction::Release => {
                        self.stats.record_released();
                        self.remove_envelope(&envelope).await;
                        envelope.reset();
                        self.enqueue(envelope).await;
                    }
                }
            }
        }
    }

    async fn remove_envelope(&self, envelope: &Envelope) {
        if let Err(e) = self.store.remove(envelope.id()).await {
            warn!(id = %envelope.id(), error = %e, "failed to remove envelope");
        }
    }

    /// Stop admitting new units and close the store. In-flight units keep
    /// their store handle; their late writes fail with a warning.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.semaphore.close();
        self.store.flush().await?;
        self.store.close().await?;
        Ok(())
    }
}
