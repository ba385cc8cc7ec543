//! One admission of an envelope, run to a terminal outcome.
//!
//! A unit moves ready -> executing -> finished, never backwards. While
//! executing it loops: re-check the guards, start one attempt, wait for
//! the attempt to resolve or for a cancellation wakeup, repeat. The guard
//! order is fixed: time budget, cancellation, attempt budget, expiration,
//! retry deadline. Every state change that matters for recovery is
//! persisted before the next attempt starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::envelope::{Envelope, EnvelopeState};
use crate::job::{CancelHandle, Completion, FailReason, JobResult};
use crate::stats::QueueStats;
use crate::store::{now_epoch_ms, JobStore};

/// Lifecycle of a single execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Ready,
    Executing,
    Finished,
}

/// Terminal outcome of one unit.
#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed(FailReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    fn envelope_state(&self) -> EnvelopeState {
        match self {
            Outcome::Succeeded => EnvelopeState::Succeeded,
            Outcome::Failed(_) => EnvelopeState::Failed,
        }
    }
}

pub struct ExecutionUnit {
    envelope: Arc<Envelope>,
    store: JobStore,
    stats: Arc<QueueStats>,
    state: Mutex<UnitState>,
    timed_out: AtomicBool,
    cancelled: AtomicBool,
    /// Cancel handle of the attempt currently in flight, if any.
    current_cancel: Mutex<Option<CancelHandle>>,
    /// Wakes the attempt wait when a cancellation path fires.
    cancel_notify: Notify,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Publishes the terminal outcome; blocking-mode successors subscribe.
    done_tx: watch::Sender<Option<bool>>,
    /// Outcome channel of the predecessor on a blocking connection.
    dependency: Mutex<Option<watch::Receiver<Option<bool>>>>,
}

impl ExecutionUnit {
    pub(crate) fn new(
        envelope: Arc<Envelope>,
        store: JobStore,
        stats: Arc<QueueStats>,
    ) -> Arc<Self> {
        let (done_tx, _) = watch::channel(None);
        Arc::new(ExecutionUnit {
            envelope,
            store,
            stats,
            state: Mutex::new(UnitState::Ready),
            timed_out: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            current_cancel: Mutex::new(None),
            cancel_notify: Notify::new(),
            timer: Mutex::new(None),
            done_tx,
            dependency: Mutex::new(None),
        })
    }

    pub fn state(&self) -> UnitState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    /// Subscribe to this unit's terminal outcome. `None` until finished,
    /// then `Some(success)`.
    pub(crate) fn outcome_channel(&self) -> watch::Receiver<Option<bool>> {
        self.done_tx.subscribe()
    }

    pub(crate) fn set_dependency(&self, rx: watch::Receiver<Option<bool>>) {
        *self.dependency.lock().unwrap() = Some(rx);
    }

    /// Stop the unit: flag it, stop the in-flight attempt if the job gave
    /// us a handle, and wake the attempt wait so the guards run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.invoke_current_cancel();
        self.cancel_notify.notify_one();
    }

    fn trigger_timeout(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
        self.invoke_current_cancel();
        self.cancel_notify.notify_one();
    }

    fn invoke_current_cancel(&self) {
        if let Some(handle) = self.current_cancel.lock().unwrap().as_mut() {
            handle.invoke();
        }
    }

    /// Wait for the predecessor's outcome, if this unit has one. Returns
    /// `false` when the predecessor failed, `true` when the unit is clear
    /// to run (including when it was cancelled while waiting; the guards
    /// pick that up).
    ///
    /// Must resolve before the unit takes an execution permit: on a
    /// single-permit connection a successor holding the permit while
    /// waiting would starve the very predecessor it waits for.
    pub(crate) async fn await_dependency(&self) -> bool {
        let dependency = self.dependency.lock().unwrap().take();
        let Some(mut rx) = dependency else {
            return true;
        };
        loop {
            if self.cancelled.load(Ordering::SeqCst) || self.timed_out.load(Ordering::SeqCst) {
                return true;
            }
            let current = *rx.borrow();
            if let Some(success) = current {
                return success;
            }
            tokio::select! {
                changed = rx.changed() => {
                    // A dropped sender means the predecessor never
                    // finished; treat that as failure rather than running
                    // out of order.
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = self.cancel_notify.notified() => {}
            }
        }
    }

    /// Finish without running because the predecessor failed.
    pub(crate) async fn fail_dependency(&self) -> Outcome {
        debug!(id = %self.envelope.id(), "predecessor failed, failing without running");
        self.finish(Outcome::Failed(FailReason::DependencyFailed)).await
    }

    /// Drive the unit to its terminal outcome. The dependency gate must
    /// already be resolved.
    pub(crate) async fn run(self: Arc<Self>) -> Outcome {
        *self.state.lock().unwrap() = UnitState::Executing;
        self.envelope.set_state(EnvelopeState::Running);
        self.persist_envelope().await;
        self.arm_timer();

        self.attempt_loop().await
    }

    fn arm_timer(self: &Arc<Self>) {
        let timeout_ms = self.envelope.timeout_ms();
        if timeout_ms == 0 {
            return;
        }
        let unit = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            debug!(id = %unit.envelope.id(), timeout_ms, "execution budget elapsed, stopping unit");
            unit.trigger_timeout();
        });
        *self.timer.lock().unwrap() = Some(handle);
    }

    async fn attempt_loop(&self) -> Outcome {
        loop {
            let now = now_epoch_ms();
            if self.timed_out.load(Ordering::SeqCst) {
                return self.finish(Outcome::Failed(FailReason::Timeout)).await;
            }
            if self.cancelled.load(Ordering::SeqCst) || self.state() != UnitState::Executing {
                return self.finish(Outcome::Failed(FailReason::Cancelled)).await;
            }
            if self.envelope.tries() >= self.envelope.max_tries() {
                return self.finish(Outcome::Failed(FailReason::TooManyTries)).await;
            }
            if let Some(expiration) = self.envelope.expiration_ms() {
                if expiration <= now {
                    return self.finish(Outcome::Failed(FailReason::Expired)).await;
                }
            }
            if let Some(retry_until) = self.envelope.retry_until_ms() {
                // Only a retry is bounded by the deadline, never the first try
                if self.envelope.tries() > 0 && retry_until <= now {
                    return self.finish(Outcome::Failed(FailReason::Expired)).await;
                }
            }

            let tries = self.envelope.increment_tries();
            self.persist_envelope().await;
            self.stats.record_attempt();
            debug!(id = %self.envelope.id(), tries, "starting attempt");

            let (completion, mut result_rx) = Completion::channel();
            let cancel = self.envelope.handle(completion);
            *self.current_cancel.lock().unwrap() = Some(cancel);
            // Cancellation may have raced the handle registration
            if self.cancelled.load(Ordering::SeqCst) || self.timed_out.load(Ordering::SeqCst) {
                self.invoke_current_cancel();
            }

            let resolved = tokio::select! {
                result = &mut result_rx => Some(result),
                _ = self.cancel_notify.notified() => None,
            };
            self.current_cancel.lock().unwrap().take();

            match resolved {
                Some(Ok(JobResult::Success)) => {
                    return self.finish(Outcome::Succeeded).await;
                }
                Some(Ok(JobResult::Failure(cause))) => {
                    // The cause never becomes the terminal reason; the
                    // guards above decide what retires the job.
                    debug!(id = %self.envelope.id(), tries, cause = ?cause, "attempt failed");
                }
                Some(Err(_)) => {
                    debug!(
                        id = %self.envelope.id(),
                        tries,
                        "completion dropped unresolved, counting a failed attempt"
                    );
                }
                // Woken by cancel or timeout; the guards will pick the reason
                None => {}
            }
        }
    }

    async fn finish(&self, outcome: Outcome) -> Outcome {
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.abort();
        }
        *self.state.lock().unwrap() = UnitState::Finished;
        self.envelope.set_state(outcome.envelope_state());
        self.persist_envelope().await;
        self.done_tx.send_replace(Some(outcome.is_success()));
        outcome
    }

    /// Store failures never interrupt execution; the envelope's in-memory
    /// truth keeps going and the write is retried on the next change.
    async fn persist_envelope(&self) {
        if let Err(e) = self.store.put(&self.envelope).await {
            warn!(id = %self.envelope.id(), error = %e, "failed to persist envelope");
        }
    }
}
