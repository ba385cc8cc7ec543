use std::fmt;

use thiserror::Error;
use tokio::sync::oneshot;

/// Boxed error a job attempt may report when it fails.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Error produced while turning a job into bytes or back.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("json payload error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal result of a single job attempt, reported through a [`Completion`].
#[derive(Debug)]
pub enum JobResult {
    Success,
    Failure(Option<JobError>),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success)
    }
}

/// Why a job finished without succeeding.
///
/// `Error` is vocabulary for hosts and hooks; the engine itself never
/// produces it as a terminal reason. A failed attempt re-enters the retry
/// loop and the loop's guards pick the terminal reason.
#[derive(Debug)]
pub enum FailReason {
    /// The job reported a failure with an underlying cause.
    Error(JobError),
    /// The expiration time or retry deadline passed.
    Expired,
    /// The execution time budget elapsed.
    Timeout,
    /// The unit was cancelled before it could finish.
    Cancelled,
    /// An earlier job on a blocking connection failed, so this one never ran.
    DependencyFailed,
    /// The attempt budget is exhausted.
    TooManyTries,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::Error(cause) => write!(f, "error: {}", cause),
            FailReason::Expired => write!(f, "expired"),
            FailReason::Timeout => write!(f, "timeout"),
            FailReason::Cancelled => write!(f, "cancelled"),
            FailReason::DependencyFailed => write!(f, "dependency failed"),
            FailReason::TooManyTries => write!(f, "too many tries"),
        }
    }
}

/// What the engine should do with a job after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAction {
    /// Remove the envelope, reset it, and offer it to the queue again.
    /// The offer goes through the normal admission guards and may be
    /// declined, so a release is a request, not a guarantee.
    Release,
    /// Remove the envelope permanently.
    Drop,
}

/// Single-shot channel a job attempt resolves with its result.
///
/// Each attempt gets a fresh `Completion`. Dropping it without resolving
/// counts as a failed attempt.
pub struct Completion {
    tx: oneshot::Sender<JobResult>,
}

impl Completion {
    /// Create a completion and the receiver the engine waits on.
    ///
    /// Public so hosts can build custom adapters; inside the crate the
    /// execution unit creates one per attempt.
    pub fn channel() -> (Completion, oneshot::Receiver<JobResult>) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx }, rx)
    }

    pub fn resolve(self, result: JobResult) {
        // The receiver is gone once the unit stops caring (cancel, timeout).
        // A late resolution is then a no-op.
        let _ = self.tx.send(result);
    }

    pub fn success(self) {
        self.resolve(JobResult::Success);
    }

    pub fn failure(self, cause: Option<JobError>) {
        self.resolve(JobResult::Failure(cause));
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// Handle returned by [`Job::handle`] that stops in-flight work.
///
/// Invoking is idempotent: the underlying closure runs at most once no
/// matter how many paths (timeout, explicit cancel) reach it.
pub struct CancelHandle {
    inner: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelHandle {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        CancelHandle {
            inner: Some(Box::new(f)),
        }
    }

    /// Handle for jobs with nothing to stop.
    pub fn noop() -> Self {
        CancelHandle { inner: None }
    }

    pub fn invoke(&mut self) {
        if let Some(f) = self.inner.take() {
            f();
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.inner.is_some())
            .finish()
    }
}

/// A unit of work the scheduler can run, persist, and retry.
///
/// Implementations are plain data plus behavior: the policy accessors
/// describe how the engine should treat the job, `handle` starts one
/// attempt, and `payload`/the registry factory carry the job across a
/// store round trip.
pub trait Job: Send + Sync + 'static {
    /// Stable tag identifying this job type in the registry and the store.
    fn job_type(&self) -> &'static str;

    /// Serialize the job's own fields for persistence.
    fn payload(&self) -> Result<Vec<u8>, PayloadError>;

    /// Start one attempt. Resolve `completion` exactly once with the
    /// outcome and return a handle that stops the work if invoked.
    fn handle(&self, completion: Completion) -> CancelHandle;

    /// Total attempts allowed across the job's lifetime, releases included.
    fn max_tries(&self) -> u32 {
        1
    }

    /// Wall-clock budget in milliseconds for one admission of this job,
    /// covering every attempt it makes. Zero disables the timeout.
    fn timeout_ms(&self) -> u64 {
        120_000
    }

    /// Epoch-ms deadline after which no further retry begins. Checked only
    /// once at least one attempt has run.
    fn retry_until_ms(&self) -> Option<i64> {
        None
    }

    /// Epoch-ms instant after which the job is worthless and is discarded.
    fn expiration_ms(&self) -> Option<i64> {
        None
    }

    /// Epoch-ms instant before which the job would rather not run.
    /// Recorded on the envelope but not enforced by the engine.
    fn earliest_begin_ms(&self) -> Option<i64> {
        None
    }

    /// Whether to request an extended-execution grant so the attempt can
    /// outlive host suspension.
    fn continue_in_background(&self) -> bool {
        false
    }

    /// Called after the job succeeds, before its envelope is removed.
    fn job_did_succeed(&self) {}

    /// Called after the job fails terminally. The returned action decides
    /// whether the envelope is dropped or released back to the queue.
    fn job_did_fail(&self, reason: &FailReason) -> FailAction {
        let _ = reason;
        FailAction::Drop
    }
}
