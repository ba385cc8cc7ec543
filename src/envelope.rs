use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use uuid::Uuid;

use crate::job::{CancelHandle, Completion, FailAction, FailReason, Job, PayloadError};
use crate::store::now_epoch_ms;

/// Persistence lifecycle of an envelope, independent of any running unit.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize, PartialEq, Eq, Copy)]
#[archive(check_bytes)]
pub enum EnvelopeState {
    Created,
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl EnvelopeState {
    /// States the admission guard accepts. Terminal envelopes found in the
    /// store (a crash between finishing and removal) are skipped.
    pub fn is_enqueueable(&self) -> bool {
        matches!(
            self,
            EnvelopeState::Created | EnvelopeState::Queued | EnvelopeState::Running
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvelopeState::Succeeded | EnvelopeState::Failed)
    }
}

/// Persistent wrapper around one dispatched job.
///
/// The envelope owns the job value and the durable bookkeeping the store
/// round-trips: id, type tag, attempt count, and lifecycle state. Identity
/// is the id alone; two envelopes with the same id are the same envelope.
pub struct Envelope {
    id: String,
    job_type: String,
    job: Box<dyn Job>,
    tries: AtomicU32,
    state: Mutex<EnvelopeState>,
    created_at_ms: i64,
}

impl Envelope {
    /// Wrap a freshly dispatched job. The id is a new v4 uuid.
    pub fn new(job: Box<dyn Job>) -> Self {
        let job_type = job.job_type().to_string();
        Envelope {
            id: Uuid::new_v4().to_string(),
            job_type,
            job,
            tries: AtomicU32::new(0),
            state: Mutex::new(EnvelopeState::Created),
            created_at_ms: now_epoch_ms(),
        }
    }

    /// Rebuild an envelope from its stored parts.
    pub fn from_parts(
        id: String,
        job_type: String,
        job: Box<dyn Job>,
        tries: u32,
        state: EnvelopeState,
        created_at_ms: i64,
    ) -> Self {
        Envelope {
            id,
            job_type,
            job,
            tries: AtomicU32::new(tries),
            state: Mutex::new(state),
            created_at_ms,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn tries(&self) -> u32 {
        self.tries.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_tries(&self) -> u32 {
        self.tries.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn state(&self) -> EnvelopeState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: EnvelopeState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Return the envelope to `Created` so it can be offered again.
    /// The attempt count survives: max-tries bounds total attempts across
    /// releases, and the admission guard retires the envelope once it is
    /// spent.
    pub(crate) fn reset(&self) {
        self.set_state(EnvelopeState::Created);
    }

    pub fn payload(&self) -> Result<Vec<u8>, PayloadError> {
        self.job.payload()
    }

    // Policy accessors delegate to the wrapped job.

    pub fn max_tries(&self) -> u32 {
        self.job.max_tries()
    }

    pub fn timeout_ms(&self) -> u64 {
        self.job.timeout_ms()
    }

    pub fn retry_until_ms(&self) -> Option<i64> {
        self.job.retry_until_ms()
    }

    pub fn expiration_ms(&self) -> Option<i64> {
        self.job.expiration_ms()
    }

    pub fn earliest_begin_ms(&self) -> Option<i64> {
        self.job.earliest_begin_ms()
    }

    pub fn continue_in_background(&self) -> bool {
        self.job.continue_in_background()
    }

    pub(crate) fn handle(&self, completion: Completion) -> CancelHandle {
        self.job.handle(completion)
    }

    pub(crate) fn job_did_succeed(&self) {
        self.job.job_did_succeed();
    }

    pub(crate) fn job_did_fail(&self, reason: &FailReason) -> FailAction {
        self.job.job_did_fail(reason)
    }
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Envelope {}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("job_type", &self.job_type)
            .field("tries", &self.tries())
            .field("state", &self.state())
            .finish()
    }
}
