//! hopper is a persistent, retrying task scheduler.
//!
//! Callers register job types, open a [`Queue`] for a named connection,
//! and dispatch job values onto it. The engine wraps each job in an
//! [`Envelope`], persists it to a SlateDB-backed store, and runs it under
//! the job's own policy: attempt budget, execution time budget, expiration
//! and retry deadlines, and a drop-or-release decision on failure.
//! Envelopes still pending after a restart are recovered with
//! [`Queue::run`] once their job types are registered again.

pub mod codec;
pub mod connection;
pub mod envelope;
pub mod extend;
pub mod job;
pub mod keys;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod settings;
pub mod stats;
pub mod store;
pub mod trace;
pub mod unit;

pub use connection::{Connection, Mode, Priority};
pub use envelope::{Envelope, EnvelopeState};
pub use extend::{ExecutionExtender, ExtensionToken, MockExtender, NoopExtender};
pub use job::{
    CancelHandle, Completion, FailAction, FailReason, Job, JobError, JobResult, PayloadError,
};
pub use queue::Queue;
pub use registry::JobRegistry;
pub use settings::{Backend, LogFormat, QueueSettings, StoreConfig, StoreTemplate};
pub use stats::StatsSnapshot;
