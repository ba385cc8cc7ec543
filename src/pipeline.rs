//! Adapter from async pipelines to the job completion contract.
//!
//! A job whose work is already a future can hand that future to [`drive`]
//! inside its `handle` and get the completion bookkeeping for free: the
//! first terminal result resolves the completion, and the returned cancel
//! handle aborts the spawned task.

use std::future::Future;

use crate::job::{CancelHandle, Completion, JobError};

/// Run `future` as one job attempt.
///
/// The future's output becomes the attempt result; an aborted task simply
/// drops the completion, which the engine counts as a failed attempt.
pub fn drive<F>(future: F, completion: Completion) -> CancelHandle
where
    F: Future<Output = Result<(), JobError>> + Send + 'static,
{
    let task = tokio::spawn(async move {
        match future.await {
            Ok(()) => completion.success(),
            Err(cause) => completion.failure(Some(cause)),
        }
    });
    let abort = task.abort_handle();
    CancelHandle::new(move || abort.abort())
}
