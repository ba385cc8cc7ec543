//! Extended-execution grants for suspension-prone hosts.
//!
//! Some hosts (mobile apps, serverless workers) can be suspended while a
//! job is mid-flight. A job that opts in with `continue_in_background`
//! makes the runner request a grant around its unit's whole execution, and
//! the host's extender can cancel the unit when the grant is about to
//! expire. Hosts without a suspension model plug in [`NoopExtender`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque identifier for one active grant, issued by the extender and
/// handed back exactly once when the unit's task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionToken(u64);

impl ExtensionToken {
    pub fn new(id: u64) -> Self {
        ExtensionToken(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Host hook that brackets a unit's execution with an extension grant.
pub trait ExecutionExtender: Send + Sync {
    /// Request extra run time. `on_expire` fires if the host decides the
    /// grant is ending early; the runner wires it to cancel the unit.
    /// Returning `None` means no grant is available right now, which is
    /// not an error: the unit proceeds without one.
    fn begin(&self, on_expire: Box<dyn FnOnce() + Send>) -> Option<ExtensionToken>;

    /// Release a previously issued grant.
    fn end(&self, token: ExtensionToken);
}

/// Extender for hosts without a suspension model; never issues a grant.
pub struct NoopExtender;

impl NoopExtender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Default for NoopExtender {
    fn default() -> Self {
        Self
    }
}

impl ExecutionExtender for NoopExtender {
    fn begin(&self, _on_expire: Box<dyn FnOnce() + Send>) -> Option<ExtensionToken> {
        None
    }

    fn end(&self, _token: ExtensionToken) {}
}

/// In-memory extender that records grant traffic and can fire expirations
/// on demand (useful for testing suspension behavior).
pub struct MockExtender {
    granting: AtomicBool,
    next_token: AtomicU64,
    begin_count: AtomicU64,
    end_count: AtomicU64,
    pending: Mutex<HashMap<u64, Box<dyn FnOnce() + Send>>>,
}

impl MockExtender {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(MockExtender {
            granting: AtomicBool::new(true),
            next_token: AtomicU64::new(1),
            begin_count: AtomicU64::new(0),
            end_count: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// An extender that always declines, like a host out of background budget.
    pub fn declining_arc() -> Arc<Self> {
        let mock = Self::new_arc();
        mock.granting.store(false, Ordering::SeqCst);
        mock
    }

    pub fn begin_count(&self) -> u64 {
        self.begin_count.load(Ordering::SeqCst)
    }

    pub fn end_count(&self) -> u64 {
        self.end_count.load(Ordering::SeqCst)
    }

    /// Grants issued but not yet ended.
    pub fn outstanding(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Fire every outstanding grant's expiration callback, simulating the
    /// host reclaiming its background budget.
    pub fn expire_all(&self) {
        let callbacks: Vec<_> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, cb)| cb).collect()
        };
        for cb in callbacks {
            cb();
        }
    }
}

impl ExecutionExtender for MockExtender {
    fn begin(&self, on_expire: Box<dyn FnOnce() + Send>) -> Option<ExtensionToken> {
        self.begin_count.fetch_add(1, Ordering::SeqCst);
        if !self.granting.load(Ordering::SeqCst) {
            return None;
        }
        let id = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().insert(id, on_expire);
        Some(ExtensionToken::new(id))
    }

    fn end(&self, token: ExtensionToken) {
        self.end_count.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().remove(&token.id());
    }
}
