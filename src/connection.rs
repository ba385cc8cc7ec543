use std::fmt;
use std::hash::{Hash, Hasher};

/// How many units a connection may execute at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One unit at a time.
    Serial,
    /// One unit at a time, and each unit's start additionally waits for the
    /// previous unit's outcome: a failure fails every later unit without
    /// running it.
    Blocking,
    /// Up to `max` units at once. `max == 0` means the machine's available
    /// parallelism.
    Concurrent { max: usize },
}

impl Mode {
    /// Permit count for the execution semaphore.
    pub(crate) fn max_parallel(&self) -> usize {
        match self {
            Mode::Serial | Mode::Blocking => 1,
            Mode::Concurrent { max } => {
                if *max > 0 {
                    *max
                } else {
                    default_parallelism()
                }
            }
        }
    }

    pub(crate) fn is_blocking(&self) -> bool {
        matches!(self, Mode::Blocking)
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Scheduling hint recorded on the connection. Advisory only; the engine
/// does not reorder work by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Default,
    Background,
}

/// Names a logical queue and how it should run.
///
/// Identity is the name alone: two connections with the same name reach the
/// same runner and the same store, even when their mode or priority differ.
/// The first open of a name decides the runner's mode.
#[derive(Debug, Clone)]
pub struct Connection {
    pub name: String,
    pub mode: Mode,
    pub priority: Priority,
}

impl Connection {
    /// Name used when callers don't pick one.
    pub const DEFAULT_NAME: &'static str = "hopper.default";

    pub fn new(name: impl Into<String>) -> Self {
        Connection {
            name: name.into(),
            mode: Mode::Serial,
            priority: Priority::Default,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for Connection {
    fn default() -> Self {
        Connection::new(Self::DEFAULT_NAME)
    }
}

// Equality and hashing deliberately ignore mode and priority: a connection
// is its name.
impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, mode: {:?}, priority: {:?}",
            self.name, self.mode, self.priority
        )
    }
}
