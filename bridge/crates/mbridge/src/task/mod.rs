//! Cooperative Steps - resumable logic driven by update ticks
//!
//! Long-running logic is split into [`Step`]s. Each call to
//! [`Step::resume`] runs until the step yields or completes:
//!
//! ```text
//!   spawn ──> [waiting] ──(due)──> resume ──> Yielded(wait) ──> [waiting]
//!                 │                   │
//!                 │                   └──> Completed ──> dropped
//!                 └──(liveness token gone)──> dropped, never resumed
//! ```
//!
//! Cancellation is explicit: a step bound to a [`LivenessToken`] is dropped
//! at the next tick after every clone of the token is cancelled or dropped.
//! Whatever the step owns, guards included, is released with it.
//!
//! There are no timeouts. A step waiting on a predicate that never holds
//! stays pending forever.

pub mod scheduler;

pub use scheduler::{Scheduler, Spawner, TickReport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Identity of a spawned step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Condition for the next resumption
pub enum Wait {
    /// Resume on the next tick
    NextTick,
    /// Resume after this many ticks; 0 and 1 both mean the next tick
    Ticks(u64),
    /// Resume on the first tick where the predicate holds
    Until(Box<dyn FnMut() -> bool + Send>),
}

impl Wait {
    pub fn until(predicate: impl FnMut() -> bool + Send + 'static) -> Self {
        Wait::Until(Box::new(predicate))
    }
}

impl std::fmt::Debug for Wait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wait::NextTick => write!(f, "NextTick"),
            Wait::Ticks(n) => write!(f, "Ticks({})", n),
            Wait::Until(_) => write!(f, "Until(..)"),
        }
    }
}

/// Outcome of one resumption
#[derive(Debug)]
pub enum StepState {
    Yielded(Wait),
    Completed,
}

/// Per-resumption context
#[derive(Debug, Clone, Copy)]
pub struct StepContext {
    tick: u64,
    task: TaskId,
    resumptions: u64,
}

impl StepContext {
    pub(crate) fn new(tick: u64, task: TaskId, resumptions: u64) -> Self {
        Self {
            tick,
            task,
            resumptions,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Times this step was resumed before, this call excluded
    pub fn resumptions(&self) -> u64 {
        self.resumptions
    }
}

/// A resumable unit of work
pub trait Step: Send {
    fn resume(&mut self, cx: &mut StepContext) -> StepState;
}

impl<F> Step for F
where
    F: FnMut(&mut StepContext) -> StepState + Send,
{
    fn resume(&mut self, cx: &mut StepContext) -> StepState {
        self(cx)
    }
}

/// Liveness of the context that spawned a step
///
/// Clones share one flag. The step stops being resumed once the token is
/// cancelled or its last clone is dropped.
#[derive(Debug, Clone)]
pub struct LivenessToken {
    alive: Arc<AtomicBool>,
}

impl LivenessToken {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn cancel(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub(crate) fn watch(&self) -> LivenessWatch {
        LivenessWatch(Arc::downgrade(&self.alive))
    }
}

impl Default for LivenessToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler-side view of a [`LivenessToken`]
#[derive(Debug, Clone)]
pub(crate) struct LivenessWatch(Weak<AtomicBool>);

impl LivenessWatch {
    pub(crate) fn is_alive(&self) -> bool {
        self.0
            .upgrade()
            .map(|alive| alive.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}
