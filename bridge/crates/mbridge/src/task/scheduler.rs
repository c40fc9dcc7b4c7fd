//! Tick-driven scheduler for cooperative steps

use super::{LivenessToken, LivenessWatch, Step, StepContext, StepState, TaskId, Wait};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct Submission {
    id: TaskId,
    step: Box<dyn Step>,
    watch: Option<LivenessWatch>,
}

struct Task {
    id: TaskId,
    step: Box<dyn Step>,
    watch: Option<LivenessWatch>,
    wait: Wait,
    /// Tick at which a `Ticks` wait expires
    wake_at: u64,
    resumptions: u64,
}

impl Task {
    fn is_due(&mut self, tick: u64) -> bool {
        match &mut self.wait {
            Wait::NextTick => true,
            Wait::Ticks(_) => tick >= self.wake_at,
            Wait::Until(predicate) => predicate(),
        }
    }
}

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Steps resumed this tick
    pub resumed: usize,
    /// Steps that completed this tick
    pub completed: usize,
    /// Steps dropped because their liveness token went away
    pub cancelled: usize,
    /// Steps still waiting after this tick
    pub pending: usize,
}

/// Submits steps to a [`Scheduler`] from any thread
#[derive(Clone)]
pub struct Spawner {
    tx: Sender<Submission>,
    next_id: Arc<AtomicU64>,
}

impl Spawner {
    fn submit(&self, step: Box<dyn Step>, watch: Option<LivenessWatch>) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if self.tx.send(Submission { id, step, watch }).is_err() {
            log::warn!("step {:?} submitted after its scheduler was dropped", id);
        }
        id
    }

    pub fn spawn(&self, step: impl Step + 'static) -> TaskId {
        self.submit(Box::new(step), None)
    }

    pub fn spawn_with(&self, step: impl Step + 'static, token: &LivenessToken) -> TaskId {
        self.submit(Box::new(step), Some(token.watch()))
    }
}

/// Resumes due steps once per [`tick`](Scheduler::tick)
///
/// Owned by the thread that drives update ticks. Steps run in spawn order.
///
/// # Examples
///
/// ```rust
/// use mbridge::task::{Scheduler, StepContext, StepState, Wait};
///
/// let mut scheduler = Scheduler::new();
/// let mut left = 3;
/// scheduler.spawn(move |_: &mut StepContext| {
///     left -= 1;
///     if left == 0 {
///         StepState::Completed
///     } else {
///         StepState::Yielded(Wait::NextTick)
///     }
/// });
///
/// assert_eq!(scheduler.tick().pending, 1);
/// assert_eq!(scheduler.tick().pending, 1);
/// assert_eq!(scheduler.tick().completed, 1);
/// assert!(scheduler.is_empty());
/// ```
pub struct Scheduler {
    tick: u64,
    tasks: Vec<Task>,
    rx: Receiver<Submission>,
    spawner: Spawner,
}

impl Scheduler {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tick: 0,
            tasks: Vec::new(),
            rx,
            spawner: Spawner {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
        }
    }

    /// Spawn a step; it first runs on the next tick
    pub fn spawn(&mut self, step: impl Step + 'static) -> TaskId {
        self.spawner.spawn(step)
    }

    /// Spawn a step bound to the liveness of `token`
    pub fn spawn_with(&mut self, step: impl Step + 'static, token: &LivenessToken) -> TaskId {
        self.spawner.spawn_with(step, token)
    }

    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    fn admit(&mut self) {
        for Submission { id, step, watch } in self.rx.try_iter() {
            self.tasks.push(Task {
                id,
                step,
                watch,
                wait: Wait::NextTick,
                wake_at: 0,
                resumptions: 0,
            });
        }
    }

    /// Advance one tick
    pub fn tick(&mut self) -> TickReport {
        self.admit();
        self.tick += 1;
        let tick = self.tick;

        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        let mut kept = Vec::with_capacity(self.tasks.len());
        for mut task in self.tasks.drain(..) {
            if task.watch.as_ref().is_some_and(|w| !w.is_alive()) {
                log::trace!("step {:?} cancelled", task.id);
                report.cancelled += 1;
                continue;
            }
            if !task.is_due(tick) {
                kept.push(task);
                continue;
            }

            let mut cx = StepContext::new(tick, task.id, task.resumptions);
            report.resumed += 1;
            task.resumptions += 1;
            match task.step.resume(&mut cx) {
                StepState::Completed => report.completed += 1,
                StepState::Yielded(wait) => {
                    if let Wait::Ticks(n) = wait {
                        task.wake_at = tick + n.max(1);
                    }
                    task.wait = wait;
                    kept.push(task);
                },
            }
        }
        self.tasks = kept;

        report.pending = self.tasks.len();
        report
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Admitted steps still waiting
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.rx.is_empty()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ticks_wait() {
        let mut scheduler = Scheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.spawn(move |cx: &mut StepContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            if cx.resumptions() == 0 {
                StepState::Yielded(Wait::Ticks(3))
            } else {
                StepState::Completed
            }
        });

        scheduler.tick(); // first run at tick 1, sleeps until tick 4
        scheduler.tick();
        scheduler.tick();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.tick().completed, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_until_predicate() {
        let mut scheduler = Scheduler::new();
        let flag = Arc::new(AtomicUsize::new(0));
        let watched = flag.clone();
        let mut waited = false;
        scheduler.spawn(move |_: &mut StepContext| {
            if waited {
                return StepState::Completed;
            }
            waited = true;
            let watched = watched.clone();
            StepState::Yielded(Wait::until(move || watched.load(Ordering::SeqCst) == 1))
        });

        scheduler.tick();
        assert_eq!(scheduler.tick().resumed, 0);
        flag.store(1, Ordering::SeqCst);
        assert_eq!(scheduler.tick().completed, 1);
    }

    #[test]
    fn test_cancelled_token_stops_resumption() {
        let mut scheduler = Scheduler::new();
        let token = LivenessToken::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        scheduler.spawn_with(
            move |_: &mut StepContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                StepState::Yielded(Wait::NextTick)
            },
            &token,
        );

        scheduler.tick();
        token.cancel();
        let report = scheduler.tick();
        assert_eq!(report.cancelled, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }
}
