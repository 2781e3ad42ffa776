//! Cooperative render scheduling
//!
//! The templating layer defers rendering work (large lists, incremental
//! hydration) as [`RenderTask`]s; the [`RenderScheduler`] drains them in
//! bounded chunks so the host thread is never blocked by an arbitrarily
//! large backlog. A task's callback returns `Ok(true)` when done and
//! `Ok(false)` to stay queued for a later slice, so one logical task may run
//! across many slices.
//!
//! Each drain pass has a weight budget ([`TICK_BUDGET`]) and a wall-clock
//! window ([`TIME_WINDOW`]); exhausting either yields control back to the
//! host until the window elapses. A slice that starts fresh always admits
//! its first task regardless of weight, so an expensive task can never be
//! starved by a stream of cheap ones.
//!
//! The scheduler is one shared instance constructed at application start and
//! handed to collaborators through [`RenderHandle`], the same way the rest of
//! the runtime shares long-lived services. The host pumps it:
//!
//! ```ignore
//! use trellis_core::schedule::{RenderScheduler, RenderTask};
//!
//! let scheduler = RenderScheduler::new();
//! let handle = scheduler.handle();
//!
//! handle.enqueue(RenderTask::new(|| Ok(render_next_chunk())).with_weight(3));
//!
//! // Host event loop, once per macrotask:
//! while scheduler.tick() {
//!     wait_until(scheduler.next_resume_at());
//! }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Weight units one drain slice may consume before yielding.
pub const TICK_BUDGET: u32 = 10;

/// Wall-clock span one drain slice may occupy, and the pause between slices.
pub const TIME_WINDOW: Duration = Duration::from_millis(40);

/// A render task's own failure.
///
/// Caught per task and logged; never fatal to the scheduler or to sibling
/// tasks. The failing task is dropped un-completed and is not retried unless
/// the owner re-enqueues it.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskError(String);

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Render task callback: `Ok(true)` = complete, `Ok(false)` = retry in a
/// later slice.
pub type TaskFn = Box<dyn FnMut() -> Result<bool, TaskError> + Send>;

/// One deferred, resumable unit of rendering work.
pub struct RenderTask {
    run: TaskFn,
    weight: u32,
}

impl RenderTask {
    pub fn new(run: impl FnMut() -> Result<bool, TaskError> + Send + 'static) -> Self {
        Self {
            run: Box::new(run),
            weight: 1,
        }
    }

    /// Relative cost against the slice budget. Clamped to at least 1.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }
}

/// Drain progress across host macrotasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainState {
    /// Queue empty, nothing armed.
    Idle,
    /// Work queued; the next pump drains without waiting.
    Due,
    /// A drain pass is executing.
    Running,
    /// Budget or window exhausted; draining resumes once `resume_at` passes.
    Yielded { resume_at: Instant },
}

/// Callback fired when a task arrives into an idle scheduler, so the host
/// can wake its event loop and pump again.
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

struct SchedulerInner {
    queue: VecDeque<RenderTask>,
    state: DrainState,
    tick_budget: u32,
    time_window: Duration,
    wake: Option<WakeCallback>,
}

/// The shared render-task queue and its drain state machine.
///
/// Held by the application context; collaborators get a [`RenderHandle`].
#[derive(Clone)]
pub struct RenderScheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl RenderScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner {
                queue: VecDeque::new(),
                state: DrainState::Idle,
                tick_budget: TICK_BUDGET,
                time_window: TIME_WINDOW,
                wake: None,
            })),
        }
    }

    /// Register the host wake callback.
    pub fn set_wake_callback<F>(&self, wake: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().wake = Some(Arc::new(wake));
    }

    pub fn set_tick_budget(&self, budget: u32) {
        self.inner.lock().unwrap().tick_budget = budget.max(1);
    }

    pub fn set_time_window(&self, window: Duration) {
        self.inner.lock().unwrap().time_window = window;
    }

    /// Get a weak handle for collaborators that enqueue work.
    pub fn handle(&self) -> RenderHandle {
        RenderHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Append a task. FIFO; tasks are attempted in insertion order.
    pub fn enqueue(&self, task: RenderTask) {
        enqueue_into(&self.inner, task);
    }

    /// Pump the scheduler: run at most one drain pass.
    ///
    /// Returns `true` while tasks remain queued (the host should keep
    /// pumping, ideally not before [`Self::next_resume_at`]).
    pub fn tick(&self) -> bool {
        let now = Instant::now();
        let drain = {
            let inner = self.inner.lock().unwrap();
            match inner.state {
                DrainState::Idle => return false,
                DrainState::Due => true,
                DrainState::Running => return true,
                DrainState::Yielded { resume_at } => now >= resume_at,
            }
        };
        if drain {
            self.drain_pass(now)
        } else {
            true
        }
    }

    /// Cancel any pending resume deadline and drain synchronously.
    ///
    /// Calling this from inside a task body does not recurse into a nested
    /// pass; it marks the scheduler due instead, like
    /// [`Self::defer_restart`].
    pub fn restart(&self) -> bool {
        let drain = {
            let mut inner = self.inner.lock().unwrap();
            if inner.queue.is_empty() && inner.state != DrainState::Running {
                inner.state = DrainState::Idle;
                return false;
            }
            if inner.state == DrainState::Running {
                inner.state = DrainState::Due;
                false
            } else {
                true
            }
        };
        if drain {
            self.drain_pass(Instant::now())
        } else {
            true
        }
    }

    /// Cancel any pending resume deadline; the next pump drains immediately.
    ///
    /// For callers that are themselves inside a drain pass and must not
    /// re-enter it from the current call stack.
    pub fn defer_restart(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.is_empty() && inner.state != DrainState::Running {
            inner.state = DrainState::Idle;
        } else {
            inner.state = DrainState::Due;
        }
    }

    /// Tasks currently queued.
    pub fn pending_tasks(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().unwrap().state == DrainState::Idle
    }

    /// When a yielded scheduler becomes due again.
    pub fn next_resume_at(&self) -> Option<Instant> {
        match self.inner.lock().unwrap().state {
            DrainState::Yielded { resume_at } => Some(resume_at),
            _ => None,
        }
    }

    /// One drain pass. Tasks run with the queue lock released, so a task may
    /// enqueue more work; appends are picked up by the same pass.
    fn drain_pass(&self, window_start: Instant) -> bool {
        let mut budget = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = DrainState::Running;
            inner.tick_budget as i64
        };

        let mut pos = 0usize;
        loop {
            let mut task = {
                let mut inner = self.inner.lock().unwrap();
                if pos >= inner.queue.len() {
                    return finish_pass(&mut inner);
                }
                if budget <= 0 || window_start.elapsed() > inner.time_window {
                    let remaining = inner.queue.len();
                    if inner.state != DrainState::Due {
                        inner.state = DrainState::Yielded {
                            resume_at: Instant::now() + inner.time_window,
                        };
                    }
                    tracing::debug!(remaining, "render pass yielded");
                    return true;
                }
                let weight = inner.queue[pos].weight as i64;
                // A fresh slice always admits its first task, whatever its
                // weight; only a partially-spent slice skips over-budget work.
                if budget - weight < 0 && budget != inner.tick_budget as i64 {
                    pos += 1;
                    continue;
                }
                inner.queue.remove(pos).expect("drain position in range")
            };

            let weight = task.weight as i64;
            let guard = UnwindGuard { inner: &self.inner };
            let result = (task.run)();
            std::mem::forget(guard);

            let mut inner = self.inner.lock().unwrap();
            match result {
                Ok(true) => budget -= weight,
                Ok(false) => {
                    inner.queue.insert(pos, task);
                    pos += 1;
                }
                Err(error) => {
                    tracing::warn!(%error, "render task failed; dropped without completing");
                }
            }
        }
    }
}

/// Restores a drainable state if a task body unwinds. Without it a panicking
/// task would leave the scheduler in `Running` and every later pump would
/// report progress without ever draining.
struct UnwindGuard<'a> {
    inner: &'a Mutex<SchedulerInner>,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = if inner.queue.is_empty() {
                DrainState::Idle
            } else {
                DrainState::Due
            };
        }
    }
}

fn finish_pass(inner: &mut SchedulerInner) -> bool {
    if inner.queue.is_empty() {
        inner.state = DrainState::Idle;
        false
    } else if inner.state == DrainState::Due {
        // A restart arrived mid-pass; stay due so the next pump drains.
        true
    } else {
        inner.state = DrainState::Yielded {
            resume_at: Instant::now() + inner.time_window,
        };
        true
    }
}

fn enqueue_into(inner: &Mutex<SchedulerInner>, task: RenderTask) {
    let wake = {
        let mut inner = inner.lock().unwrap();
        inner.queue.push_back(task);
        if inner.state == DrainState::Idle {
            inner.state = DrainState::Due;
            inner.wake.clone()
        } else {
            None
        }
    };
    if let Some(wake) = wake {
        wake();
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak handle to the render scheduler.
///
/// Passed to components and the templating layer; won't keep the scheduler
/// alive, and all operations no-op once it is gone.
#[derive(Clone)]
pub struct RenderHandle {
    inner: Weak<Mutex<SchedulerInner>>,
}

impl RenderHandle {
    /// Enqueue a task. Returns `false` if the scheduler is gone.
    pub fn enqueue(&self, task: RenderTask) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                enqueue_into(&inner, task);
                true
            }
            None => false,
        }
    }

    /// See [`RenderScheduler::defer_restart`].
    pub fn defer_restart(&self) {
        if let Some(inner) = self.inner.upgrade() {
            RenderScheduler { inner }.defer_restart();
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.inner
            .upgrade()
            .map_or(0, |inner| inner.lock().unwrap().queue.len())
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}
