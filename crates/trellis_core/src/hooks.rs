//! Lifecycle hooks
//!
//! Components move through named lifecycle stages ([`Stage`]); each stage
//! carries a set of registered callbacks. Within one stage, hooks form a
//! dependency DAG: a hook may declare `after` tags and only becomes eligible
//! once every one of those tags has been emitted by an earlier hook in the
//! same pass.
//!
//! Hooks are synchronous by default. A hook that needs to finish later
//! returns [`HookResult::Pending`] with a [`Deferred`]; its dependents stay
//! suspended until the matching [`DeferredHandle`] is resolved, at which
//! point they run in that settlement turn. A pass with no pending hooks
//! settles before [`HookRegistry::run`] returns, so callers can branch on
//! completion without any artificial wrapping.
//!
//! ```ignore
//! use trellis_core::hooks::{Hook, HookRegistry, HookResult, Stage};
//!
//! let mut hooks: HookRegistry<MyComponent> = HookRegistry::new();
//! let attached = hooks.tag("attached");
//!
//! hooks.register(
//!     Hook::on(Stage::Mount, |c: &mut MyComponent| {
//!         c.attach();
//!         HookResult::ok()
//!     })
//!     .tagged(attached),
//! );
//! hooks.register(
//!     Hook::on(Stage::Mount, |c: &mut MyComponent| {
//!         c.focus(); // only after attach
//!         HookResult::ok()
//!     })
//!     .after([attached]),
//! );
//!
//! let pass = hooks.run(Stage::Mount, component);
//! assert!(pass.is_settled());
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Lifecycle transition points fired by the surrounding lifecycle driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Construction,
    PreRender,
    Mount,
    Update,
    PreTeardown,
    Teardown,
    Error,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Construction => "construction",
            Stage::PreRender => "pre-render",
            Stage::Mount => "mount",
            Stage::Update => "update",
            Stage::PreTeardown => "pre-teardown",
            Stage::Teardown => "teardown",
            Stage::Error => "error",
        }
    }
}

/// Interned hook identifier other hooks can depend on via `after`.
///
/// Tags are interned by the registry ([`HookRegistry::tag`]); dependency
/// checks are integer comparisons, never string lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookTag(u32);

/// A hook callback's own failure.
///
/// Never swallowed by the scheduler: collected into the pass report for the
/// lifecycle driver. A failed hook does not emit its tag, so its dependents
/// never run; unrelated hooks are unaffected.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What a hook callback produced: settled in the same turn, or pending.
pub enum HookResult {
    /// The hook finished synchronously; its tag (if any) is emitted in the
    /// same turn on `Ok`.
    Settled(Result<(), HookError>),
    /// The hook will settle later, when its [`DeferredHandle`] resolves.
    Pending(Deferred),
}

impl HookResult {
    pub fn ok() -> Self {
        HookResult::Settled(Ok(()))
    }

    pub fn err(error: HookError) -> Self {
        HookResult::Settled(Err(error))
    }
}

struct DeferredInner {
    outcome: Option<Result<(), HookError>>,
    waiter: Option<Box<dyn FnOnce(Result<(), HookError>) + Send>>,
}

/// The pending half of a deferred hook completion, returned from the hook.
pub struct Deferred {
    inner: Arc<Mutex<DeferredInner>>,
}

/// The resolving half of a deferred hook completion.
///
/// Single-use: resolving consumes the handle, so a hook cannot settle twice.
pub struct DeferredHandle {
    inner: Arc<Mutex<DeferredInner>>,
}

/// Create a deferred completion pair. The hook returns the [`Deferred`] via
/// [`HookResult::Pending`] and hands the [`DeferredHandle`] to whatever will
/// finish the work.
pub fn deferred() -> (Deferred, DeferredHandle) {
    let inner = Arc::new(Mutex::new(DeferredInner {
        outcome: None,
        waiter: None,
    }));
    (
        Deferred {
            inner: Arc::clone(&inner),
        },
        DeferredHandle { inner },
    )
}

impl Deferred {
    /// Install the settlement continuation. Runs immediately if the handle
    /// already resolved.
    fn on_settle(self, f: impl FnOnce(Result<(), HookError>) + Send + 'static) {
        let ready = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    inner.waiter = Some(Box::new(f));
                    return;
                }
            }
        };
        if let Some(outcome) = ready {
            f(outcome);
        }
    }
}

impl DeferredHandle {
    /// Settle the hook. Dependents of the hook's tag are unblocked in this
    /// turn on `Ok`; on `Err` the error joins the pass report and the tag is
    /// never emitted.
    pub fn resolve(self, outcome: Result<(), HookError>) {
        let waiter = {
            let mut inner = self.inner.lock().unwrap();
            inner.outcome = Some(outcome.clone());
            inner.waiter.take()
        };
        if let Some(waiter) = waiter {
            waiter(outcome);
        }
    }
}

/// Hook callback signature. Receives the stage context supplied to
/// [`HookRegistry::run`].
pub type HookFn<C> = Box<dyn FnMut(&mut C) -> HookResult + Send>;

/// One lifecycle callback bound to a stage, built with the `Hook::on`
/// builder.
pub struct Hook<C> {
    stage: Stage,
    after: SmallVec<[HookTag; 2]>,
    tag: Option<HookTag>,
    once: bool,
    run: HookFn<C>,
}

impl<C> Hook<C> {
    /// A hook with no dependencies that runs as soon as `stage` starts.
    pub fn on(stage: Stage, run: impl FnMut(&mut C) -> HookResult + Send + 'static) -> Self {
        Self {
            stage,
            after: SmallVec::new(),
            tag: None,
            once: false,
            run: Box::new(run),
        }
    }

    /// Give the hook a tag other hooks can depend on.
    pub fn tagged(mut self, tag: HookTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Require these tags to have been emitted before this hook runs.
    ///
    /// Tags that are never emitted in a pass leave the hook ineligible; it
    /// is counted as skipped when the pass settles.
    pub fn after(mut self, tags: impl IntoIterator<Item = HookTag>) -> Self {
        self.after.extend(tags);
        self
    }

    /// Remove the hook from the registry the first time its stage fires.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

struct HookEntry<C> {
    after: SmallVec<[HookTag; 2]>,
    tag: Option<HookTag>,
    once: bool,
    run: Arc<Mutex<HookFn<C>>>,
}

impl<C> Clone for HookEntry<C> {
    fn clone(&self) -> Self {
        Self {
            after: self.after.clone(),
            tag: self.tag,
            once: self.once,
            run: Arc::clone(&self.run),
        }
    }
}

/// Per-component-type hook registry: intern table for tags plus the hook
/// lists per stage.
pub struct HookRegistry<C> {
    stages: FxHashMap<Stage, Vec<HookEntry<C>>>,
    tags: FxHashMap<String, HookTag>,
    next_tag: u32,
}

impl<C: Send + 'static> HookRegistry<C> {
    pub fn new() -> Self {
        Self {
            stages: FxHashMap::default(),
            tags: FxHashMap::default(),
            next_tag: 0,
        }
    }

    /// Intern a tag name. The same name always yields the same tag; a tag
    /// may be referenced in `after` without any hook ever emitting it.
    pub fn tag(&mut self, name: &str) -> HookTag {
        if let Some(&tag) = self.tags.get(name) {
            return tag;
        }
        let tag = HookTag(self.next_tag);
        self.next_tag += 1;
        self.tags.insert(name.to_string(), tag);
        tag
    }

    pub fn register(&mut self, hook: Hook<C>) {
        self.stages.entry(hook.stage).or_default().push(HookEntry {
            after: hook.after,
            tag: hook.tag,
            once: hook.once,
            run: Arc::new(Mutex::new(hook.run)),
        });
    }

    /// Hooks currently registered for a stage.
    pub fn hook_count(&self, stage: Stage) -> usize {
        self.stages.get(&stage).map_or(0, Vec::len)
    }

    /// Execute one lifecycle transition.
    ///
    /// Hooks run in dependency order; `once` hooks are pruned from the
    /// registry before any callback fires. The returned pass is already
    /// settled if nothing in it was pending.
    pub fn run(&mut self, stage: Stage, ctx: C) -> StagePass<C> {
        let entries: Vec<HookEntry<C>> = match self.stages.get_mut(&stage) {
            Some(hooks) => {
                let entries = hooks.clone();
                hooks.retain(|h| !h.once);
                entries
            }
            None => Vec::new(),
        };

        tracing::debug!(stage = stage.name(), hooks = entries.len(), "stage pass");

        let inner = Arc::new(Mutex::new(PassInner {
            ctx: Some(ctx),
            waiting: entries,
            emitted: FxHashSet::default(),
            in_flight: 0,
            ran: 0,
            skipped: 0,
            errors: Vec::new(),
            settled: false,
            driving: false,
        }));
        drive(&inner);
        StagePass { inner }
    }
}

impl<C: Send + 'static> Default for HookRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

struct PassInner<C> {
    ctx: Option<C>,
    waiting: Vec<HookEntry<C>>,
    emitted: FxHashSet<HookTag>,
    in_flight: usize,
    ran: usize,
    skipped: usize,
    errors: Vec<HookError>,
    settled: bool,
    driving: bool,
}

/// Handle to one lifecycle transition in progress.
///
/// Settles synchronously inside [`HookRegistry::run`] when no hook was
/// pending; otherwise settles in the turn that resolves the last outstanding
/// [`DeferredHandle`].
pub struct StagePass<C> {
    inner: Arc<Mutex<PassInner<C>>>,
}

impl<C> StagePass<C> {
    pub fn is_settled(&self) -> bool {
        self.inner.lock().unwrap().settled
    }

    /// Snapshot of the pass: hooks ran, hooks left ineligible, collected
    /// errors. The caller (lifecycle driver) decides what to do with the
    /// errors; the scheduler never swallows or rethrows them.
    pub fn report(&self) -> StageReport {
        let inner = self.inner.lock().unwrap();
        StageReport {
            settled: inner.settled,
            ran: inner.ran,
            skipped: inner.skipped,
            errors: inner.errors.clone(),
        }
    }

    /// Reclaim the stage context once the pass has settled.
    pub fn take_context(&self) -> Option<C> {
        let mut inner = self.inner.lock().unwrap();
        if inner.settled {
            inner.ctx.take()
        } else {
            None
        }
    }
}

/// Outcome summary of a stage pass.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub settled: bool,
    pub ran: usize,
    pub skipped: usize,
    pub errors: Vec<HookError>,
}

/// Run every currently-eligible hook, then either settle the pass or leave
/// it to the next deferred resolution.
///
/// Re-entrant calls while a hook body is executing (a hook resolving some
/// other deferred synchronously) bail out on the `driving` flag; the active
/// loop picks up whatever they emitted.
fn drive<C: Send + 'static>(inner_arc: &Arc<Mutex<PassInner<C>>>) {
    loop {
        let (entry, mut ctx) = {
            let mut inner = inner_arc.lock().unwrap();
            if inner.settled || inner.driving {
                return;
            }
            let eligible = inner
                .waiting
                .iter()
                .position(|h| h.after.iter().all(|t| inner.emitted.contains(t)));
            match eligible {
                Some(index) => {
                    let entry = inner.waiting.remove(index);
                    // Invariant: the context is only ever taken while a turn
                    // is driving, and `driving` was checked above.
                    let ctx = match inner.ctx.take() {
                        Some(ctx) => ctx,
                        None => {
                            debug_assert!(false, "stage context missing outside a driving turn");
                            inner.waiting.insert(index, entry);
                            return;
                        }
                    };
                    inner.driving = true;
                    (entry, ctx)
                }
                None => {
                    if inner.in_flight == 0 {
                        inner.skipped += inner.waiting.len();
                        inner.waiting.clear();
                        inner.settled = true;
                    }
                    return;
                }
            }
        };

        // Lock order: the hook closure's own mutex is only ever taken here,
        // with the pass lock released.
        let result = (entry.run.lock().unwrap())(&mut ctx);

        let pending = {
            let mut inner = inner_arc.lock().unwrap();
            inner.ctx = Some(ctx);
            inner.driving = false;
            inner.ran += 1;
            match result {
                HookResult::Settled(Ok(())) => {
                    if let Some(tag) = entry.tag {
                        inner.emitted.insert(tag);
                    }
                    None
                }
                HookResult::Settled(Err(error)) => {
                    inner.errors.push(error);
                    None
                }
                HookResult::Pending(deferred) => {
                    inner.in_flight += 1;
                    Some(deferred)
                }
            }
        };

        if let Some(deferred) = pending {
            let pass = Arc::clone(inner_arc);
            let tag = entry.tag;
            deferred.on_settle(move |outcome| {
                {
                    let mut inner = pass.lock().unwrap();
                    inner.in_flight -= 1;
                    match outcome {
                        Ok(()) => {
                            if let Some(tag) = tag {
                                inner.emitted.insert(tag);
                            }
                        }
                        Err(error) => inner.errors.push(error),
                    }
                }
                drive(&pass);
            });
        }
    }
}
