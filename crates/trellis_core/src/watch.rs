//! Shared watch dispatch
//!
//! A component owns at most one low-level deep-observation subscription per
//! watched property; every call site that wants to observe that property
//! layers a logical wrapper on top of it instead of subscribing again. Each
//! wrapper carries its own filter (depth, origin, custom predicate) and its
//! own handler, and can be detached without touching its siblings.
//!
//! The registry never creates the low-level subscription itself - it assumes
//! the owner already installed one and routes that subscription's mutation
//! batches through [`WatchRegistry::dispatch`]. Dispatch is purely
//! synchronous filtering; a wrapper whose filter rejects the whole batch is
//! not called at all.

use crate::runtime::ComponentId;
use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::sync::Arc;

new_key_type! {
    /// Identity of one logical watcher wrapper
    pub struct WatcherId;
}

/// Interned property name
///
/// Property lookups during dispatch are integer-keyed; the registry interns
/// names once at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropId(u32);

/// Where a mutation originated relative to the watched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOrigin {
    /// Mutation of the instance's own data.
    Own,
    /// Mutation surfaced through inherited/shared defaults.
    Inherited,
}

/// What kind of mutation occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// A value was assigned at the path.
    Set,
    /// A sequence was spliced at the path.
    Splice,
}

/// One mutation record delivered by the deep-observation utility.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    /// Path segments from the subscription root to the mutated slot.
    pub path: SmallVec<[String; 4]>,
    pub origin: MutationOrigin,
    pub kind: MutationKind,
}

impl MutationRecord {
    pub fn set<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            origin: MutationOrigin::Own,
            kind: MutationKind::Set,
        }
    }

    pub fn splice<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            origin: MutationOrigin::Own,
            kind: MutationKind::Splice,
        }
    }

    pub fn inherited(mut self) -> Self {
        self.origin = MutationOrigin::Inherited;
        self
    }

    /// Nesting depth of the mutated slot below the subscription root.
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

/// Shape of the watched property's root value.
///
/// Determines how deep a "direct" mutation reaches: a dictionary root's own
/// entries sit at depth 1, anything else keeps its direct slots at depth 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Dictionary,
    Structured,
}

/// The watched property, as seen by the shared low-level subscription.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub name: String,
    pub kind: TargetKind,
}

impl WatchTarget {
    pub fn dictionary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TargetKind::Dictionary,
        }
    }

    pub fn structured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TargetKind::Structured,
        }
    }

    fn shallow_threshold(&self) -> usize {
        match self.kind {
            TargetKind::Dictionary => 1,
            TargetKind::Structured => 2,
        }
    }
}

/// Custom per-wrapper mutation predicate.
pub type WatchPredicate = Arc<dyn Fn(&MutationRecord) -> bool + Send + Sync>;

/// Per-wrapper filter options.
#[derive(Clone, Default)]
pub struct WatchOptions {
    /// Deliver mutations below the direct-property threshold.
    pub deep: bool,
    /// Deliver mutations that originated from inherited defaults.
    pub with_inherited: bool,
    /// Additional caller-supplied filter.
    pub predicate: Option<WatchPredicate>,
}

impl WatchOptions {
    pub fn shallow() -> Self {
        Self::default()
    }

    pub fn deep() -> Self {
        Self {
            deep: true,
            ..Self::default()
        }
    }

    pub fn with_inherited(mut self) -> Self {
        self.with_inherited = true;
        self
    }

    pub fn filtered(mut self, predicate: impl Fn(&MutationRecord) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

type WatchHandlerFn = Box<dyn FnMut(&[MutationRecord]) + Send>;

struct WatcherWrapper {
    options: WatchOptions,
    threshold: usize,
    handler: WatchHandlerFn,
}

impl WatcherWrapper {
    fn surviving(&self, records: &[MutationRecord]) -> Vec<MutationRecord> {
        records
            .iter()
            .filter(|r| {
                if !self.options.deep && r.depth() > self.threshold {
                    return false;
                }
                if !self.options.with_inherited && r.origin == MutationOrigin::Inherited {
                    return false;
                }
                if let Some(predicate) = &self.options.predicate {
                    if !predicate(r) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect()
    }
}

/// Disposer for one logical watcher, returned by [`WatchRegistry::attach`].
#[derive(Debug, Clone, Copy)]
pub struct WatcherHandle {
    context: ComponentId,
    prop: PropId,
    id: WatcherId,
}

/// Routes shared-subscription mutation batches to per-observer wrappers.
pub struct WatchRegistry {
    props: FxHashMap<String, PropId>,
    next_prop: u32,
    contexts: FxHashMap<ComponentId, FxHashMap<PropId, SlotMap<WatcherId, WatcherWrapper>>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self {
            props: FxHashMap::default(),
            next_prop: 0,
            contexts: FxHashMap::default(),
        }
    }

    /// Intern a property name.
    pub fn prop(&mut self, name: &str) -> PropId {
        if let Some(&prop) = self.props.get(name) {
            return prop;
        }
        let prop = PropId(self.next_prop);
        self.next_prop += 1;
        self.props.insert(name.to_string(), prop);
        prop
    }

    /// Attach one logical observer to an already-subscribed property.
    ///
    /// Creates the per-context entry lazily; never creates the low-level
    /// subscription itself.
    pub fn attach(
        &mut self,
        context: ComponentId,
        target: &WatchTarget,
        options: WatchOptions,
        handler: impl FnMut(&[MutationRecord]) + Send + 'static,
    ) -> WatcherHandle {
        let prop = self.prop(&target.name);
        let wrappers = self
            .contexts
            .entry(context)
            .or_default()
            .entry(prop)
            .or_insert_with(SlotMap::with_key);
        let id = wrappers.insert(WatcherWrapper {
            threshold: target.shallow_threshold(),
            options,
            handler: Box::new(handler),
        });
        WatcherHandle { context, prop, id }
    }

    /// Remove one wrapper. Siblings on the same property keep firing.
    pub fn detach(&mut self, handle: WatcherHandle) -> bool {
        let Some(props) = self.contexts.get_mut(&handle.context) else {
            return false;
        };
        let Some(wrappers) = props.get_mut(&handle.prop) else {
            return false;
        };
        wrappers.remove(handle.id).is_some()
    }

    /// Deliver a mutation batch from the shared low-level subscription.
    ///
    /// Each wrapper filters the batch independently and, when anything
    /// survives, receives the survivors packed as a single call.
    pub fn dispatch(&mut self, context: ComponentId, prop: PropId, records: &[MutationRecord]) {
        let Some(props) = self.contexts.get_mut(&context) else {
            return;
        };
        let Some(wrappers) = props.get_mut(&prop) else {
            return;
        };
        for (_, wrapper) in wrappers.iter_mut() {
            let surviving = wrapper.surviving(records);
            if !surviving.is_empty() {
                (wrapper.handler)(&surviving);
            }
        }
    }

    /// Dispatch by property name, for callers holding the raw name.
    pub fn dispatch_named(&mut self, context: ComponentId, name: &str, records: &[MutationRecord]) {
        if let Some(&prop) = self.props.get(name) {
            self.dispatch(context, prop, records);
        }
    }

    /// Drop every wrapper a component owns. Part of the component's overall
    /// resource-disposal routine, alongside tearing down the low-level
    /// subscriptions.
    pub fn remove_context(&mut self, context: ComponentId) {
        self.contexts.remove(&context);
    }

    /// Wrappers currently attached for a component.
    pub fn watcher_count(&self, context: ComponentId) -> usize {
        self.contexts
            .get(&context)
            .map_or(0, |props| props.values().map(SlotMap::len).sum())
    }
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
