//! Trellis Runtime Core
//!
//! This crate provides the foundational primitives for the Trellis component
//! framework:
//!
//! - **Field Ordering**: weight-based initialization ordering for declared
//!   component fields under dependency constraints
//! - **Lifecycle Hooks**: dependency-gated callbacks per lifecycle stage,
//!   with mixed synchronous/deferred completion
//! - **Watch Dispatch**: many logical observers sharing one low-level
//!   change subscription per watched property
//! - **Render Scheduling**: a cooperative, time-sliced queue draining
//!   deferred render tasks without blocking the host thread
//!
//! Template compilation, directives, and the render engine that turns
//! virtual trees into real output are external collaborators; this crate is
//! the in-process core they plug into.
//!
//! # Example
//!
//! ```rust
//! use trellis_core::fields::{FieldDescriptor, FieldSchema};
//! use trellis_core::runtime::ComponentRuntime;
//!
//! let mut runtime = ComponentRuntime::new();
//!
//! let mut schema: FieldSchema<i32> = FieldSchema::new();
//! schema.declare("source", FieldDescriptor::new(1).atomic());
//! schema.declare("doubled", FieldDescriptor::new(0).after(["source"]).init(|| 2));
//!
//! let values = runtime.fields.instantiate(&schema).unwrap();
//! assert_eq!(values[0].0, "source");
//! ```

pub mod fields;
pub mod hooks;
pub mod runtime;
pub mod schedule;
pub mod watch;

pub use fields::{
    FieldDescriptor, FieldError, FieldSchema, FieldSorter, SchemaId, ATOMIC_TIER_WEIGHT,
};
pub use hooks::{
    deferred, Deferred, DeferredHandle, Hook, HookError, HookRegistry, HookResult, HookTag, Stage,
    StagePass, StageReport,
};
pub use runtime::{ComponentId, ComponentRuntime, RuntimeStats};
pub use schedule::{
    RenderHandle, RenderScheduler, RenderTask, TaskError, WakeCallback, TICK_BUDGET, TIME_WINDOW,
};
pub use watch::{
    MutationKind, MutationOrigin, MutationRecord, PropId, TargetKind, WatchOptions, WatchRegistry,
    WatchTarget, WatcherHandle, WatcherId,
};
