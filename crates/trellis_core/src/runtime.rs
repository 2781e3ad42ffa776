//! Trellis Runtime
//!
//! The composition root that owns the long-lived runtime services: the field
//! sorter cache, the watch dispatch registry, and the shared render
//! scheduler. Hook registries stay with their component types (they are
//! generic over the component's context) and are not erased into the
//! runtime.

use crate::fields::FieldSorter;
use crate::schedule::{RenderHandle, RenderScheduler};
use crate::watch::WatchRegistry;
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Unique identifier for a live component instance
    pub struct ComponentId;
}

/// The component runtime - owns field ordering, watch dispatch, and render
/// scheduling for every component in the application.
pub struct ComponentRuntime {
    pub fields: FieldSorter,
    pub watch: WatchRegistry,
    pub render: RenderScheduler,
    components: SlotMap<ComponentId, ()>,
}

impl ComponentRuntime {
    pub fn new() -> Self {
        Self {
            fields: FieldSorter::new(),
            watch: WatchRegistry::new(),
            render: RenderScheduler::new(),
            components: SlotMap::with_key(),
        }
    }

    /// Allocate an identity for a newly constructed component instance.
    pub fn create_component(&mut self) -> ComponentId {
        self.components.insert(())
    }

    /// Tear a component down: drops its watch wrappers. The owner is
    /// responsible for cancelling any render tasks it enqueued.
    pub fn destroy_component(&mut self, id: ComponentId) {
        if self.components.remove(id).is_some() {
            self.watch.remove_context(id);
        }
    }

    pub fn is_live(&self, id: ComponentId) -> bool {
        self.components.contains_key(id)
    }

    /// Handle for collaborators that enqueue render work.
    pub fn render_handle(&self) -> RenderHandle {
        self.render.handle()
    }

    /// Get statistics about the runtime
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            component_count: self.components.len(),
            cached_schemas: self.fields.cached_schemas(),
            pending_render_tasks: self.render.pending_tasks(),
        }
    }
}

impl Default for ComponentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the runtime
#[derive(Debug, Clone)]
pub struct RuntimeStats {
    pub component_count: usize,
    pub cached_schemas: usize,
    pub pending_render_tasks: usize,
}
