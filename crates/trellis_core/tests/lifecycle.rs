//! End-to-end component flow: field initialization, lifecycle stages,
//! watch dispatch, and chunked render scheduling working together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use trellis_core::fields::{FieldDescriptor, FieldSchema};
use trellis_core::hooks::{deferred, DeferredHandle, Hook, HookRegistry, HookResult, Stage};
use trellis_core::runtime::ComponentRuntime;
use trellis_core::schedule::RenderTask;
use trellis_core::watch::{MutationRecord, WatchOptions, WatchTarget};

/// Stand-in for a component instance: ordered field values plus an event log.
struct ListComponent {
    fields: Vec<(String, i64)>,
    log: Vec<String>,
}

#[test]
fn component_lifecycle_end_to_end() {
    let mut runtime = ComponentRuntime::new();
    let id = runtime.create_component();

    // --- construction: fields initialize in dependency order ---
    let mut schema: FieldSchema<i64> = FieldSchema::new();
    schema.declare("items", FieldDescriptor::new(0).after(["source"]).init(|| 12));
    schema.declare("source", FieldDescriptor::new(3).atomic());
    schema.declare("page_size", FieldDescriptor::new(4).atomic());

    let fields = runtime.fields.instantiate(&schema).unwrap();
    let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["source", "page_size", "items"]);

    let component = ListComponent {
        fields,
        log: Vec::new(),
    };

    // --- lifecycle: mount hooks with a deferred data load ---
    let mut hooks: HookRegistry<ListComponent> = HookRegistry::new();
    let data_ready = hooks.tag("data-ready");

    let pending: Arc<Mutex<Option<DeferredHandle>>> = Arc::new(Mutex::new(None));
    let stash = Arc::clone(&pending);
    hooks.register(
        Hook::on(Stage::Mount, move |c: &mut ListComponent| {
            c.log.push("load".into());
            let (d, handle) = deferred();
            *stash.lock().unwrap() = Some(handle);
            HookResult::Pending(d)
        })
        .tagged(data_ready),
    );
    hooks.register(
        Hook::on(Stage::Mount, |c: &mut ListComponent| {
            c.log.push("render-list".into());
            HookResult::ok()
        })
        .after([data_ready]),
    );
    hooks.register(
        Hook::on(Stage::Mount, |c: &mut ListComponent| {
            c.log.push("announce".into());
            HookResult::ok()
        })
        .once(),
    );

    let pass = hooks.run(Stage::Mount, component);
    assert!(!pass.is_settled());

    // Simulated async load completes
    pending.lock().unwrap().take().unwrap().resolve(Ok(()));
    assert!(pass.is_settled());

    let component = pass.take_context().unwrap();
    // The untagged hook is free to run while the load is still in flight;
    // only the dependent waits for resolution.
    assert_eq!(component.log, vec!["load", "announce", "render-list"]);
    assert_eq!(hooks.hook_count(Stage::Mount), 2); // once-hook pruned

    // --- watch: two observers share the items subscription ---
    let shallow_hits = Arc::new(AtomicUsize::new(0));
    let deep_hits = Arc::new(AtomicUsize::new(0));

    let target = WatchTarget::dictionary("items");
    let hits = Arc::clone(&shallow_hits);
    runtime.watch.attach(id, &target, WatchOptions::shallow(), move |records| {
        hits.fetch_add(records.len(), Ordering::SeqCst);
    });
    let hits = Arc::clone(&deep_hits);
    runtime.watch.attach(id, &target, WatchOptions::deep(), move |records| {
        hits.fetch_add(records.len(), Ordering::SeqCst);
    });

    runtime.watch.dispatch_named(
        id,
        "items",
        &[
            MutationRecord::set(["0"]),
            MutationRecord::set(["0", "label"]),
        ],
    );
    assert_eq!(shallow_hits.load(Ordering::SeqCst), 1);
    assert_eq!(deep_hits.load(Ordering::SeqCst), 2);

    // --- render: the list renders in chunks across drain passes ---
    let total_items = component.fields.iter().find(|(n, _)| n == "items").unwrap().1;
    let page_size = component.fields.iter().find(|(n, _)| n == "page_size").unwrap().1;

    let rendered = Arc::new(AtomicUsize::new(0));
    let progress = Arc::clone(&rendered);
    let handle = runtime.render_handle();
    assert!(handle.enqueue(
        RenderTask::new(move || {
            let done = progress.fetch_add(page_size as usize, Ordering::SeqCst) + page_size as usize;
            Ok(done >= total_items as usize)
        })
        .with_weight(4),
    ));

    // Pump until drained, cancelling the between-chunk pause each time
    let mut passes = 0;
    while runtime.render.tick() {
        runtime.render.defer_restart();
        passes += 1;
        assert!(passes < 16, "scheduler failed to drain");
    }
    assert!(rendered.load(Ordering::SeqCst) >= total_items as usize);
    assert!(runtime.render.is_idle());

    // --- teardown ---
    runtime.destroy_component(id);
    assert_eq!(runtime.watch.watcher_count(id), 0);
    assert_eq!(runtime.stats().component_count, 0);
}
