use game_engine_ffi::bindings::{
    invoke_dynamic, CallContext, DecodeContext, DecodeStrategy, FramePool, FromWire, Handle, Lifetime,
    LifetimeMode, MethodBindingTable, MethodKey, ObjectRef, Variant,
};
use game_engine_ffi::classes::{EngineClass, FileAccess, ModeFlags, Node};
use game_engine_ffi::config::FfiConfig;
use game_engine_ffi::core::{BindingError, BindingRuntime, CallError, LifetimeError, NativeErrorCode};
use game_engine_ffi::native::{HeadlessEngine, NativeInterface};
use std::sync::Arc;

fn decode_object(lifetime: &Lifetime, ptr: u64, strategy: DecodeStrategy) -> anyhow::Result<ObjectRef> {
    let cx = DecodeContext::new(lifetime, strategy);
    Ok(ObjectRef::decode(&[ptr], &cx)?)
}

#[test]
fn test_store_width_wraparound() -> anyhow::Result<()> {
    let runtime = BindingRuntime::builder(FfiConfig::default()).build()?;
    let (first, second) = runtime.scope(|cx| -> anyhow::Result<(i64, i64)> {
        let file = FileAccess::open(cx, "user://wrap.bin", ModeFlags::WriteRead)?;
        file.store_16(cx, 121)?;
        file.seek(cx, 0)?;
        let first = file.get_16(cx)?;

        file.seek(cx, 0)?;
        file.store_16(cx, -42)?;
        file.seek(cx, 0)?;
        let second = file.get_16(cx)?;
        file.close(cx)?;
        Ok((first, second))
    })??;

    assert_eq!(first, 121);
    assert_eq!(second, 65494);
    Ok(())
}

#[test]
fn test_borrowed_object_is_not_released() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let node = engine.construct_object("Node");
    let counted = engine.construct_object("RefCounted");

    let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    let borrowed = decode_object(&lifetime, node.0, DecodeStrategy::BorrowedAssertInstance)?;
    assert_eq!(borrowed.ptr(), node);
    decode_object(&lifetime, counted.0, DecodeStrategy::BorrowedAssertInstance)?;
    assert!(lifetime.is_empty());
    assert_eq!(lifetime.end()?, 0);

    assert!(engine.is_alive(node));
    assert_eq!(engine.object_release_count(node), 0);
    assert_eq!(engine.reference_count(counted), Some(1));
    Ok(())
}

#[test]
fn test_transferred_object_released_exactly_once() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let counted = engine.construct_object("RefCounted");

    let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    decode_object(&lifetime, counted.0, DecodeStrategy::TransferredToHost)?;
    assert_eq!(lifetime.len(), 1);
    assert_eq!(lifetime.end()?, 1);

    assert_eq!(engine.release_count(&Handle::object(counted, true)), 1);
    assert!(!engine.is_alive(counted));
    assert!(engine.violations().is_empty());
    Ok(())
}

#[test]
fn test_stale_borrowed_object_is_rejected() {
    let engine = Arc::new(HeadlessEngine::new());
    let node = engine.construct_object("Node");
    engine.release(&Handle::object(node, false));

    let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    let result = decode_object(&lifetime, node.0, DecodeStrategy::BorrowedAssertInstance);
    assert!(result.is_err());
    lifetime.end().unwrap();
}

#[test]
fn test_lenient_double_end_never_double_frees() {
    let engine = Arc::new(HeadlessEngine::new());
    let counted = engine.construct_object("RefCounted");

    let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Lenient);
    lifetime.register(Handle::object(counted, true));
    assert_eq!(lifetime.end().unwrap(), 1);
    assert!(matches!(
        lifetime.end(),
        Err(BindingError::Lifetime(LifetimeError::AlreadyEnded(_)))
    ));
    assert_eq!(engine.release_count(&Handle::object(counted, true)), 1);
}

#[test]
#[should_panic(expected = "ended twice")]
fn test_strict_double_end_panics() {
    let engine = Arc::new(HeadlessEngine::new());
    let lifetime = Lifetime::begin(engine, LifetimeMode::Strict);
    let _ = lifetime.end();
    let _ = lifetime.end();
}

#[test]
fn test_concurrent_method_resolution() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let methods = MethodBindingTable::new();
    let key = MethodKey::new("Node", "get_child_count", 894402480);

    let binds: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| methods.resolve_key(engine.as_ref(), &key)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("resolver thread panicked"))
            .collect()
    });

    let first = binds[0].as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
    for bind in &binds {
        assert_eq!(bind.as_ref().ok(), Some(first));
    }
    assert_eq!(engine.method_lookups("Node", "get_child_count"), 1);
    assert_eq!(methods.stats().resolutions, 1);
    Ok(())
}

#[test]
fn test_open_missing_file_is_a_value() -> anyhow::Result<()> {
    let runtime = BindingRuntime::builder(FfiConfig::default()).build()?;
    let result = runtime.scope(|cx| FileAccess::open(cx, "user://missing.txt", ModeFlags::Read))?;
    assert!(matches!(
        result,
        Err(BindingError::Native(NativeErrorCode::FileNotFound))
    ));
    Ok(())
}

#[test]
fn test_dynamic_call_reports_call_errors() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let methods = MethodBindingTable::new();
    let frames = FramePool::new(2, 8);
    let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    let cx = CallContext::new(&methods, &frames, &lifetime);

    let node = Node::new(&cx)?;
    let set_name = MethodKey::new("Node", "set_name", 3304788590);
    invoke_dynamic(&cx, &set_name, node.object().ptr(), &[Variant::from("Dynamic")])?;
    assert_eq!(node.get_name(&cx)?, "Dynamic");

    let count = MethodKey::new("Node", "get_child_count", 894402480);
    let result = invoke_dynamic(&cx, &count, node.object().ptr(), &[])?;
    assert_eq!(result, Variant::Int(0));

    let wrong = invoke_dynamic(&cx, &set_name, node.object().ptr(), &[Variant::Int(3)]);
    assert!(matches!(
        wrong,
        Err(BindingError::Call(CallError::InvalidArgument { argument: 0, .. }))
    ));
    let missing = invoke_dynamic(&cx, &set_name, node.object().ptr(), &[]);
    assert!(matches!(
        missing,
        Err(BindingError::Call(CallError::TooFewArguments { .. }))
    ));

    lifetime.end()?;
    assert_eq!(engine.live_allocations(), 0);
    assert!(engine.violations().is_empty());
    Ok(())
}

#[test]
fn test_full_scenario_leaves_nothing_behind() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let runtime = BindingRuntime::builder(FfiConfig::default())
        .native(engine.clone())
        .build()?;

    runtime.scope(|cx| -> anyhow::Result<()> {
        let file = FileAccess::open(cx, "user://scene.txt", ModeFlags::Write)?;
        file.store_string(cx, "héllo")?;
        file.close(cx)?;
        assert_eq!(FileAccess::get_file_as_string(cx, "user://scene.txt")?, "héllo");

        let parent = Node::new(cx)?;
        let child = Node::new(cx)?;
        parent.add_child(cx, &child)?;
        assert_eq!(child.get_parent(cx)?, Some(parent));
        Ok(())
    })??;

    assert_eq!(engine.live_allocations(), 0);
    assert_eq!(engine.live_objects(), 1);
    assert!(engine.violations().is_empty());
    assert!(runtime.stats().methods.hits > 0);
    Ok(())
}

#[test]
fn test_add_child_from_inner_lifetime_transfers_from_outer() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let methods = MethodBindingTable::new();
    let frames = FramePool::new(2, 8);
    let root = Node::from_object(
        ObjectRef::from_ptr(engine.as_ref(), engine.root()).ok_or_else(|| anyhow::anyhow!("no root"))?,
    );

    let outer = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    let cx = CallContext::new(&methods, &frames, &outer);
    let node = Node::new(&cx)?;
    let ptr = node.object().ptr();

    let inner = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    {
        let inner_cx = cx.with_lifetime(&inner);
        assert!(cx.owning_lifetime(&Handle::object(ptr, false)).is_some());
        root.add_child(&inner_cx, &node)?;
        assert!(inner_cx.owning_lifetime(&Handle::object(ptr, false)).is_none());
    }
    assert_eq!(inner.end()?, 0);
    assert_eq!(outer.end()?, 0);

    assert!(engine.is_alive(ptr));
    assert_eq!(engine.children(engine.root()), vec![ptr]);
    assert_eq!(engine.object_release_count(ptr), 0);
    assert!(engine.violations().is_empty());
    Ok(())
}

#[test]
fn test_removed_child_belongs_to_inner_lifetime() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let methods = MethodBindingTable::new();
    let frames = FramePool::new(2, 8);

    let outer = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    let cx = CallContext::new(&methods, &frames, &outer);
    let parent = Node::new(&cx)?;
    let child = Node::new(&cx)?;
    parent.add_child(&cx, &child)?;

    let inner = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
    {
        let inner_cx = cx.with_lifetime(&inner);
        parent.remove_child(&inner_cx, &child)?;
        assert!(inner.contains(&Handle::object(child.object().ptr(), false)));
        assert!(!outer.contains(&Handle::object(child.object().ptr(), false)));

        // no longer a child, so a second removal is refused
        assert!(matches!(
            parent.remove_child(&inner_cx, &child),
            Err(BindingError::Ownership(_))
        ));
    }
    assert_eq!(inner.end()?, 1);
    assert!(!engine.is_alive(child.object().ptr()));
    assert!(engine.is_alive(parent.object().ptr()));

    assert_eq!(outer.end()?, 1);
    assert_eq!(engine.object_release_count(child.object().ptr()), 1);
    assert_eq!(engine.object_release_count(parent.object().ptr()), 1);
    assert_eq!(engine.live_objects(), 1);
    assert!(engine.violations().is_empty());
    Ok(())
}

#[test]
fn test_runtime_context_reaches_outer_lifetime() -> anyhow::Result<()> {
    let engine = Arc::new(HeadlessEngine::new());
    let runtime = BindingRuntime::builder(FfiConfig::default())
        .native(engine.clone())
        .build()?;
    let outer = runtime.begin_lifetime();
    let cx = runtime.context(&outer);
    let parent = Node::new(&cx)?;
    let child = Node::new(&cx)?;

    let inner = runtime.begin_lifetime();
    parent.add_child(&cx.with_lifetime(&inner), &child)?;
    assert_eq!(parent.get_child_count(&cx)?, 1);
    inner.end()?;

    // the tree holds the child; ending the outer Lifetime frees both once
    assert_eq!(outer.end()?, 1);
    assert!(!engine.is_alive(child.object().ptr()));
    assert_eq!(engine.object_release_count(child.object().ptr()), 0);
    assert!(engine.violations().is_empty());
    Ok(())
}
