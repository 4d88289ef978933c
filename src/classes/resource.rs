//! Resource 包装与场景本地复制
//!
//! 标记为 local-to-scene 的资源在实例化场景时按 [`LocalToSceneStrategy`]
//! 处理；策略由嵌入方提供，不经过虚函数表。

use crate::bindings::codec::ObjectRef;
use crate::bindings::handle::Handle;
use crate::bindings::invoke::{invoke, CallContext};
use crate::classes::object::EngineClass;
use crate::core::error::{BindingError, BindingResult};

pub mod sig {
    use crate::bindings::codec::ObjectRef;
    use crate::bindings::ownership::{Intent, ReturnKind};

    crate::method_signature! {
        pub Duplicate = "Resource"::"duplicate" [482882304] (bool) -> ObjectRef,
            intent = Intent::Factory, returns = ReturnKind::RefCounted
    }
    crate::method_signature! {
        pub SetLocalToScene = "Resource"::"set_local_to_scene" [2586408642] (bool) -> ()
    }
    crate::method_signature! {
        pub IsLocalToScene = "Resource"::"is_local_to_scene" [36873697] () -> bool
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    object: ObjectRef,
}

impl EngineClass for Resource {
    const CLASS: &'static str = "Resource";

    fn from_object(object: ObjectRef) -> Self {
        Self { object }
    }

    fn object(&self) -> ObjectRef {
        self.object
    }
}

impl Resource {
    /// Creates a resource holding one reference, released with the context's Lifetime.
    pub fn new(cx: &CallContext<'_>) -> BindingResult<Self> {
        let native = cx.native();
        let ptr = native.construct_object(Self::CLASS);
        let object = ObjectRef::from_ptr(native, ptr).ok_or(BindingError::NullObject)?;
        cx.lifetime().register(Handle::object(ptr, true));
        Ok(Self { object })
    }

    pub fn duplicate(&self, cx: &CallContext<'_>, subresources: bool) -> BindingResult<Resource> {
        invoke::<sig::Duplicate>(cx, self.object.ptr(), (subresources,)).map(Resource::from_object)
    }

    pub fn set_local_to_scene(&self, cx: &CallContext<'_>, enable: bool) -> BindingResult<()> {
        invoke::<sig::SetLocalToScene>(cx, self.object.ptr(), (enable,))
    }

    pub fn is_local_to_scene(&self, cx: &CallContext<'_>) -> BindingResult<bool> {
        invoke::<sig::IsLocalToScene>(cx, self.object.ptr(), ())
    }
}

/// Produces the per-instance copy of a scene-local resource.
pub trait LocalToSceneStrategy {
    fn setup_local_to_scene(&self, cx: &CallContext<'_>, original: &Resource) -> BindingResult<Resource>;
}

/// Duplicates the resource for every scene instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateStrategy {
    pub subresources: bool,
}

impl LocalToSceneStrategy for DuplicateStrategy {
    fn setup_local_to_scene(&self, cx: &CallContext<'_>, original: &Resource) -> BindingResult<Resource> {
        original.duplicate(cx, self.subresources)
    }
}

/// Keeps sharing the original.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShareStrategy;

impl LocalToSceneStrategy for ShareStrategy {
    fn setup_local_to_scene(&self, _cx: &CallContext<'_>, original: &Resource) -> BindingResult<Resource> {
        Ok(*original)
    }
}

/// Applies a [`LocalToSceneStrategy`] while instantiating a scene.
pub struct SceneInstantiator<S> {
    strategy: S,
}

impl<S: LocalToSceneStrategy> SceneInstantiator<S> {
    pub fn new(strategy: S) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Resources as the new scene instance sees them. Shared resources are
    /// passed through; scene-local ones go through the strategy.
    pub fn instantiate(&self, cx: &CallContext<'_>, resources: &[Resource]) -> BindingResult<Vec<Resource>> {
        let mut instanced = Vec::with_capacity(resources.len());
        for resource in resources {
            if resource.is_local_to_scene(cx)? {
                instanced.push(self.strategy.setup_local_to_scene(cx, resource)?);
            } else {
                instanced.push(*resource);
            }
        }
        tracing::debug!(target: "ffi.methods", count = instanced.len(), "scene resources instantiated");
        Ok(instanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::frame_pool::FramePool;
    use crate::bindings::lifetime::{Lifetime, LifetimeMode};
    use crate::bindings::method_table::MethodBindingTable;
    use crate::native::HeadlessEngine;
    use std::sync::Arc;

    #[test]
    fn test_duplicate_is_released_once() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let cx = CallContext::new(&methods, &frames, &lifetime);

        let original = Resource::new(&cx).unwrap();
        original.set_local_to_scene(&cx, true).unwrap();
        let copy = original.duplicate(&cx, false).unwrap();
        assert_ne!(copy, original);
        assert!(copy.is_local_to_scene(&cx).unwrap());
        assert_eq!(engine.reference_count(copy.object().ptr()), Some(1));

        lifetime.end().unwrap();
        for resource in [original, copy] {
            let ptr = resource.object().ptr();
            assert!(!engine.is_alive(ptr));
            assert_eq!(engine.release_count(&Handle::object(ptr, true)), 1);
        }
    }

    #[test]
    fn test_instantiator_strategies() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let cx = CallContext::new(&methods, &frames, &lifetime);

        let local = Resource::new(&cx).unwrap();
        local.set_local_to_scene(&cx, true).unwrap();
        let shared = Resource::new(&cx).unwrap();
        let resources = [local, shared];

        let duplicated = SceneInstantiator::new(DuplicateStrategy::default())
            .instantiate(&cx, &resources)
            .unwrap();
        assert_ne!(duplicated[0], local);
        assert_eq!(duplicated[1], shared);

        let kept = SceneInstantiator::new(ShareStrategy).instantiate(&cx, &resources).unwrap();
        assert_eq!(kept, resources.to_vec());

        lifetime.end().unwrap();
        assert_eq!(engine.live_objects(), 1);
        assert!(engine.violations().is_empty());
    }
}
