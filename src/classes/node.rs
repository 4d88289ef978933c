//! Node 包装
//!
//! 节点不做引用计数。宿主创建的节点在加入场景树之前归当前 Lifetime 所有；
//! `add_child` 之后由父节点持有，因此从 Lifetime 中移出。

use crate::bindings::codec::ObjectRef;
use crate::bindings::handle::Handle;
use crate::bindings::invoke::{invoke, CallContext};
use crate::classes::object::EngineClass;
use crate::core::error::{BindingError, BindingResult};

pub mod sig {
    use crate::bindings::codec::ObjectRef;
    use crate::bindings::ownership::Intent;

    crate::method_signature! {
        pub GetName = "Node"::"get_name" [2002593661] () -> String
    }
    crate::method_signature! {
        pub SetName = "Node"::"set_name" [3304788590] (String) -> ()
    }
    crate::method_signature! {
        /// The parent keeps itself alive; never released by the caller.
        pub GetParent = "Node"::"get_parent" [3160264692] () -> Option<ObjectRef>,
            intent = Intent::Accessor
    }
    crate::method_signature! {
        pub AddChild = "Node"::"add_child" [3863233950] (ObjectRef) -> ()
    }
    crate::method_signature! {
        pub RemoveChild = "Node"::"remove_child" [1078189570] (ObjectRef) -> ()
    }
    crate::method_signature! {
        pub GetChildCount = "Node"::"get_child_count" [894402480] () -> i64
    }
    crate::method_signature! {
        pub GetChild = "Node"::"get_child" [541253412] (i64) -> Option<ObjectRef>,
            intent = Intent::Accessor
    }
    crate::method_signature! {
        pub QueueFree = "Node"::"queue_free" [3218959716] () -> ()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    object: ObjectRef,
}

impl EngineClass for Node {
    const CLASS: &'static str = "Node";

    fn from_object(object: ObjectRef) -> Self {
        Self { object }
    }

    fn object(&self) -> ObjectRef {
        self.object
    }
}

impl Node {
    /// Instantiates a new node owned by the context's Lifetime.
    pub fn new(cx: &CallContext<'_>) -> BindingResult<Self> {
        let native = cx.native();
        let ptr = native.construct_object(Self::CLASS);
        let object = ObjectRef::from_ptr(native, ptr).ok_or(BindingError::NullObject)?;
        cx.lifetime().register(Handle::object(ptr, false));
        Ok(Self { object })
    }

    fn handle(&self) -> Handle {
        Handle::object(self.object.ptr(), false)
    }

    pub fn get_name(&self, cx: &CallContext<'_>) -> BindingResult<String> {
        invoke::<sig::GetName>(cx, self.object.ptr(), ())
    }

    pub fn set_name(&self, cx: &CallContext<'_>, name: &str) -> BindingResult<()> {
        invoke::<sig::SetName>(cx, self.object.ptr(), (name.to_string(),))
    }

    pub fn get_parent(&self, cx: &CallContext<'_>) -> BindingResult<Option<Node>> {
        Ok(invoke::<sig::GetParent>(cx, self.object.ptr(), ())?.map(Node::from_object))
    }

    /// Adds `child` under this node. The tree owns it from now on.
    ///
    /// `child` must be held by a Lifetime reachable from `cx`; that Lifetime
    /// gives it up once the engine has accepted the child.
    pub fn add_child(&self, cx: &CallContext<'_>, child: &Node) -> BindingResult<()> {
        let handle = child.handle();
        let owner = cx.owning_lifetime(&handle).ok_or_else(|| {
            BindingError::Ownership(format!(
                "node {} is not owned by any lifetime of this context",
                child.object.ptr()
            ))
        })?;
        invoke::<sig::AddChild>(cx, self.object.ptr(), (child.object,))?;
        owner.transfer_handle(&handle)?;
        Ok(())
    }

    /// Detaches `child`. The caller owns it again, through the context's Lifetime.
    ///
    /// Fails without calling the engine unless `child` is currently a child
    /// of this node and no Lifetime of `cx` holds it already.
    pub fn remove_child(&self, cx: &CallContext<'_>, child: &Node) -> BindingResult<()> {
        if child.get_parent(cx)? != Some(*self) {
            return Err(BindingError::Ownership(format!(
                "node {} is not a child of {}",
                child.object.ptr(),
                self.object.ptr()
            )));
        }
        let handle = child.handle();
        if cx.owning_lifetime(&handle).is_some() {
            return Err(BindingError::Ownership(format!(
                "node {} is already owned by a lifetime",
                child.object.ptr()
            )));
        }
        invoke::<sig::RemoveChild>(cx, self.object.ptr(), (child.object,))?;
        cx.lifetime().try_register(handle)?;
        Ok(())
    }

    pub fn get_child_count(&self, cx: &CallContext<'_>) -> BindingResult<i64> {
        invoke::<sig::GetChildCount>(cx, self.object.ptr(), ())
    }

    /// Negative indices count from the end.
    pub fn get_child(&self, cx: &CallContext<'_>, index: i64) -> BindingResult<Option<Node>> {
        Ok(invoke::<sig::GetChild>(cx, self.object.ptr(), (index,))?.map(Node::from_object))
    }

    /// Schedules deletion. A node held by a Lifetime is taken back from it
    /// first; a node in the tree is freed by the tree.
    pub fn queue_free(self, cx: &CallContext<'_>) -> BindingResult<()> {
        let handle = self.handle();
        match cx.owning_lifetime(&handle) {
            Some(owner) => {
                owner.transfer_handle(&handle)?;
            }
            None if self.get_parent(cx)?.is_some() => {}
            None => {
                return Err(BindingError::Ownership(format!(
                    "node {} has neither an owning lifetime nor a parent",
                    self.object.ptr()
                )))
            }
        }
        invoke::<sig::QueueFree>(cx, self.object.ptr(), ())
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
    fn test_tree_owns_added_children() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let root = Node::from_object(ObjectRef::from_ptr(engine.as_ref(), engine.root()).unwrap());

        let (kept, dropped) = Lifetime::scope(engine.clone(), LifetimeMode::Strict, |lifetime| {
            let cx = CallContext::new(&methods, &frames, lifetime);
            let kept = Node::new(&cx).unwrap();
            kept.set_name(&cx, "Player").unwrap();
            root.add_child(&cx, &kept).unwrap();
            let dropped = Node::new(&cx).unwrap();
            (kept.object().ptr(), dropped.object().ptr())
        });

        assert!(engine.is_alive(kept));
        assert!(!engine.is_alive(dropped));
        assert_eq!(engine.children(engine.root()), vec![kept]);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_parent_is_borrowed() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let cx = CallContext::new(&methods, &frames, &lifetime);

        let parent = Node::new(&cx).unwrap();
        let child = Node::new(&cx).unwrap();
        parent.add_child(&cx, &child).unwrap();
        assert_eq!(parent.get_child_count(&cx).unwrap(), 1);
        assert_eq!(parent.get_child(&cx, -1).unwrap(), Some(child));
        assert_eq!(parent.get_child(&cx, 3).unwrap(), None);

        let found = child.get_parent(&cx).unwrap().unwrap();
        assert_eq!(found, parent);
        assert_eq!(parent.get_parent(&cx).unwrap(), None);
        assert_eq!(child.get_name(&cx).unwrap(), "");

        // only the parent is still owned by the Lifetime
        lifetime.end().unwrap();
        assert_eq!(engine.object_release_count(parent.object().ptr()), 1);
        assert_eq!(engine.object_release_count(child.object().ptr()), 0);
        assert!(!engine.is_alive(child.object().ptr()));
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_remove_child_returns_ownership() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let cx = CallContext::new(&methods, &frames, &lifetime);

        let parent = Node::new(&cx).unwrap();
        let child = Node::new(&cx).unwrap();
        parent.add_child(&cx, &child).unwrap();
        assert!(!lifetime.contains(&child.handle()));

        parent.remove_child(&cx, &child).unwrap();
        assert!(lifetime.contains(&child.handle()));
        assert_eq!(child.get_parent(&cx).unwrap(), None);

        // no longer a child, so a second removal is refused before the engine sees it
        let again = parent.remove_child(&cx, &child);
        assert!(matches!(again, Err(BindingError::Ownership(_))));
        assert_eq!(lifetime.len(), 2);

        lifetime.end().unwrap();
        assert_eq!(engine.object_release_count(parent.object().ptr()), 1);
        assert_eq!(engine.object_release_count(child.object().ptr()), 1);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_remove_non_child_is_rejected() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let cx = CallContext::new(&methods, &frames, &lifetime);

        let parent = Node::new(&cx).unwrap();
        let stranger = Node::new(&cx).unwrap();
        let result = parent.remove_child(&cx, &stranger);
        assert!(matches!(result, Err(BindingError::Ownership(_))));
        assert_eq!(lifetime.len(), 2);

        assert_eq!(lifetime.end().unwrap(), 2);
        assert_eq!(engine.object_release_count(stranger.object().ptr()), 1);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_add_child_needs_an_owner() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let owner = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let unrelated = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let owner_cx = CallContext::new(&methods, &frames, &owner);
        let other_cx = CallContext::new(&methods, &frames, &unrelated);

        let parent = Node::new(&owner_cx).unwrap();
        let child = Node::new(&owner_cx).unwrap();
        let result = parent.add_child(&other_cx, &child);
        assert!(matches!(result, Err(BindingError::Ownership(_))));
        assert!(engine.children(parent.object().ptr()).is_empty());

        unrelated.end().unwrap();
        assert_eq!(owner.end().unwrap(), 2);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_queue_free_needs_owner_or_parent() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let owner = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let unrelated = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let owner_cx = CallContext::new(&methods, &frames, &owner);
        let other_cx = CallContext::new(&methods, &frames, &unrelated);

        let parent = Node::new(&owner_cx).unwrap();
        let child = Node::new(&owner_cx).unwrap();
        let loose = Node::new(&owner_cx).unwrap();
        parent.add_child(&owner_cx, &child).unwrap();

        assert!(matches!(loose.queue_free(&other_cx), Err(BindingError::Ownership(_))));
        assert!(engine.is_alive(loose.object().ptr()));

        child.queue_free(&other_cx).unwrap();
        assert!(!engine.is_alive(child.object().ptr()));
        assert!(engine.children(parent.object().ptr()).is_empty());

        unrelated.end().unwrap();
        assert_eq!(owner.end().unwrap(), 2);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_queue_free_owned_node() {
        let engine = Arc::new(HeadlessEngine::new());
        let methods = MethodBindingTable::new();
        let frames = FramePool::new(2, 8);
        let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        let cx = CallContext::new(&methods, &frames, &lifetime);

        let node = Node::new(&cx).unwrap();
        let ptr = node.object().ptr();
        node.queue_free(&cx).unwrap();
        assert!(!engine.is_alive(ptr));
        assert_eq!(lifetime.end().unwrap(), 0);
        assert!(engine.violations().is_empty());
    }
}
