//! Object / RefCounted 基础方法

use crate::bindings::codec::ObjectRef;
use crate::bindings::invoke::{invoke, CallContext};
use crate::core::error::BindingResult;

pub mod sig {
    crate::method_signature! {
        pub GetInstanceId = "Object"::"get_instance_id" [3905245786] () -> u64
    }

    crate::method_signature! {
        pub GetClass = "Object"::"get_class" [201670096] () -> String
    }

    crate::method_signature! {
        pub GetReferenceCount = "RefCounted"::"get_reference_count" [3905245786] () -> i64
    }
}

/// A typed wrapper around an engine object.
pub trait EngineClass: Sized {
    const CLASS: &'static str;

    fn from_object(object: ObjectRef) -> Self;
    fn object(&self) -> ObjectRef;

    fn get_class(&self, cx: &CallContext<'_>) -> BindingResult<String> {
        invoke::<sig::GetClass>(cx, self.object().ptr(), ())
    }

    fn get_instance_id(&self, cx: &CallContext<'_>) -> BindingResult<u64> {
        invoke::<sig::GetInstanceId>(cx, self.object().ptr(), ())
    }

    fn is_alive(&self, cx: &CallContext<'_>) -> bool {
        self.object().is_alive(cx.native())
    }

    /// Wraps `object` if the engine reports it as `Self::CLASS`.
    fn try_cast(cx: &CallContext<'_>, object: ObjectRef) -> BindingResult<Option<Self>> {
        let class = invoke::<sig::GetClass>(cx, object.ptr(), ())?;
        Ok((class == Self::CLASS).then(|| Self::from_object(object)))
    }
}

/// Current reference count of a RefCounted object.
pub fn get_reference_count(cx: &CallContext<'_>, object: ObjectRef) -> BindingResult<i64> {
    invoke::<sig::GetReferenceCount>(cx, object.ptr(), ())
}
