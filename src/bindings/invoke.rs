//! Generic method invocation.
//!
//! Every generated wrapper method is one call to [`invoke`] with a
//! [`MethodSignature`] type describing the method. The sequence is fixed:
//! resolve the bind, take a frame from the pool, encode arguments, make the
//! pointer call, decode the return under the ownership policy.

use crate::bindings::callframe::CallFrame;
use crate::bindings::codec::{DecodeContext, FromWire, ToWire};
use crate::bindings::frame_pool::FramePool;
use crate::bindings::handle::{Handle, ObjectPtr, MAX_VALUE_WORDS};
use crate::bindings::lifetime::Lifetime;
use crate::bindings::method_table::{MethodBindingTable, MethodKey};
use crate::bindings::ownership::{decode_strategy, DecodeStrategy, Intent, ReturnKind};
use crate::bindings::variant::Variant;
use crate::core::error::BindingResult;
use crate::native::NativeInterface;

/// Static description of one engine method.
pub trait MethodSignature {
    const CLASS: &'static str;
    const METHOD: &'static str;
    const HASH: i64;
    const INTENT: Intent = Intent::Value;
    const RETURN: ReturnKind = <Self::Ret as FromWire>::KIND;

    type Args: ArgList;
    type Ret: FromWire;

    fn key() -> MethodKey {
        MethodKey::new_static(Self::CLASS, Self::METHOD, Self::HASH)
    }
}

/// A tuple of encodable arguments.
pub trait ArgList {
    const COUNT: usize;

    fn encode_into(&self, frame: &mut CallFrame<'_>, lifetime: &Lifetime) -> BindingResult<()>;
}

impl ArgList for () {
    const COUNT: usize = 0;

    fn encode_into(&self, _frame: &mut CallFrame<'_>, _lifetime: &Lifetime) -> BindingResult<()> {
        Ok(())
    }
}

macro_rules! impl_arg_list {
    ($count:expr; $($name:ident : $index:tt),+) => {
        impl<$($name: ToWire),+> ArgList for ($($name,)+) {
            const COUNT: usize = $count;

            fn encode_into(&self, frame: &mut CallFrame<'_>, lifetime: &Lifetime) -> BindingResult<()> {
                $(frame.arg(&self.$index, lifetime)?;)+
                Ok(())
            }
        }
    };
}

impl_arg_list!(1; A: 0);
impl_arg_list!(2; A: 0, B: 1);
impl_arg_list!(3; A: 0, B: 1, C: 2);
impl_arg_list!(4; A: 0, B: 1, C: 2, D: 3);
impl_arg_list!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_arg_list!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_arg_list!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_arg_list!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

/// Everything a wrapper call needs: the method cache, the frame pool and
/// the Lifetime that owns whatever the call produces.
///
/// A context made with [`CallContext::with_lifetime`] remembers the context
/// it was derived from, so ownership lookups reach outer Lifetimes too.
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    methods: &'a MethodBindingTable,
    frames: &'a FramePool,
    lifetime: &'a Lifetime,
    parent: Option<&'a CallContext<'a>>,
}

impl<'a> CallContext<'a> {
    pub fn new(methods: &'a MethodBindingTable, frames: &'a FramePool, lifetime: &'a Lifetime) -> Self {
        Self {
            methods,
            frames,
            lifetime,
            parent: None,
        }
    }

    pub fn native(&self) -> &'a dyn NativeInterface {
        self.lifetime.native()
    }

    pub fn lifetime(&self) -> &'a Lifetime {
        self.lifetime
    }

    pub fn methods(&self) -> &'a MethodBindingTable {
        self.methods
    }

    pub fn frames(&self) -> &'a FramePool {
        self.frames
    }

    /// Same cache and pool, different Lifetime. `self` stays reachable
    /// through [`CallContext::owning_lifetime`].
    pub fn with_lifetime<'b>(&'b self, lifetime: &'b Lifetime) -> CallContext<'b>
    where
        'a: 'b,
    {
        CallContext {
            methods: self.methods,
            frames: self.frames,
            lifetime,
            parent: Some(self),
        }
    }

    /// Innermost Lifetime along the context chain that holds `handle`.
    pub fn owning_lifetime(&self, handle: &Handle) -> Option<&'a Lifetime> {
        let mut current = Some(self);
        while let Some(cx) = current {
            if !cx.lifetime.is_ended() && cx.lifetime.contains(handle) {
                return Some(cx.lifetime);
            }
            current = cx.parent;
        }
        None
    }
}

/// Calls method `S` on `instance` through the pointer-call ABI.
pub fn invoke<S: MethodSignature>(
    cx: &CallContext<'_>,
    instance: ObjectPtr,
    args: S::Args,
) -> BindingResult<S::Ret> {
    let native = cx.native();
    let strategy = decode_strategy(S::RETURN, S::INTENT)?;
    let bind = cx.methods.resolve(native, S::CLASS, S::METHOD, S::HASH)?;

    let mut frame = cx.frames.acquire(<S::Args as ArgList>::COUNT)?;
    args.encode_into(&mut frame, cx.lifetime)?;
    frame.reserve_return(<S::Ret as FromWire>::WIDTH)?;

    tracing::trace!(
        target: "ffi.methods",
        class = S::CLASS,
        method = S::METHOD,
        %instance,
        "ptrcall"
    );
    {
        let (frame_args, ret) = frame.split();
        native.ptrcall(bind, instance, frame_args.as_slice(), ret);
    }

    let decode = DecodeContext::new(cx.lifetime, strategy);
    S::Ret::decode(frame.ret_words(), &decode)
}

/// Calls a static method `S` (no instance).
pub fn invoke_static<S: MethodSignature>(cx: &CallContext<'_>, args: S::Args) -> BindingResult<S::Ret> {
    invoke::<S>(cx, ObjectPtr::NULL, args)
}

/// Calls a method by name through the Variant-call ABI.
///
/// Argument count and types are checked by the engine and reported as
/// [`crate::core::error::CallError`]. The returned Variant is owned by the
/// context's Lifetime.
pub fn invoke_dynamic(
    cx: &CallContext<'_>,
    key: &MethodKey,
    instance: ObjectPtr,
    args: &[Variant],
) -> BindingResult<Variant> {
    let native = cx.native();
    let bind = cx.methods.resolve_key(native, key)?;

    let mut frame = cx.frames.acquire(args.len())?;
    for arg in args {
        frame.arg(arg, cx.lifetime)?;
    }

    let mut ret = [0; MAX_VALUE_WORDS];
    if let Err(err) = native.call(bind, instance, frame.args().as_slice(), &mut ret) {
        tracing::warn!(target: "ffi.methods", method = %key, error = %err, "variant call failed");
        return Err(err.into());
    }

    let decode = DecodeContext::new(cx.lifetime, DecodeStrategy::RegisterOwned);
    Variant::decode(&ret, &decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::codec::ObjectRef;
    use crate::bindings::lifetime::LifetimeMode;
    use crate::classes::file_access::{sig, ModeFlags};
    use crate::core::error::{BindingError, CallError};
    use crate::native::HeadlessEngine;
    use std::sync::Arc;

    struct Fixture {
        engine: Arc<HeadlessEngine>,
        methods: MethodBindingTable,
        frames: FramePool,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                engine: Arc::new(HeadlessEngine::new()),
                methods: MethodBindingTable::new(),
                frames: FramePool::new(2, 8),
            }
        }

        fn lifetime(&self) -> Lifetime {
            Lifetime::begin(self.engine.clone(), LifetimeMode::Strict)
        }
    }

    crate::method_signature! {
        BadHash = "FileAccess"::"get_length" [1] () -> i64
    }

    crate::method_signature! {
        ScalarFactory = "FileAccess"::"get_length" [sig::GetLength::HASH] () -> i64,
            intent = Intent::Factory
    }

    #[test]
    fn test_invoke_static_factory_registers_object() {
        let fx = Fixture::new();
        fx.engine.write_file("res://a.txt", b"abc");
        let lifetime = fx.lifetime();
        let cx = CallContext::new(&fx.methods, &fx.frames, &lifetime);

        let file: Option<ObjectRef> =
            invoke_static::<sig::Open>(&cx, ("res://a.txt".to_string(), ModeFlags::Read.bits())).unwrap();
        let file = file.unwrap();
        let length = invoke::<sig::GetLength>(&cx, file.ptr(), ()).unwrap();
        assert_eq!(length, 3);

        // path string + file object
        assert_eq!(lifetime.len(), 2);
        lifetime.end().unwrap();
        assert!(!fx.engine.is_alive(file.ptr()));
        assert_eq!(fx.frames.stats().outstanding(), 0);
    }

    #[test]
    fn test_unresolved_method_allocates_nothing() {
        let fx = Fixture::new();
        let lifetime = fx.lifetime();
        let cx = CallContext::new(&fx.methods, &fx.frames, &lifetime);
        let err = invoke::<BadHash>(&cx, ObjectPtr::NULL, ()).unwrap_err();
        assert!(matches!(err, BindingError::UnresolvedMethod { hash: 1, .. }));
        assert!(lifetime.is_empty());
        assert_eq!(fx.frames.stats().acquisitions, 0);
    }

    #[test]
    fn test_policy_violation_is_reported() {
        let fx = Fixture::new();
        let lifetime = fx.lifetime();
        let cx = CallContext::new(&fx.methods, &fx.frames, &lifetime);
        assert!(matches!(
            invoke::<ScalarFactory>(&cx, ObjectPtr::NULL, ()),
            Err(BindingError::Ownership(_))
        ));
    }

    #[test]
    fn test_invoke_dynamic() {
        let fx = Fixture::new();
        fx.engine.write_file("res://d.bin", &[1, 2, 3, 4]);
        let lifetime = fx.lifetime();
        let cx = CallContext::new(&fx.methods, &fx.frames, &lifetime);

        let bytes = invoke_dynamic(
            &cx,
            &sig::GetFileAsBytes::key(),
            ObjectPtr::NULL,
            &[Variant::from("res://d.bin")],
        )
        .unwrap();
        assert_eq!(bytes, Variant::PackedByteArray(vec![1, 2, 3, 4]));

        let err = invoke_dynamic(&cx, &sig::GetFileAsBytes::key(), ObjectPtr::NULL, &[])
            .unwrap_err();
        assert!(matches!(
            err,
            BindingError::Call(CallError::TooFewArguments { expected: 1 })
        ));

        let err = invoke_dynamic(
            &cx,
            &sig::GetFileAsBytes::key(),
            ObjectPtr::NULL,
            &[Variant::Int(3)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BindingError::Call(CallError::InvalidArgument { argument: 0, expected: 4 })
        ));

        let err = invoke_dynamic(&cx, &sig::GetLength::key(), ObjectPtr::NULL, &[])
            .unwrap_err();
        assert!(matches!(err, BindingError::Call(CallError::InstanceIsNull)));

        lifetime.end().unwrap();
        assert_eq!(fx.engine.live_allocations(), 0);
    }
}
