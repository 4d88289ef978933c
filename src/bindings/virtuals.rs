//! Virtual dispatch shim.
//!
//! Host classes override engine virtuals by implementing a per-base-class
//! trait ([`NodeVirtuals`], [`ResourceVirtuals`]) and listing the overrides
//! they provide. Names only appear at the ABI edge: the engine asks for a
//! virtual by `(class, name)` once, receives a small [`VirtualIndex`], and
//! calls back with that index from then on.
//!
//! Each callback runs inside its own [`Lifetime`], which ends before control
//! returns to the engine.

use crate::bindings::classes::ClassRegistry;
use crate::bindings::codec::{DecodeContext, FromWire, ToWire};
use crate::bindings::handle::{Handle, Word};
use crate::bindings::lifetime::{Lifetime, LifetimeMode};
use crate::bindings::ownership::{decode_strategy, Intent};
use crate::core::error::{BindingError, BindingResult, VirtualError};
use crate::native::NativeInterface;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU8;
use std::sync::Arc;

/// Position of a virtual in the table. `0` on the wire means "not registered".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualIndex(NonZeroU8);

impl VirtualIndex {
    pub const MAX_ENTRIES: usize = u8::MAX as usize;

    pub fn from_raw(raw: u8) -> Option<Self> {
        NonZeroU8::new(raw).map(Self)
    }

    pub fn get(self) -> u8 {
        self.0.get()
    }

    fn slot(self) -> usize {
        self.0.get() as usize - 1
    }
}

/// Arguments and return slot of one callback from the engine.
pub struct VirtualCall<'a> {
    name: &'a str,
    args: &'a [&'a [Word]],
    ret: &'a mut [Word],
    lifetime: &'a Lifetime,
}

impl<'a> VirtualCall<'a> {
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn lifetime(&self) -> &'a Lifetime {
        self.lifetime
    }

    pub fn check_arity(&self, expected: usize) -> BindingResult<()> {
        if self.args.len() != expected {
            return Err(VirtualError::Arity {
                name: self.name.to_string(),
                expected,
                got: self.args.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Decodes argument `index`. Values are borrowed from the engine.
    pub fn arg<T: FromWire>(&self, index: usize) -> BindingResult<T> {
        let words = self.args.get(index).ok_or_else(|| VirtualError::Arity {
            name: self.name.to_string(),
            expected: index + 1,
            got: self.args.len(),
        })?;
        let strategy = decode_strategy(T::KIND, Intent::CallbackArgument)?;
        T::decode(words, &DecodeContext::new(self.lifetime, strategy))
    }

    /// Encodes the return value. Ownership of what it creates passes to the engine.
    pub fn set_return<T: ToWire>(&mut self, value: &T) -> BindingResult<()> {
        let (name, available) = (self.name, self.ret.len());
        let slot = self.ret.get_mut(..T::WIDTH).ok_or_else(|| {
            BindingError::ReturnSlot(format!(
                "{name} returns {} words into a {available} word slot",
                T::WIDTH
            ))
        })?;
        value.encode(self.lifetime, slot)?;
        if let Some(kind) = T::OWNED_KIND {
            self.lifetime.transfer_handle(&Handle::new(kind, slot))?;
        }
        Ok(())
    }
}

type VirtualFn = dyn Fn(&mut dyn Any, &mut VirtualCall<'_>) -> BindingResult<()> + Send + Sync;

struct VirtualEntry {
    class: String,
    name: String,
    adapter: Box<VirtualFn>,
}

/// Collects virtual registrations at startup.
#[derive(Default)]
pub struct VirtualTableBuilder {
    entries: Vec<VirtualEntry>,
    index: HashMap<(String, String), VirtualIndex>,
}

macro_rules! impl_register_fn {
    ($(#[$meta:meta])* $fn_name:ident, $count:expr; $($arg:ident: $ty:ident @ $index:tt),*) => {
        $(#[$meta])*
        pub fn $fn_name<T, $($ty,)* R, F>(
            &mut self,
            class: &str,
            name: &str,
            f: F,
        ) -> BindingResult<VirtualIndex>
        where
            T: Any,
            $($ty: FromWire,)*
            R: ToWire,
            F: Fn(&mut T, $($ty),*) -> R + Send + Sync + 'static,
        {
            self.register(class, name, move |instance, call| {
                call.check_arity($count)?;
                let this = instance.downcast_mut::<T>().ok_or_else(|| VirtualError::InstanceType {
                    name: call.name.to_string(),
                    expected: std::any::type_name::<T>(),
                })?;
                $(let $arg: $ty = call.arg($index)?;)*
                let result = f(this, $($arg),*);
                call.set_return(&result)
            })
        }
    };
}

impl VirtualTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a raw adapter for `(class, name)`.
    pub fn register<F>(&mut self, class: &str, name: &str, adapter: F) -> BindingResult<VirtualIndex>
    where
        F: Fn(&mut dyn Any, &mut VirtualCall<'_>) -> BindingResult<()> + Send + Sync + 'static,
    {
        let key = (class.to_string(), name.to_string());
        if self.index.contains_key(&key) {
            return Err(VirtualError::Duplicate {
                class: key.0,
                name: key.1,
            }
            .into());
        }
        if self.entries.len() >= VirtualIndex::MAX_ENTRIES {
            return Err(VirtualError::TableFull(self.entries.len()).into());
        }

        self.entries.push(VirtualEntry {
            class: key.0.clone(),
            name: key.1.clone(),
            adapter: Box::new(adapter),
        });
        let index = VirtualIndex::from_raw(self.entries.len() as u8)
            .ok_or(VirtualError::TableFull(self.entries.len()))?;
        tracing::debug!(target: "ffi.virtuals", class, name, index = index.get(), "virtual registered");
        self.index.insert(key, index);
        Ok(index)
    }

    impl_register_fn!(
        /// Registers a callback taking no arguments.
        register_fn0, 0;
    );
    impl_register_fn!(register_fn1, 1; a: A @ 0);
    impl_register_fn!(register_fn2, 2; a: A @ 0, b: B @ 1);
    impl_register_fn!(register_fn3, 3; a: A @ 0, b: B @ 1, c: C @ 2);
    impl_register_fn!(register_fn4, 4; a: A @ 0, b: B @ 1, c: C @ 2, d: D @ 3);

    /// Registers the `Node` virtuals `T` overrides.
    pub fn register_node<T: NodeVirtuals>(&mut self, class: &str) -> BindingResult<()> {
        for op in T::overrides() {
            let name = op.native_name();
            match op {
                NodeVirtual::Ready => self.register_fn0(class, name, |this: &mut T| this.ready())?,
                NodeVirtual::Process => {
                    self.register_fn1(class, name, |this: &mut T, delta: f64| this.process(delta))?
                }
                NodeVirtual::PhysicsProcess => self.register_fn1(class, name, |this: &mut T, delta: f64| {
                    this.physics_process(delta)
                })?,
                NodeVirtual::EnterTree => {
                    self.register_fn0(class, name, |this: &mut T| this.enter_tree())?
                }
                NodeVirtual::ExitTree => self.register_fn0(class, name, |this: &mut T| this.exit_tree())?,
                NodeVirtual::ToString => {
                    self.register_fn0(class, name, |this: &mut T| this.to_display_string())?
                }
            };
        }
        Ok(())
    }

    /// Registers the `Resource` virtuals `T` overrides.
    pub fn register_resource<T: ResourceVirtuals>(&mut self, class: &str) -> BindingResult<()> {
        for op in T::overrides() {
            let name = op.native_name();
            match op {
                ResourceVirtual::GetRid => self.register_fn0(class, name, |this: &mut T| this.get_rid())?,
                ResourceVirtual::ResetState => {
                    self.register_fn0(class, name, |this: &mut T| this.reset_state())?
                }
            };
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the table.
    pub fn build(self) -> VirtualTable {
        tracing::debug!(target: "ffi.virtuals", entries = self.entries.len(), "virtual table built");
        VirtualTable {
            entries: self.entries,
            index: self.index,
        }
    }
}

/// Immutable `(class, name) → adapter` table.
#[derive(Default)]
pub struct VirtualTable {
    entries: Vec<VirtualEntry>,
    index: HashMap<(String, String), VirtualIndex>,
}

impl VirtualTable {
    /// Looks up a virtual registered directly on `class`.
    pub fn get_virtual_index(&self, class: &str, name: &str) -> Option<VirtualIndex> {
        self.index.get(&(class.to_string(), name.to_string())).copied()
    }

    /// Looks up a virtual on `class` or its nearest registered ancestor.
    pub fn resolve(&self, registry: &ClassRegistry, class: &str, name: &str) -> Option<VirtualIndex> {
        std::iter::once(class)
            .chain(registry.ancestors(class))
            .find_map(|candidate| self.get_virtual_index(candidate, name))
    }

    /// Wire form of [`VirtualTable::resolve`]: `0` when absent.
    pub fn raw_index(&self, registry: &ClassRegistry, class: &str, name: &str) -> u8 {
        self.resolve(registry, class, name).map_or(0, VirtualIndex::get)
    }

    pub fn name(&self, index: VirtualIndex) -> Option<(&str, &str)> {
        self.entries
            .get(index.slot())
            .map(|entry| (entry.class.as_str(), entry.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the adapter at `index` inside a fresh Lifetime.
    pub fn call(
        &self,
        index: VirtualIndex,
        native: &Arc<dyn NativeInterface>,
        mode: LifetimeMode,
        instance: &mut dyn Any,
        args: &[&[Word]],
        ret: &mut [Word],
    ) -> BindingResult<()> {
        let entry = self
            .entries
            .get(index.slot())
            .ok_or(VirtualError::UnknownIndex(index.get()))?;

        let lifetime = Lifetime::begin(Arc::clone(native), mode);
        let result = {
            let mut call = VirtualCall {
                name: &entry.name,
                args,
                ret,
                lifetime: &lifetime,
            };
            (entry.adapter)(instance, &mut call)
        };
        let released = lifetime.end()?;
        tracing::trace!(
            target: "ffi.virtuals",
            class = %entry.class,
            name = %entry.name,
            released,
            "virtual call"
        );
        result
    }

    /// Entry point for engine trampolines: errors cannot cross the ABI, so
    /// they are logged and reported as `false`.
    pub fn call_from_engine(
        &self,
        raw_index: u8,
        native: &Arc<dyn NativeInterface>,
        mode: LifetimeMode,
        instance: &mut dyn Any,
        args: &[&[Word]],
        ret: &mut [Word],
    ) -> bool {
        let Some(index) = VirtualIndex::from_raw(raw_index) else {
            tracing::error!(target: "ffi.virtuals", "engine called unregistered virtual index 0");
            return false;
        };
        match self.call(index, native, mode, instance, args, ret) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: "ffi.virtuals", index = raw_index, error = %err, "virtual call failed");
                false
            }
        }
    }
}

impl fmt::Debug for VirtualTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|entry| (&entry.class, &entry.name)))
            .finish()
    }
}

/// Overridable `Node` virtuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeVirtual {
    Ready,
    Process,
    PhysicsProcess,
    EnterTree,
    ExitTree,
    ToString,
}

impl NodeVirtual {
    pub const ALL: [NodeVirtual; 6] = [
        NodeVirtual::Ready,
        NodeVirtual::Process,
        NodeVirtual::PhysicsProcess,
        NodeVirtual::EnterTree,
        NodeVirtual::ExitTree,
        NodeVirtual::ToString,
    ];

    pub const fn native_name(self) -> &'static str {
        match self {
            NodeVirtual::Ready => "_ready",
            NodeVirtual::Process => "_process",
            NodeVirtual::PhysicsProcess => "_physics_process",
            NodeVirtual::EnterTree => "_enter_tree",
            NodeVirtual::ExitTree => "_exit_tree",
            NodeVirtual::ToString => "_to_string",
        }
    }
}

/// Host-side overrides of `Node` virtuals.
pub trait NodeVirtuals: Any + Send {
    /// The virtuals this type actually overrides.
    fn overrides() -> &'static [NodeVirtual]
    where
        Self: Sized;

    fn ready(&mut self) {}
    fn process(&mut self, _delta: f64) {}
    fn physics_process(&mut self, _delta: f64) {}
    fn enter_tree(&mut self) {}
    fn exit_tree(&mut self) {}
    fn to_display_string(&mut self) -> String {
        String::new()
    }
}

/// Overridable `Resource` virtuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceVirtual {
    GetRid,
    ResetState,
}

impl ResourceVirtual {
    pub const ALL: [ResourceVirtual; 2] = [ResourceVirtual::GetRid, ResourceVirtual::ResetState];

    pub const fn native_name(self) -> &'static str {
        match self {
            ResourceVirtual::GetRid => "_get_rid",
            ResourceVirtual::ResetState => "_reset_state",
        }
    }
}

/// Host-side overrides of `Resource` virtuals.
///
/// Scene-local duplication is not a virtual; see
/// [`crate::classes::resource::LocalToSceneStrategy`].
pub trait ResourceVirtuals: Any + Send {
    fn overrides() -> &'static [ResourceVirtual]
    where
        Self: Sized;

    fn get_rid(&mut self) -> u64 {
        0
    }
    fn reset_state(&mut self) {}
}
