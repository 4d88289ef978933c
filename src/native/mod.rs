//! Native interface
//!
//! The seam between the marshalling core and the engine. Everything the
//! core needs from the engine goes through [`NativeInterface`]:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │   Wrappers (FileAccess, Node, Resource, generated code)   │
//! └──────────────────────────┬────────────────────────────────┘
//!                            v
//! ┌───────────────────────────────────────────────────────────┐
//! │  invoke / virtual dispatch / codecs / Lifetime / frames   │
//! └──────────────────────────┬────────────────────────────────┘
//!                            v
//! ┌──────────────────────────┴────────────────────────────────┐
//! │                  dyn NativeInterface                      │
//! │   ┌──────────────────────┐   ┌──────────────────────────┐ │
//! │   │ HeadlessEngine       │   │ ProcAddressInterface     │ │
//! │   │ (in-process engine)  │   │ (get_proc_address table) │ │
//! │   └──────────────────────┘   └──────────────────────────┘ │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Composite values returned by the interface (`string_new`, `packed_new`,
//! `variant_new`, `variant_payload`, pointer-call returns) are owned by the
//! caller until passed to [`NativeInterface::release`].

pub mod dylib;
pub mod headless;

pub use dylib::{LoadError, ProcAddressInterface};
pub use headless::HeadlessEngine;

use crate::bindings::handle::{Handle, InstanceId, ObjectPtr, PackedKind, Word, MAX_VALUE_WORDS};
use crate::bindings::variant::VariantType;
use crate::core::error::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;

/// Opaque engine method pointer. Never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodBind(NonZeroU64);

impl MethodBind {
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn as_raw(self) -> u64 {
        self.0.get()
    }
}

/// Engine version reported at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub label: String,
}

impl EngineVersion {
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Functions the marshalling core needs from the engine.
pub trait NativeInterface: Send + Sync {
    fn version(&self) -> EngineVersion;

    /// Looks up a method pointer. Expensive; callers cache the result.
    fn lookup_method(&self, class: &str, method: &str, hash: i64) -> Option<MethodBind>;

    /// Pointer call: `args` holds each argument's words, `ret` is the return slot.
    fn ptrcall(&self, method: MethodBind, instance: ObjectPtr, args: &[&[Word]], ret: &mut [Word]);

    /// Variant call: every argument and the return value is a 3-word Variant.
    fn call(
        &self,
        method: MethodBind,
        instance: ObjectPtr,
        args: &[&[Word]],
        ret: &mut [Word; MAX_VALUE_WORDS],
    ) -> Result<(), CallError>;

    fn construct_object(&self, class: &str) -> ObjectPtr;

    fn string_new(&self, text: &str) -> Word;
    fn string_to_utf8(&self, string: Word) -> Vec<u8>;

    fn packed_new(&self, kind: PackedKind, bytes: &[u8]) -> [Word; 2];
    fn packed_to_bytes(&self, kind: PackedKind, array: &[Word]) -> Vec<u8>;

    /// Builds a generic array holding copies of the given Variants.
    fn array_new(&self, elements: &[[Word; MAX_VALUE_WORDS]]) -> Word;
    /// Returns owned copies of an array's elements.
    fn array_to_variants(&self, array: Word) -> Vec<[Word; MAX_VALUE_WORDS]>;

    /// Wraps a payload in a new Variant. Composite payloads are copied.
    fn variant_new(&self, ty: VariantType, payload: &[Word]) -> [Word; MAX_VALUE_WORDS];
    /// Raw type tag of a Variant.
    fn variant_type(&self, variant: &[Word]) -> u64;
    /// Extracts the payload of a Variant. Composite payloads are owned copies.
    fn variant_payload(&self, variant: &[Word], ty: VariantType) -> [Word; 2];

    fn instance_id(&self, object: ObjectPtr) -> InstanceId;
    fn object_from_instance_id(&self, id: InstanceId) -> ObjectPtr;
    fn is_ref_counted(&self, object: ObjectPtr) -> bool;

    /// Releases a handle: destroys strings, arrays, variants and plain
    /// objects; drops one reference of a reference-counted object.
    fn release(&self, handle: &Handle);
}
