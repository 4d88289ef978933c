//! Marshalling and lifetime core (FFI)
//!
//! Generated per-class engine bindings call into this layer to move values
//! across the native boundary and to decide who releases them.
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Wrappers / generated per-class bindings           │
//! │      (method_signature! types, ExtensionClass impls)        │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ invoke::<S>                  │ engine callback
//!                v                              v
//! ┌──────────────────────────────┐  ┌───────────────────────────┐
//! │  MethodBindingTable (cache)  │  │  VirtualTable (u8 index)  │
//! │  FramePool -> CallFrame      │  │  NodeVirtuals / ...       │
//! └──────────────┬───────────────┘  └─────────────┬─────────────┘
//!                │                                │
//!                v                                v
//! ┌─────────────────────────────────────────────────────────────┐
//! │   ToWire / FromWire codecs  +  ownership policy table       │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            v
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Lifetime: every handle registered once, released once     │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            v
//!                   dyn NativeInterface
//! ```

pub mod callframe;
pub mod classes;
pub mod codec;
pub mod frame_pool;
pub mod handle;
pub mod invoke;
pub mod lifetime;
pub mod method_table;
pub mod ownership;
pub mod variant;
pub mod virtuals;


pub use callframe::{CallFrame, MAX_FRAME_ARGS};
pub use classes::{ClassInfo, ClassRegistry, ExtensionClass};
pub use codec::{DecodeContext, FromWire, IntWidth, NativeString, ObjectRef, ToWire, Utf8Bytes};
pub use frame_pool::{FramePool, FramePoolStats};
pub use handle::{Handle, HandleKind, InstanceId, ObjectPtr, PackedKind, Word, MAX_VALUE_WORDS};
pub use invoke::{invoke, invoke_dynamic, invoke_static, CallContext, MethodSignature};
pub use lifetime::{HandleKey, Lifetime, LifetimeMode, LifetimeStats, Owned};
pub use method_table::{MethodBindingTable, MethodKey, MethodTableStats};
pub use ownership::{decode_strategy, DecodeStrategy, Intent, ReturnKind};
pub use variant::{Variant, VariantArray, VariantType};
pub use virtuals::{
    NodeVirtual, NodeVirtuals, ResourceVirtual, ResourceVirtuals, VirtualCall, VirtualIndex, VirtualTable,
    VirtualTableBuilder,
};
