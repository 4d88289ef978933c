//! # Game Engine FFI
//!
//! Foreign value marshalling and handle lifetimes for native engine bindings.
//!
//! ## Features
//!
//! - **Lifetimes**: every engine-allocated handle the host touches is registered once and released once
//! - **Codecs**: strings, packed arrays, Variants and object pointers to and from raw engine words
//! - **Call Frames**: pooled argument storage for pointer calls, checked against a fixed capacity
//! - **Method Cache**: process-wide `(class, method, hash)` → method pointer table
//! - **Virtual Dispatch**: small-integer indices for host overrides of engine virtuals
//! - **Backends**: an in-process headless engine and a `get_proc_address` dynamic library loader
//!
//! ## Architecture Design
//!
//! Wrappers never talk to the engine directly. They describe a method with
//! [`method_signature!`] and call [`bindings::invoke`], which encodes the
//! arguments, makes the pointer call and decodes the return under the
//! ownership policy for that method:
//!
//! ```
//! use game_engine_ffi::classes::{FileAccess, ModeFlags};
//! use game_engine_ffi::core::BindingRuntime;
//! use game_engine_ffi::config::FfiConfig;
//!
//! let runtime = BindingRuntime::builder(FfiConfig::default()).build()?;
//! runtime.scope(|cx| -> game_engine_ffi::core::BindingResult<()> {
//!     let file = FileAccess::open(cx, "user://save.dat", ModeFlags::Write)?;
//!     file.store_string(cx, "hello")?;
//!     file.close(cx)
//! })??;
//! # Ok::<(), game_engine_ffi::core::BindingError>(())
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Errors, macros and the binding runtime
//! - [`bindings`]: Marshalling, frames, method cache and Lifetimes
//! - [`classes`]: Engine class wrappers
//! - [`config`]: Configuration
//! - [`native`]: Engine interface and backends

/// Errors, macros and the binding runtime
#[macro_use]
pub mod core;
/// Value marshalling, call frames and handle lifetimes
pub mod bindings;
/// Wrappers for engine classes
pub mod classes;
/// Configuration system
pub mod config;
/// Engine interface and backends
pub mod native;

pub use crate::bindings::{CallContext, Lifetime, LifetimeMode, ObjectRef, Variant};
pub use crate::core::{BindingError, BindingResult, BindingRuntime};
