//! Ownership policy table.
//!
//! Decides, per (return kind, call intent), who owns a value coming back
//! across the boundary and therefore whether the active Lifetime releases it.

use crate::core::error::{BindingError, BindingResult};
use serde::{Deserialize, Serialize};

/// Shape of a decoded value, as far as ownership is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnKind {
    Void,
    Scalar,
    String,
    PackedArray,
    Array,
    Variant,
    Object,
    RefCounted,
}

/// Why a method hands a value back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    /// Ordinary by-value result.
    Value,
    /// Creates a new object for the caller (`open`, `duplicate`, `new`).
    Factory,
    /// Returns an object someone else keeps alive (`get_parent`, `get_child`).
    Accessor,
    /// Returns an engine singleton.
    Singleton,
    /// An argument the engine passes into a host callback; the engine keeps it.
    CallbackArgument,
}

/// How the decoder treats the native value it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecodeStrategy {
    /// Nothing to own.
    Plain,
    /// Builtin composite owned by the caller; registered for release.
    RegisterOwned,
    /// Object ownership moves to the host; registered for destroy/unreference.
    TransferredToHost,
    /// Object owned elsewhere; instance id is checked, never registered.
    BorrowedAssertInstance,
    /// Builtin composite owned by the engine; read without registering.
    BorrowedValue,
}

impl DecodeStrategy {
    /// Whether the decoder must register what it reads in the Lifetime.
    pub fn owns_value(self) -> bool {
        matches!(
            self,
            DecodeStrategy::RegisterOwned | DecodeStrategy::TransferredToHost
        )
    }
}

use DecodeStrategy::*;
use Intent::*;

const POLICY_TABLE: &[(ReturnKind, Intent, DecodeStrategy)] = &[
    (ReturnKind::Void, Value, Plain),
    (ReturnKind::Void, CallbackArgument, Plain),
    (ReturnKind::Scalar, Value, Plain),
    (ReturnKind::Scalar, Accessor, Plain),
    (ReturnKind::Scalar, CallbackArgument, Plain),
    (ReturnKind::String, Value, RegisterOwned),
    (ReturnKind::String, Accessor, RegisterOwned),
    (ReturnKind::String, CallbackArgument, BorrowedValue),
    (ReturnKind::PackedArray, Value, RegisterOwned),
    (ReturnKind::PackedArray, Accessor, RegisterOwned),
    (ReturnKind::PackedArray, CallbackArgument, BorrowedValue),
    (ReturnKind::Array, Value, RegisterOwned),
    (ReturnKind::Array, Accessor, RegisterOwned),
    (ReturnKind::Array, CallbackArgument, BorrowedValue),
    (ReturnKind::Variant, Value, RegisterOwned),
    (ReturnKind::Variant, Accessor, RegisterOwned),
    (ReturnKind::Variant, CallbackArgument, BorrowedValue),
    (ReturnKind::Object, Factory, TransferredToHost),
    (ReturnKind::Object, Accessor, BorrowedAssertInstance),
    (ReturnKind::Object, Singleton, BorrowedAssertInstance),
    (ReturnKind::Object, CallbackArgument, BorrowedAssertInstance),
    (ReturnKind::RefCounted, Value, TransferredToHost),
    (ReturnKind::RefCounted, Factory, TransferredToHost),
    (ReturnKind::RefCounted, Accessor, TransferredToHost),
    (ReturnKind::RefCounted, CallbackArgument, BorrowedAssertInstance),
];

/// Looks up the decode strategy for a return kind and intent.
///
/// Combinations absent from the table (a scalar "factory", a plain object
/// returned by value) are binding-generation errors.
pub fn decode_strategy(kind: ReturnKind, intent: Intent) -> BindingResult<DecodeStrategy> {
    POLICY_TABLE
        .iter()
        .find(|(k, i, _)| *k == kind && *i == intent)
        .map(|&(_, _, strategy)| strategy)
        .ok_or_else(|| {
            BindingError::Ownership(format!(
                "no ownership rule for {kind:?} returned with intent {intent:?}"
            ))
        })
}

/// Rows of the policy table, for documentation and diagnostics.
pub fn policy_table() -> &'static [(ReturnKind, Intent, DecodeStrategy)] {
    POLICY_TABLE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_object_strategies() {
        assert_eq!(
            decode_strategy(ReturnKind::Object, Factory).unwrap(),
            TransferredToHost
        );
        assert_eq!(
            decode_strategy(ReturnKind::Object, Accessor).unwrap(),
            BorrowedAssertInstance
        );
        assert_eq!(
            decode_strategy(ReturnKind::RefCounted, Factory).unwrap(),
            TransferredToHost
        );
    }

    #[test]
    fn test_builtin_strategies() {
        assert_eq!(decode_strategy(ReturnKind::Scalar, Value).unwrap(), Plain);
        assert_eq!(
            decode_strategy(ReturnKind::String, Value).unwrap(),
            RegisterOwned
        );
        assert_eq!(
            decode_strategy(ReturnKind::Variant, CallbackArgument).unwrap(),
            BorrowedValue
        );
    }

    #[test]
    fn test_missing_rule_is_an_error() {
        assert!(matches!(
            decode_strategy(ReturnKind::Scalar, Factory),
            Err(BindingError::Ownership(_))
        ));
        assert!(decode_strategy(ReturnKind::Object, Value).is_err());
    }

    #[test]
    fn test_table_has_no_duplicate_rows() {
        let mut seen = HashSet::new();
        for (kind, intent, _) in policy_table() {
            assert!(seen.insert((*kind, *intent)), "duplicate rule {kind:?}/{intent:?}");
        }
    }

    #[test]
    fn test_borrowed_strategies_never_own() {
        for (_, intent, strategy) in policy_table() {
            if *intent == CallbackArgument {
                assert!(!strategy.owns_value());
            }
        }
    }
}
