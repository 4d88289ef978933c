//! Opaque native references.
//!
//! A [`Handle`] is one to three machine words naming a value that lives in
//! native storage, tagged with the release routine it needs.

use crate::bindings::variant::VariantType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One ABI word. Every argument and return value is a whole number of words.
pub type Word = u64;

/// Largest value the ABI passes inline (a Variant).
pub const MAX_VALUE_WORDS: usize = 3;

/// Raw engine object pointer. `0` is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectPtr(pub Word);

impl ObjectPtr {
    pub const NULL: ObjectPtr = ObjectPtr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Engine object identity. `0` never names a live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// Element type of a packed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackedKind {
    Byte,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl PackedKind {
    pub const ALL: [PackedKind; 5] = [
        PackedKind::Byte,
        PackedKind::Int32,
        PackedKind::Int64,
        PackedKind::Float32,
        PackedKind::Float64,
    ];

    pub const fn element_size(self) -> usize {
        match self {
            PackedKind::Byte => 1,
            PackedKind::Int32 | PackedKind::Float32 => 4,
            PackedKind::Int64 | PackedKind::Float64 => 8,
        }
    }

    pub const fn variant_type(self) -> VariantType {
        match self {
            PackedKind::Byte => VariantType::PackedByteArray,
            PackedKind::Int32 => VariantType::PackedInt32Array,
            PackedKind::Int64 => VariantType::PackedInt64Array,
            PackedKind::Float32 => VariantType::PackedFloat32Array,
            PackedKind::Float64 => VariantType::PackedFloat64Array,
        }
    }

    pub fn from_variant_type(ty: VariantType) -> Option<Self> {
        PackedKind::ALL
            .into_iter()
            .find(|kind| kind.variant_type() == ty)
    }
}

/// What a handle refers to, and therefore how it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    String,
    StringName,
    Packed(PackedKind),
    Array,
    Variant,
    /// Plain object; released by destroying it.
    Object,
    /// Reference-counted object; released by dropping one reference.
    RefCounted,
}

impl HandleKind {
    /// Number of ABI words the handle occupies.
    pub const fn width(self) -> usize {
        match self {
            HandleKind::Packed(_) => 2,
            HandleKind::Variant => 3,
            HandleKind::String
            | HandleKind::StringName
            | HandleKind::Array
            | HandleKind::Object
            | HandleKind::RefCounted => 1,
        }
    }

    /// Whether two live registrations of the same handle would free it twice.
    ///
    /// A RefCounted handle may be held once per reference, and scalar
    /// Variants compare equal by value.
    pub const fn is_exclusive(self) -> bool {
        !matches!(self, HandleKind::RefCounted | HandleKind::Variant)
    }
}

/// An opaque reference to a native value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    kind: HandleKind,
    words: [Word; MAX_VALUE_WORDS],
}

impl Handle {
    /// Builds a handle from the first `kind.width()` words of `words`.
    pub fn new(kind: HandleKind, words: &[Word]) -> Self {
        let width = kind.width();
        debug_assert!(
            words.len() >= width,
            "{kind:?} handle needs {width} words, got {}",
            words.len()
        );
        let mut stored = [0; MAX_VALUE_WORDS];
        let count = width.min(words.len());
        stored[..count].copy_from_slice(&words[..count]);
        Self {
            kind,
            words: stored,
        }
    }

    pub fn object(ptr: ObjectPtr, ref_counted: bool) -> Self {
        let kind = if ref_counted {
            HandleKind::RefCounted
        } else {
            HandleKind::Object
        };
        Self::new(kind, &[ptr.0])
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn words(&self) -> &[Word] {
        &self.words[..self.kind.width()]
    }

    /// Exclusive kind with a non-null payload. Empty engine strings and
    /// arrays share the all-zero representation and may legitimately repeat.
    pub fn is_exclusive(&self) -> bool {
        self.kind.is_exclusive() && self.words().iter().any(|&word| word != 0)
    }

    pub fn object_ptr(&self) -> Option<ObjectPtr> {
        match self.kind {
            HandleKind::Object | HandleKind::RefCounted => Some(ObjectPtr(self.words[0])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_width() {
        assert_eq!(HandleKind::String.width(), 1);
        assert_eq!(HandleKind::Packed(PackedKind::Float32).width(), 2);
        assert_eq!(HandleKind::Variant.width(), 3);

        let handle = Handle::new(HandleKind::Packed(PackedKind::Byte), &[7, 3, 99]);
        assert_eq!(handle.words(), &[7, 3]);
        assert_eq!(handle.object_ptr(), None);
    }

    #[test]
    fn test_object_handle() {
        let handle = Handle::object(ObjectPtr(0x40), true);
        assert_eq!(handle.kind(), HandleKind::RefCounted);
        assert_eq!(handle.object_ptr(), Some(ObjectPtr(0x40)));
        assert!(ObjectPtr::NULL.is_null());
        assert!(!InstanceId(0).is_valid());
    }

    #[test]
    fn test_packed_kind_variant_type() {
        for kind in PackedKind::ALL {
            assert_eq!(PackedKind::from_variant_type(kind.variant_type()), Some(kind));
        }
        assert_eq!(PackedKind::from_variant_type(VariantType::String), None);
    }
}
