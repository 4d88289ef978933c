//! Variant: the engine's tagged dynamic value.
//!
//! Wire layout is three words: the type tag, then a two-word payload.
//! Scalars use the first payload word; `Vector2` packs two `f32` into it;
//! `Vector3` and `Color` pack three or four `f32` across both; objects carry
//! `(instance id, pointer)`; strings and arrays carry native handle words.

use crate::bindings::codec::{
    bytes_to_elements, decode_object, encode_packed, take, utf8_to_string, DecodeContext,
    FromWire, ObjectRef, PackedElement, ToWire,
};
use crate::bindings::handle::{Handle, HandleKind, ObjectPtr, PackedKind, Word, MAX_VALUE_WORDS};
use crate::bindings::lifetime::Lifetime;
use crate::bindings::ownership::{DecodeStrategy, ReturnKind};
use crate::core::error::{BindingError, BindingResult};
use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Engine variant type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum VariantType {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    String = 4,
    Vector2 = 5,
    Vector2i = 6,
    Rect2 = 7,
    Rect2i = 8,
    Vector3 = 9,
    Vector3i = 10,
    Transform2D = 11,
    Vector4 = 12,
    Vector4i = 13,
    Plane = 14,
    Quaternion = 15,
    Aabb = 16,
    Basis = 17,
    Transform3D = 18,
    Projection = 19,
    Color = 20,
    StringName = 21,
    NodePath = 22,
    Rid = 23,
    Object = 24,
    Callable = 25,
    Signal = 26,
    Dictionary = 27,
    Array = 28,
    PackedByteArray = 29,
    PackedInt32Array = 30,
    PackedInt64Array = 31,
    PackedFloat32Array = 32,
    PackedFloat64Array = 33,
    PackedStringArray = 34,
    PackedVector2Array = 35,
    PackedVector3Array = 36,
    PackedColorArray = 37,
    PackedVector4Array = 38,
}

impl VariantType {
    const ALL: [VariantType; 39] = [
        VariantType::Nil,
        VariantType::Bool,
        VariantType::Int,
        VariantType::Float,
        VariantType::String,
        VariantType::Vector2,
        VariantType::Vector2i,
        VariantType::Rect2,
        VariantType::Rect2i,
        VariantType::Vector3,
        VariantType::Vector3i,
        VariantType::Transform2D,
        VariantType::Vector4,
        VariantType::Vector4i,
        VariantType::Plane,
        VariantType::Quaternion,
        VariantType::Aabb,
        VariantType::Basis,
        VariantType::Transform3D,
        VariantType::Projection,
        VariantType::Color,
        VariantType::StringName,
        VariantType::NodePath,
        VariantType::Rid,
        VariantType::Object,
        VariantType::Callable,
        VariantType::Signal,
        VariantType::Dictionary,
        VariantType::Array,
        VariantType::PackedByteArray,
        VariantType::PackedInt32Array,
        VariantType::PackedInt64Array,
        VariantType::PackedFloat32Array,
        VariantType::PackedFloat64Array,
        VariantType::PackedStringArray,
        VariantType::PackedVector2Array,
        VariantType::PackedVector3Array,
        VariantType::PackedColorArray,
        VariantType::PackedVector4Array,
    ];

    pub fn from_raw(tag: u64) -> Option<Self> {
        usize::try_from(tag)
            .ok()
            .and_then(|index| Self::ALL.get(index).copied())
    }

    pub const fn to_raw(self) -> u32 {
        self as u32
    }
}

/// Generic engine array (a list of Variants), copied at the boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantArray(pub Vec<Variant>);

/// Host form of a Variant.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Vector2(Vec2),
    Vector3(Vec3),
    /// RGBA.
    Color(Vec4),
    Object(Option<ObjectRef>),
    Array(VariantArray),
    PackedByteArray(Vec<u8>),
    PackedInt32Array(Vec<i32>),
    PackedInt64Array(Vec<i64>),
    PackedFloat32Array(Vec<f32>),
    PackedFloat64Array(Vec<f64>),
}

impl Variant {
    pub fn get_type(&self) -> VariantType {
        match self {
            Variant::Nil => VariantType::Nil,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int(_) => VariantType::Int,
            Variant::Float(_) => VariantType::Float,
            Variant::String(_) => VariantType::String,
            Variant::Vector2(_) => VariantType::Vector2,
            Variant::Vector3(_) => VariantType::Vector3,
            Variant::Color(_) => VariantType::Color,
            Variant::Object(_) => VariantType::Object,
            Variant::Array(_) => VariantType::Array,
            Variant::PackedByteArray(_) => VariantType::PackedByteArray,
            Variant::PackedInt32Array(_) => VariantType::PackedInt32Array,
            Variant::PackedInt64Array(_) => VariantType::PackedInt64Array,
            Variant::PackedFloat32Array(_) => VariantType::PackedFloat32Array,
            Variant::PackedFloat64Array(_) => VariantType::PackedFloat64Array,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    fn mismatch(&self, expected: VariantType) -> BindingError {
        BindingError::VariantMismatch {
            expected,
            found: self.get_type(),
        }
    }

    pub fn to_bool(&self) -> BindingResult<bool> {
        match self {
            Variant::Bool(value) => Ok(*value),
            other => Err(other.mismatch(VariantType::Bool)),
        }
    }

    pub fn to_int(&self) -> BindingResult<i64> {
        match self {
            Variant::Int(value) => Ok(*value),
            other => Err(other.mismatch(VariantType::Int)),
        }
    }

    pub fn to_float(&self) -> BindingResult<f64> {
        match self {
            Variant::Float(value) => Ok(*value),
            Variant::Int(value) => Ok(*value as f64),
            other => Err(other.mismatch(VariantType::Float)),
        }
    }

    pub fn as_str(&self) -> BindingResult<&str> {
        match self {
            Variant::String(value) => Ok(value),
            other => Err(other.mismatch(VariantType::String)),
        }
    }

    pub fn to_object(&self) -> BindingResult<Option<ObjectRef>> {
        match self {
            Variant::Object(object) => Ok(*object),
            Variant::Nil => Ok(None),
            other => Err(other.mismatch(VariantType::Object)),
        }
    }

    /// Creates the payload words, registering any composite it allocates.
    fn encode_payload(&self, lifetime: &Lifetime) -> BindingResult<[Word; 2]> {
        let native = lifetime.native();
        let payload: [Word; 2] = match self {
            Variant::Nil => [0, 0],
            Variant::Bool(value) => [*value as Word, 0],
            Variant::Int(value) => [*value as Word, 0],
            Variant::Float(value) => [value.to_bits(), 0],
            Variant::String(text) => {
                let word = native.string_new(text);
                lifetime.register(Handle::new(HandleKind::String, &[word]));
                [word, 0]
            }
            Variant::Vector2(v) => [bytemuck::cast(v.to_array()), 0],
            Variant::Vector3(v) => bytemuck::cast([v.x, v.y, v.z, 0.0f32]),
            Variant::Color(c) => bytemuck::cast(c.to_array()),
            Variant::Object(object) => [object.map_or(0, |o| o.ptr().0), 0],
            Variant::Array(array) => [encode_array(array, lifetime)?, 0],
            Variant::PackedByteArray(values) => encode_packed(lifetime, PackedKind::Byte, values),
            Variant::PackedInt32Array(values) => {
                encode_packed(lifetime, PackedKind::Int32, bytemuck::cast_slice(values))
            }
            Variant::PackedInt64Array(values) => {
                encode_packed(lifetime, PackedKind::Int64, bytemuck::cast_slice(values))
            }
            Variant::PackedFloat32Array(values) => {
                encode_packed(lifetime, PackedKind::Float32, bytemuck::cast_slice(values))
            }
            Variant::PackedFloat64Array(values) => {
                encode_packed(lifetime, PackedKind::Float64, bytemuck::cast_slice(values))
            }
        };
        Ok(payload)
    }
}

fn encode_array(array: &VariantArray, lifetime: &Lifetime) -> BindingResult<Word> {
    let mut elements = Vec::with_capacity(array.0.len());
    for element in &array.0 {
        let mut words = [0; MAX_VALUE_WORDS];
        element.encode(lifetime, &mut words)?;
        elements.push(words);
    }
    let word = lifetime.native().array_new(&elements);
    lifetime.register(Handle::new(HandleKind::Array, &[word]));
    Ok(word)
}

fn decode_array(word: Word, lifetime: &Lifetime) -> BindingResult<VariantArray> {
    // elements come back as copies owned by us
    let owned = DecodeContext::new(lifetime, DecodeStrategy::RegisterOwned);
    lifetime
        .native()
        .array_to_variants(word)
        .iter()
        .map(|words| Variant::decode(words, &owned))
        .collect::<BindingResult<Vec<_>>>()
        .map(VariantArray)
}

fn decode_packed<T: PackedElement>(
    payload: [Word; 2],
    lifetime: &Lifetime,
) -> BindingResult<Vec<T>> {
    lifetime.register(Handle::new(HandleKind::Packed(T::KIND), &payload));
    let bytes = lifetime.native().packed_to_bytes(T::KIND, &payload);
    bytes_to_elements(&bytes)
}

impl ToWire for Variant {
    const WIDTH: usize = 3;
    const OWNED_KIND: Option<HandleKind> = Some(HandleKind::Variant);

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        let payload = self.encode_payload(lifetime)?;
        let words = lifetime.native().variant_new(self.get_type(), &payload);
        lifetime.register(Handle::new(HandleKind::Variant, &words));
        match out.get_mut(..MAX_VALUE_WORDS) {
            Some(slot) => {
                slot.copy_from_slice(&words);
                Ok(())
            }
            None => Err(BindingError::ReturnSlot(
                "variant needs three words".to_string(),
            )),
        }
    }
}

impl FromWire for Variant {
    const WIDTH: usize = 3;
    const KIND: ReturnKind = ReturnKind::Variant;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let words = take::<3>(words)?;
        cx.claim(Handle::new(HandleKind::Variant, &words))?;

        let native = cx.native();
        let lifetime = cx.lifetime();
        let tag = native.variant_type(&words);
        let ty = VariantType::from_raw(tag).ok_or(BindingError::UnknownVariantType(tag))?;
        if ty == VariantType::Nil {
            return Ok(Variant::Nil);
        }

        let payload = native.variant_payload(&words, ty);
        let value = match ty {
            VariantType::Bool => Variant::Bool(payload[0] & 0xFF != 0),
            VariantType::Int => Variant::Int(payload[0] as i64),
            VariantType::Float => Variant::Float(f64::from_bits(payload[0])),
            VariantType::String => {
                lifetime.register(Handle::new(HandleKind::String, &[payload[0]]));
                Variant::String(utf8_to_string(native.string_to_utf8(payload[0]))?)
            }
            VariantType::Vector2 => {
                let [x, y]: [f32; 2] = bytemuck::cast(payload[0]);
                Variant::Vector2(Vec2::new(x, y))
            }
            VariantType::Vector3 => {
                let [x, y, z, _]: [f32; 4] = bytemuck::cast(payload);
                Variant::Vector3(Vec3::new(x, y, z))
            }
            VariantType::Color => {
                let rgba: [f32; 4] = bytemuck::cast(payload);
                Variant::Color(Vec4::from_array(rgba))
            }
            VariantType::Object => {
                let ptr = ObjectPtr(payload[0]);
                if ptr.is_null() {
                    Variant::Object(None)
                } else {
                    // the variant keeps the object alive
                    let borrowed = cx.with_strategy(DecodeStrategy::BorrowedAssertInstance);
                    Variant::Object(Some(decode_object(ptr, &borrowed)?))
                }
            }
            VariantType::Array => {
                lifetime.register(Handle::new(HandleKind::Array, &[payload[0]]));
                Variant::Array(decode_array(payload[0], lifetime)?)
            }
            VariantType::PackedByteArray => Variant::PackedByteArray(decode_packed(payload, lifetime)?),
            VariantType::PackedInt32Array => {
                Variant::PackedInt32Array(decode_packed(payload, lifetime)?)
            }
            VariantType::PackedInt64Array => {
                Variant::PackedInt64Array(decode_packed(payload, lifetime)?)
            }
            VariantType::PackedFloat32Array => {
                Variant::PackedFloat32Array(decode_packed(payload, lifetime)?)
            }
            VariantType::PackedFloat64Array => {
                Variant::PackedFloat64Array(decode_packed(payload, lifetime)?)
            }
            other => return Err(BindingError::UnsupportedVariant(other)),
        };
        Ok(value)
    }
}

impl ToWire for VariantArray {
    const WIDTH: usize = 1;
    const OWNED_KIND: Option<HandleKind> = Some(HandleKind::Array);

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        let word = encode_array(self, lifetime)?;
        match out.first_mut() {
            Some(slot) => {
                *slot = word;
                Ok(())
            }
            None => Err(BindingError::ReturnSlot("array needs one word".to_string())),
        }
    }
}

impl FromWire for VariantArray {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::Array;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let [word] = take::<1>(words)?;
        cx.claim(Handle::new(HandleKind::Array, &[word]))?;
        decode_array(word, cx.lifetime())
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Variant::Int(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Float(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<Vec2> for Variant {
    fn from(value: Vec2) -> Self {
        Variant::Vector2(value)
    }
}

impl From<Vec3> for Variant {
    fn from(value: Vec3) -> Self {
        Variant::Vector3(value)
    }
}

impl From<ObjectRef> for Variant {
    fn from(value: ObjectRef) -> Self {
        Variant::Object(Some(value))
    }
}

impl From<Vec<u8>> for Variant {
    fn from(value: Vec<u8>) -> Self {
        Variant::PackedByteArray(value)
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(value: Vec<Variant>) -> Self {
        Variant::Array(VariantArray(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::lifetime::LifetimeMode;
    use crate::native::{HeadlessEngine, NativeInterface};
    use std::sync::Arc;

    fn setup() -> (Arc<HeadlessEngine>, Lifetime) {
        let engine = Arc::new(HeadlessEngine::new());
        let lifetime = Lifetime::begin(engine.clone(), LifetimeMode::Strict);
        (engine, lifetime)
    }

    fn roundtrip(value: &Variant, lifetime: &Lifetime) -> Variant {
        let mut words = [0; 3];
        value.encode(lifetime, &mut words).unwrap();
        let cx = DecodeContext::new(lifetime, DecodeStrategy::BorrowedValue);
        Variant::decode(&words, &cx).unwrap()
    }

    #[test]
    fn test_type_tags() {
        assert_eq!(VariantType::from_raw(0), Some(VariantType::Nil));
        assert_eq!(VariantType::from_raw(9), Some(VariantType::Vector3));
        assert_eq!(VariantType::from_raw(20), Some(VariantType::Color));
        assert_eq!(VariantType::from_raw(24), Some(VariantType::Object));
        assert_eq!(VariantType::from_raw(33), Some(VariantType::PackedFloat64Array));
        assert_eq!(VariantType::from_raw(39), None);
        for (index, ty) in VariantType::ALL.iter().enumerate() {
            assert_eq!(ty.to_raw() as usize, index);
        }
    }

    #[test]
    fn test_scalar_and_vector_roundtrip() {
        let (engine, lifetime) = setup();
        let values = [
            Variant::Nil,
            Variant::Bool(true),
            Variant::Int(-42),
            Variant::Float(2.5),
            Variant::Vector2(Vec2::new(1.5, -3.0)),
            Variant::Vector3(Vec3::new(0.5, 1.0, -2.0)),
            Variant::Color(Vec4::new(0.1, 0.2, 0.3, 1.0)),
        ];
        for value in &values {
            assert_eq!(&roundtrip(value, &lifetime), value);
        }
        lifetime.end().unwrap();
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_composite_roundtrip() {
        let (engine, lifetime) = setup();
        let values = [
            Variant::from("variant string"),
            Variant::PackedByteArray(vec![0, 1, 254, 255]),
            Variant::PackedInt32Array(vec![i32::MIN, 7]),
            Variant::PackedFloat64Array(vec![0.125, -1e300]),
            Variant::from(vec![
                Variant::Int(1),
                Variant::from("nested"),
                Variant::from(vec![Variant::Bool(false)]),
            ]),
        ];
        for value in &values {
            assert_eq!(&roundtrip(value, &lifetime), value);
        }
        lifetime.end().unwrap();
        assert_eq!(engine.live_allocations(), 0);
        assert!(engine.violations().is_empty());
    }

    #[test]
    fn test_object_variant() {
        let (engine, lifetime) = setup();
        let ptr = engine.construct_object("Node");
        let object = ObjectRef::from_ptr(engine.as_ref(), ptr).unwrap();
        assert_eq!(
            roundtrip(&Variant::from(object), &lifetime),
            Variant::Object(Some(object))
        );
        assert_eq!(
            roundtrip(&Variant::Object(None), &lifetime),
            Variant::Object(None)
        );
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let (_engine, lifetime) = setup();
        let cx = DecodeContext::new(&lifetime, DecodeStrategy::BorrowedValue);
        assert!(matches!(
            Variant::decode(&[77, 0, 0], &cx),
            Err(BindingError::UnknownVariantType(77))
        ));
    }

    #[test]
    fn test_unsupported_tag_is_an_error() {
        let (engine, lifetime) = setup();
        let words = engine.variant_new(VariantType::Rid, &[5, 0]);
        let cx = DecodeContext::new(&lifetime, DecodeStrategy::BorrowedValue);
        assert!(matches!(
            Variant::decode(&words, &cx),
            Err(BindingError::UnsupportedVariant(VariantType::Rid))
        ));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Variant::Int(3).to_int().unwrap(), 3);
        assert_eq!(Variant::Int(3).to_float().unwrap(), 3.0);
        assert!(matches!(
            Variant::from("x").to_int(),
            Err(BindingError::VariantMismatch {
                expected: VariantType::Int,
                found: VariantType::String
            })
        ));
        assert_eq!(Variant::Nil.to_object().unwrap(), None);
        assert_eq!(Variant::from("x").as_str().unwrap(), "x");
        assert!(Variant::default().is_nil());
    }
}
