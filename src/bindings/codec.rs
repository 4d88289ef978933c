//! Type encoder / decoder.
//!
//! [`ToWire`] turns a host value into ABI words, [`FromWire`] reads ABI
//! words back. Encoders that create native values register them in the
//! Lifetime they are given; decoders consult the [`DecodeStrategy`] in their
//! context to decide whether what they read is theirs to release.

use crate::bindings::handle::{Handle, HandleKind, InstanceId, ObjectPtr, PackedKind, Word};
use crate::bindings::lifetime::Lifetime;
use crate::bindings::ownership::{DecodeStrategy, ReturnKind};
use crate::core::error::{BindingError, BindingResult, NativeErrorCode};
use crate::native::NativeInterface;
use serde::{Deserialize, Serialize};

/// Decoder state: where handles go and who owns them.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    lifetime: &'a Lifetime,
    strategy: DecodeStrategy,
}

impl<'a> DecodeContext<'a> {
    pub fn new(lifetime: &'a Lifetime, strategy: DecodeStrategy) -> Self {
        Self { lifetime, strategy }
    }

    pub fn native(&self) -> &'a dyn NativeInterface {
        self.lifetime.native()
    }

    pub fn lifetime(&self) -> &'a Lifetime {
        self.lifetime
    }

    pub fn strategy(&self) -> DecodeStrategy {
        self.strategy
    }

    pub fn with_strategy(&self, strategy: DecodeStrategy) -> Self {
        Self {
            lifetime: self.lifetime,
            strategy,
        }
    }

    /// Registers `handle` when the strategy says the value is ours.
    pub fn claim(&self, handle: Handle) -> BindingResult<()> {
        if self.strategy.owns_value() {
            self.lifetime.try_register(handle)?;
        }
        Ok(())
    }
}

/// Host value → ABI words.
pub trait ToWire {
    /// Number of words written by `encode`.
    const WIDTH: usize;

    /// Kind of native value `encode` creates and registers, if any.
    const OWNED_KIND: Option<HandleKind> = None;

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()>;
}

/// ABI words → host value.
pub trait FromWire: Sized {
    /// Number of words read by `decode`; also the return slot width.
    const WIDTH: usize;

    /// Ownership shape, used to pick a decode strategy.
    const KIND: ReturnKind;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self>;
}

/// Reads exactly `N` words from the front of `words`.
pub(crate) fn take<const N: usize>(words: &[Word]) -> BindingResult<[Word; N]> {
    words
        .get(..N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            BindingError::ReturnSlot(format!("expected {N} words, got {}", words.len()))
        })
}

fn put(out: &mut [Word], words: &[Word]) -> BindingResult<()> {
    match out.get_mut(..words.len()) {
        Some(slot) => {
            slot.copy_from_slice(words);
            Ok(())
        }
        None => Err(BindingError::ReturnSlot(format!(
            "slot of {} words cannot hold {}",
            out.len(),
            words.len()
        ))),
    }
}

impl<T: ToWire + ?Sized> ToWire for &T {
    const WIDTH: usize = T::WIDTH;
    const OWNED_KIND: Option<HandleKind> = T::OWNED_KIND;

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        (**self).encode(lifetime, out)
    }
}

impl ToWire for () {
    const WIDTH: usize = 0;

    fn encode(&self, _lifetime: &Lifetime, _out: &mut [Word]) -> BindingResult<()> {
        Ok(())
    }
}

impl FromWire for () {
    const WIDTH: usize = 0;
    const KIND: ReturnKind = ReturnKind::Void;

    fn decode(_words: &[Word], _cx: &DecodeContext<'_>) -> BindingResult<Self> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

macro_rules! impl_int_wire {
    ($($ty:ty),*) => {
        $(
            impl ToWire for $ty {
                const WIDTH: usize = 1;

                fn encode(&self, _lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
                    put(out, &[*self as i64 as Word])
                }
            }

            impl FromWire for $ty {
                const WIDTH: usize = 1;
                const KIND: ReturnKind = ReturnKind::Scalar;

                fn decode(words: &[Word], _cx: &DecodeContext<'_>) -> BindingResult<Self> {
                    let [word] = take::<1>(words)?;
                    Ok(word as i64 as $ty)
                }
            }
        )*
    };
}

impl_int_wire!(i8, i16, i32, i64, u8, u16, u32, u64);

impl ToWire for bool {
    const WIDTH: usize = 1;

    fn encode(&self, _lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        put(out, &[*self as Word])
    }
}

impl FromWire for bool {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::Scalar;

    fn decode(words: &[Word], _cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let [word] = take::<1>(words)?;
        // The engine's bool is a single byte.
        Ok(word & 0xFF != 0)
    }
}

impl ToWire for f64 {
    const WIDTH: usize = 1;

    fn encode(&self, _lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        put(out, &[self.to_bits()])
    }
}

impl FromWire for f64 {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::Scalar;

    fn decode(words: &[Word], _cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let [word] = take::<1>(words)?;
        Ok(f64::from_bits(word))
    }
}

impl ToWire for f32 {
    const WIDTH: usize = 1;

    fn encode(&self, _lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        put(out, &[(*self as f64).to_bits()])
    }
}

impl FromWire for f32 {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::Scalar;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        f64::decode(words, cx).map(|value| value as f32)
    }
}

impl FromWire for NativeErrorCode {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::Scalar;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        i64::decode(words, cx).map(NativeErrorCode::from_raw)
    }
}

/// Storage width of an integer the engine writes into a file or buffer.
///
/// The engine truncates to the storage width on write; values read back are
/// zero-extended (unsigned) or sign-extended (signed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl IntWidth {
    pub const fn bits(self) -> u32 {
        match self {
            IntWidth::U8 | IntWidth::I8 => 8,
            IntWidth::U16 | IntWidth::I16 => 16,
            IntWidth::U32 | IntWidth::I32 => 32,
            IntWidth::U64 | IntWidth::I64 => 64,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            IntWidth::I8 | IntWidth::I16 | IntWidth::I32 | IntWidth::I64
        )
    }

    pub const fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    const fn mask(self) -> u64 {
        if self.bits() == 64 {
            u64::MAX
        } else {
            (1u64 << self.bits()) - 1
        }
    }

    /// Truncates `value` to the storage width.
    pub const fn store(self, value: i64) -> u64 {
        (value as u64) & self.mask()
    }

    /// Widens stored bits back to an `i64`.
    pub const fn load(self, bits: u64) -> i64 {
        let bits = bits & self.mask();
        if self.is_signed() && self.bits() < 64 {
            let shift = 64 - self.bits();
            ((bits << shift) as i64) >> shift
        } else {
            bits as i64
        }
    }

    /// The value observed after storing `value` and reading it back.
    ///
    /// `IntWidth::U16.wrap(-42) == 65494`.
    pub const fn wrap(self, value: i64) -> i64 {
        self.load(self.store(value))
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

impl ToWire for str {
    const WIDTH: usize = 1;
    const OWNED_KIND: Option<HandleKind> = Some(HandleKind::String);

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        let word = lifetime.native().string_new(self);
        lifetime.register(Handle::new(HandleKind::String, &[word]));
        put(out, &[word])
    }
}

impl ToWire for String {
    const WIDTH: usize = 1;
    const OWNED_KIND: Option<HandleKind> = Some(HandleKind::String);

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        self.as_str().encode(lifetime, out)
    }
}

impl FromWire for String {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::String;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let [word] = take::<1>(words)?;
        cx.claim(Handle::new(HandleKind::String, &[word]))?;
        utf8_to_string(cx.native().string_to_utf8(word))
    }
}

pub(crate) fn utf8_to_string(bytes: Vec<u8>) -> BindingResult<String> {
    String::from_utf8(bytes).map_err(|err| BindingError::InvalidUtf8 {
        valid_up_to: err.utf8_error().valid_up_to(),
    })
}

/// Raw bytes to be sent as a native String once validated as UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct Utf8Bytes<'a>(pub &'a [u8]);

impl ToWire for Utf8Bytes<'_> {
    const WIDTH: usize = 1;
    const OWNED_KIND: Option<HandleKind> = Some(HandleKind::String);

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        let text = std::str::from_utf8(self.0).map_err(|err| BindingError::InvalidUtf8 {
            valid_up_to: err.valid_up_to(),
        })?;
        text.encode(lifetime, out)
    }
}

/// A native String kept as a handle, without copying its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeString {
    word: Word,
}

impl NativeString {
    pub fn word(&self) -> Word {
        self.word
    }

    /// Copies the contents out.
    pub fn read(&self, native: &dyn NativeInterface) -> BindingResult<String> {
        utf8_to_string(native.string_to_utf8(self.word))
    }
}

impl FromWire for NativeString {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::String;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let [word] = take::<1>(words)?;
        cx.claim(Handle::new(HandleKind::String, &[word]))?;
        Ok(NativeString { word })
    }
}

impl ToWire for NativeString {
    const WIDTH: usize = 1;

    fn encode(&self, _lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        put(out, &[self.word])
    }
}

// ---------------------------------------------------------------------------
// Packed arrays
// ---------------------------------------------------------------------------

/// Element type of a packed array.
pub trait PackedElement: bytemuck::Pod {
    const KIND: PackedKind;
}

impl PackedElement for u8 {
    const KIND: PackedKind = PackedKind::Byte;
}

impl PackedElement for i32 {
    const KIND: PackedKind = PackedKind::Int32;
}

impl PackedElement for i64 {
    const KIND: PackedKind = PackedKind::Int64;
}

impl PackedElement for f32 {
    const KIND: PackedKind = PackedKind::Float32;
}

impl PackedElement for f64 {
    const KIND: PackedKind = PackedKind::Float64;
}

pub(crate) fn encode_packed(
    lifetime: &Lifetime,
    kind: PackedKind,
    bytes: &[u8],
) -> [Word; 2] {
    let words = lifetime.native().packed_new(kind, bytes);
    lifetime.register(Handle::new(HandleKind::Packed(kind), &words));
    words
}

pub(crate) fn bytes_to_elements<T: PackedElement>(bytes: &[u8]) -> BindingResult<Vec<T>> {
    if bytes.len() % std::mem::size_of::<T>() != 0 {
        return Err(BindingError::PackedLength {
            kind: T::KIND,
            len: bytes.len(),
        });
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

impl<T: PackedElement> ToWire for [T] {
    const WIDTH: usize = 2;
    const OWNED_KIND: Option<HandleKind> = Some(HandleKind::Packed(T::KIND));

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        let words = encode_packed(lifetime, T::KIND, bytemuck::cast_slice(self));
        put(out, &words)
    }
}

impl<T: PackedElement> ToWire for Vec<T> {
    const WIDTH: usize = 2;
    const OWNED_KIND: Option<HandleKind> = Some(HandleKind::Packed(T::KIND));

    fn encode(&self, lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        self.as_slice().encode(lifetime, out)
    }
}

impl<T: PackedElement> FromWire for Vec<T> {
    const WIDTH: usize = 2;
    const KIND: ReturnKind = ReturnKind::PackedArray;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let words = take::<2>(words)?;
        cx.claim(Handle::new(HandleKind::Packed(T::KIND), &words))?;
        let bytes = cx.native().packed_to_bytes(T::KIND, &words);
        bytes_to_elements(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// A checked reference to an engine object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    ptr: ObjectPtr,
    id: InstanceId,
}

impl ObjectRef {
    /// Wraps a pointer the caller knows to be live.
    pub fn from_ptr(native: &dyn NativeInterface, ptr: ObjectPtr) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        Some(Self {
            ptr,
            id: native.instance_id(ptr),
        })
    }

    pub fn ptr(&self) -> ObjectPtr {
        self.ptr
    }

    pub fn instance_id(&self) -> InstanceId {
        self.id
    }

    /// Whether the engine still maps this instance id to this pointer.
    pub fn is_alive(&self, native: &dyn NativeInterface) -> bool {
        self.id.is_valid() && native.object_from_instance_id(self.id) == self.ptr
    }
}

pub(crate) fn decode_object(ptr: ObjectPtr, cx: &DecodeContext<'_>) -> BindingResult<ObjectRef> {
    let native = cx.native();
    let id = native.instance_id(ptr);
    match cx.strategy() {
        DecodeStrategy::TransferredToHost => {
            let ref_counted = native.is_ref_counted(ptr);
            cx.lifetime().try_register(Handle::object(ptr, ref_counted))?;
        }
        DecodeStrategy::BorrowedAssertInstance => {
            if !id.is_valid() || native.object_from_instance_id(id) != ptr {
                return Err(BindingError::StaleInstance(id.0));
            }
        }
        DecodeStrategy::Plain => {}
        strategy @ (DecodeStrategy::RegisterOwned | DecodeStrategy::BorrowedValue) => {
            return Err(BindingError::Ownership(format!(
                "{strategy:?} cannot be applied to an object"
            )));
        }
    }
    Ok(ObjectRef { ptr, id })
}

impl FromWire for ObjectRef {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::Object;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let [word] = take::<1>(words)?;
        let ptr = ObjectPtr(word);
        if ptr.is_null() {
            return Err(BindingError::NullObject);
        }
        decode_object(ptr, cx)
    }
}

impl FromWire for Option<ObjectRef> {
    const WIDTH: usize = 1;
    const KIND: ReturnKind = ReturnKind::Object;

    fn decode(words: &[Word], cx: &DecodeContext<'_>) -> BindingResult<Self> {
        let [word] = take::<1>(words)?;
        let ptr = ObjectPtr(word);
        if ptr.is_null() {
            return Ok(None);
        }
        decode_object(ptr, cx).map(Some)
    }
}

impl ToWire for ObjectRef {
    const WIDTH: usize = 1;

    fn encode(&self, _lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        put(out, &[self.ptr.0])
    }
}

impl ToWire for Option<ObjectRef> {
    const WIDTH: usize = 1;

    fn encode(&self, _lifetime: &Lifetime, out: &mut [Word]) -> BindingResult<()> {
        put(out, &[self.map_or(0, |object| object.ptr.0)])
    }
}
