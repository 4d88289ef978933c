//! Native interface over the engine's extension API.
//!
//! The engine exposes its interface as named C functions looked up through a
//! `get_proc_address` function. [`ProcAddressInterface`] resolves every
//! function it needs up front, so a missing symbol fails at load time rather
//! than in the middle of a call.

use crate::bindings::handle::{Handle, HandleKind, InstanceId, ObjectPtr, PackedKind, Word, MAX_VALUE_WORDS};
use crate::bindings::variant::VariantType;
use crate::core::error::CallError;
use crate::native::{EngineVersion, MethodBind, NativeInterface};
use libloading::Library;
use std::ffi::{c_char, c_void, CStr};
use std::path::Path;
use std::ptr;
use thiserror::Error;

/// The engine's function lookup entry point.
pub type GetProcAddress = unsafe extern "C" fn(*const c_char) -> Option<unsafe extern "C" fn()>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Failed to load engine library: {0}")]
    Library(String),
    #[error("Engine interface function not found: {0}")]
    MissingSymbol(String),
    #[error("Invalid entry point: {0}")]
    EntryPoint(String),
}

#[repr(C)]
struct RawVersion {
    major: u32,
    minor: u32,
    patch: u32,
    string: *const c_char,
}

#[repr(C)]
#[derive(Default)]
struct RawCallError {
    error: i32,
    argument: i32,
    expected: i32,
}

type GetVersionFn = unsafe extern "C" fn(*mut RawVersion);
type GetMethodBindFn = unsafe extern "C" fn(*const c_void, *const c_void, i64) -> *mut c_void;
type ConstructObjectFn = unsafe extern "C" fn(*const c_void) -> *mut c_void;
type GetClassTagFn = unsafe extern "C" fn(*const c_void) -> *mut c_void;
type PtrcallFn = unsafe extern "C" fn(*mut c_void, *mut c_void, *const *const c_void, *mut c_void);
type CallFn =
    unsafe extern "C" fn(*mut c_void, *mut c_void, *const *const c_void, i64, *mut c_void, *mut RawCallError);
type ObjectDestroyFn = unsafe extern "C" fn(*mut c_void);
type GetInstanceIdFn = unsafe extern "C" fn(*const c_void) -> u64;
type GetInstanceFromIdFn = unsafe extern "C" fn(u64) -> *mut c_void;
type CastToFn = unsafe extern "C" fn(*const c_void, *mut c_void) -> *mut c_void;
type StringNewFn = unsafe extern "C" fn(*mut c_void, *const c_char, i64);
type StringToUtf8Fn = unsafe extern "C" fn(*const c_void, *mut c_char, i64) -> i64;
type PtrDestructor = unsafe extern "C" fn(*mut c_void);
type PtrConstructor = unsafe extern "C" fn(*mut c_void, *const *const c_void);
type PtrBuiltinMethod = unsafe extern "C" fn(*mut c_void, *const *const c_void, *mut c_void, i32);
type GetPtrDestructorFn = unsafe extern "C" fn(u32) -> Option<PtrDestructor>;
type GetPtrConstructorFn = unsafe extern "C" fn(u32, i32) -> Option<PtrConstructor>;
type GetPtrBuiltinMethodFn = unsafe extern "C" fn(u32, *const c_void, i64) -> Option<PtrBuiltinMethod>;
type VariantDestroyFn = unsafe extern "C" fn(*mut c_void);
type VariantNewCopyFn = unsafe extern "C" fn(*mut c_void, *const c_void);
type TypeConstructor = unsafe extern "C" fn(*mut c_void, *mut c_void);
type GetTypeConstructorFn = unsafe extern "C" fn(u32) -> Option<TypeConstructor>;
type VariantGetTypeFn = unsafe extern "C" fn(*const c_void) -> u32;
type PackedIndexFn = unsafe extern "C" fn(*mut c_void, i64) -> *mut u8;
type PackedIndexConstFn = unsafe extern "C" fn(*const c_void, i64) -> *const u8;
type ArrayIndexFn = unsafe extern "C" fn(*mut c_void, i64) -> *mut c_void;
type ArrayIndexConstFn = unsafe extern "C" fn(*const c_void, i64) -> *const c_void;

const RESIZE_HASH: i64 = 848867239;
const SIZE_HASH: i64 = 3173160232;
const UNREFERENCE_HASH: i64 = 2240911060;

/// Interface functions, resolved by name.
struct InterfaceTable {
    get_godot_version: GetVersionFn,
    classdb_get_method_bind: GetMethodBindFn,
    classdb_construct_object: ConstructObjectFn,
    classdb_get_class_tag: GetClassTagFn,
    object_method_bind_ptrcall: PtrcallFn,
    object_method_bind_call: CallFn,
    object_destroy: ObjectDestroyFn,
    object_get_instance_id: GetInstanceIdFn,
    object_get_instance_from_id: GetInstanceFromIdFn,
    object_cast_to: CastToFn,
    string_new_with_utf8_chars_and_len: StringNewFn,
    string_to_utf8_chars: StringToUtf8Fn,
    string_name_new_with_utf8_chars_and_len: StringNewFn,
    variant_get_ptr_destructor: GetPtrDestructorFn,
    variant_get_ptr_constructor: GetPtrConstructorFn,
    variant_get_ptr_builtin_method: GetPtrBuiltinMethodFn,
    variant_destroy: VariantDestroyFn,
    variant_new_copy: VariantNewCopyFn,
    get_variant_from_type_constructor: GetTypeConstructorFn,
    get_variant_to_type_constructor: GetTypeConstructorFn,
    variant_get_type: VariantGetTypeFn,
    array_operator_index: ArrayIndexFn,
    array_operator_index_const: ArrayIndexConstFn,
    packed_index: [PackedIndexFn; 5],
    packed_index_const: [PackedIndexConstFn; 5],
}

macro_rules! resolve {
    ($get:expr, $name:literal) => {{
        let symbol = concat!($name, "\0");
        // SAFETY: `symbol` is NUL-terminated and `$get` is the engine's lookup function.
        let raw = unsafe { $get(symbol.as_ptr().cast::<c_char>()) }
            .ok_or_else(|| LoadError::MissingSymbol($name.to_string()))?;
        // SAFETY: the engine defines the signature behind each interface name.
        unsafe { std::mem::transmute::<unsafe extern "C" fn(), _>(raw) }
    }};
}

impl InterfaceTable {
    fn resolve(get: GetProcAddress) -> Result<Self, LoadError> {
        Ok(Self {
            get_godot_version: resolve!(get, "get_godot_version"),
            classdb_get_method_bind: resolve!(get, "classdb_get_method_bind"),
            classdb_construct_object: resolve!(get, "classdb_construct_object"),
            classdb_get_class_tag: resolve!(get, "classdb_get_class_tag"),
            object_method_bind_ptrcall: resolve!(get, "object_method_bind_ptrcall"),
            object_method_bind_call: resolve!(get, "object_method_bind_call"),
            object_destroy: resolve!(get, "object_destroy"),
            object_get_instance_id: resolve!(get, "object_get_instance_id"),
            object_get_instance_from_id: resolve!(get, "object_get_instance_from_id"),
            object_cast_to: resolve!(get, "object_cast_to"),
            string_new_with_utf8_chars_and_len: resolve!(get, "string_new_with_utf8_chars_and_len"),
            string_to_utf8_chars: resolve!(get, "string_to_utf8_chars"),
            string_name_new_with_utf8_chars_and_len: resolve!(get, "string_name_new_with_utf8_chars_and_len"),
            variant_get_ptr_destructor: resolve!(get, "variant_get_ptr_destructor"),
            variant_get_ptr_constructor: resolve!(get, "variant_get_ptr_constructor"),
            variant_get_ptr_builtin_method: resolve!(get, "variant_get_ptr_builtin_method"),
            variant_destroy: resolve!(get, "variant_destroy"),
            variant_new_copy: resolve!(get, "variant_new_copy"),
            get_variant_from_type_constructor: resolve!(get, "get_variant_from_type_constructor"),
            get_variant_to_type_constructor: resolve!(get, "get_variant_to_type_constructor"),
            variant_get_type: resolve!(get, "variant_get_type"),
            array_operator_index: resolve!(get, "array_operator_index"),
            array_operator_index_const: resolve!(get, "array_operator_index_const"),
            // same order as `PackedKind::ALL`
            packed_index: [
                resolve!(get, "packed_byte_array_operator_index"),
                resolve!(get, "packed_int32_array_operator_index"),
                resolve!(get, "packed_int64_array_operator_index"),
                resolve!(get, "packed_float32_array_operator_index"),
                resolve!(get, "packed_float64_array_operator_index"),
            ],
            packed_index_const: [
                resolve!(get, "packed_byte_array_operator_index_const"),
                resolve!(get, "packed_int32_array_operator_index_const"),
                resolve!(get, "packed_int64_array_operator_index_const"),
                resolve!(get, "packed_float32_array_operator_index_const"),
                resolve!(get, "packed_float64_array_operator_index_const"),
            ],
        })
    }
}

/// Per-type builtin operations used for strings, arrays and packed arrays.
struct BuiltinOps {
    destructor: PtrDestructor,
    constructor: Option<PtrConstructor>,
    resize: Option<PtrBuiltinMethod>,
    size: Option<PtrBuiltinMethod>,
}

/// A temporary StringName, destroyed on drop.
struct TempStringName {
    word: Word,
    destroy: PtrDestructor,
}

impl TempStringName {
    fn as_ptr(&self) -> *const c_void {
        ptr::addr_of!(self.word).cast()
    }
}

impl Drop for TempStringName {
    fn drop(&mut self) {
        // SAFETY: `word` was initialized by the StringName constructor.
        unsafe { (self.destroy)(ptr::addr_of_mut!(self.word).cast()) }
    }
}

/// [`NativeInterface`] backed by the engine's extension functions.
pub struct ProcAddressInterface {
    table: InterfaceTable,
    string_ops: BuiltinOps,
    string_name_ops: BuiltinOps,
    array_ops: BuiltinOps,
    packed_ops: [BuiltinOps; 5],
    /// `RefCounted` class tag, kept as an address.
    ref_counted_tag: usize,
    unreference: MethodBind,
    _library: Option<Library>,
}

fn packed_slot(kind: PackedKind) -> usize {
    PackedKind::ALL
        .iter()
        .position(|candidate| *candidate == kind)
        .unwrap_or(0)
}

impl ProcAddressInterface {
    /// Resolves the interface from the lookup function the engine handed over.
    ///
    /// # Safety
    ///
    /// `get_proc_address` must be the engine's lookup function and stay valid
    /// for as long as the returned interface is used.
    pub unsafe fn from_get_proc_address(get_proc_address: GetProcAddress) -> Result<Self, LoadError> {
        Self::resolve(get_proc_address, None)
    }

    /// Loads a shared library exporting `entry_symbol` as a lookup function.
    pub fn load(path: &Path, entry_symbol: &str) -> Result<Self, LoadError> {
        // SAFETY: loading runs the library's initializers; the path comes from configuration.
        let library = unsafe { Library::new(path) }
            .map_err(|err| LoadError::Library(format!("{}: {err}", path.display())))?;
        let get_proc_address: GetProcAddress = {
            // SAFETY: the entry symbol is declared with the `GetProcAddress` signature.
            let symbol = unsafe { library.get::<GetProcAddress>(entry_symbol.as_bytes()) }
                .map_err(|err| LoadError::EntryPoint(format!("{entry_symbol}: {err}")))?;
            *symbol
        };
        tracing::info!(target: "ffi.native", path = %path.display(), entry_symbol, "engine library loaded");
        // SAFETY: the function pointer lives as long as `library`, which the interface keeps.
        unsafe { Self::resolve(get_proc_address, Some(library)) }
    }

    unsafe fn resolve(get: GetProcAddress, library: Option<Library>) -> Result<Self, LoadError> {
        let table = InterfaceTable::resolve(get)?;

        let builtin_ops = |ty: VariantType, sized: bool| -> Result<BuiltinOps, LoadError> {
            let tag = ty.to_raw();
            // SAFETY: resolved interface functions, called with a valid type tag.
            let destructor = unsafe { (table.variant_get_ptr_destructor)(tag) }
                .ok_or_else(|| LoadError::MissingSymbol(format!("{ty:?} destructor")))?;
            if !sized {
                return Ok(BuiltinOps {
                    destructor,
                    constructor: None,
                    resize: None,
                    size: None,
                });
            }
            // SAFETY: as above.
            let constructor = unsafe { (table.variant_get_ptr_constructor)(tag, 0) };
            let method = |name: &str, hash: i64| -> Result<PtrBuiltinMethod, LoadError> {
                let name_ptr = new_string_name(&table, name)?;
                // SAFETY: `name_ptr` points at a live StringName.
                unsafe { (table.variant_get_ptr_builtin_method)(tag, name_ptr.as_ptr(), hash) }
                    .ok_or_else(|| LoadError::MissingSymbol(format!("{ty:?}::{name}")))
            };
            Ok(BuiltinOps {
                destructor,
                constructor,
                resize: Some(method("resize", RESIZE_HASH)?),
                size: Some(method("size", SIZE_HASH)?),
            })
        };

        let string_ops = builtin_ops(VariantType::String, false)?;
        let string_name_ops = builtin_ops(VariantType::StringName, false)?;
        let array_ops = builtin_ops(VariantType::Array, true)?;
        let packed_ops = [
            builtin_ops(VariantType::PackedByteArray, true)?,
            builtin_ops(VariantType::PackedInt32Array, true)?,
            builtin_ops(VariantType::PackedInt64Array, true)?,
            builtin_ops(VariantType::PackedFloat32Array, true)?,
            builtin_ops(VariantType::PackedFloat64Array, true)?,
        ];

        let ref_counted = new_string_name(&table, "RefCounted")?;
        // SAFETY: valid StringName pointer.
        let ref_counted_tag = unsafe { (table.classdb_get_class_tag)(ref_counted.as_ptr()) } as usize;
        let unreference = {
            let method = new_string_name(&table, "unreference")?;
            // SAFETY: valid StringName pointers.
            let raw = unsafe {
                (table.classdb_get_method_bind)(ref_counted.as_ptr(), method.as_ptr(), UNREFERENCE_HASH)
            };
            MethodBind::from_raw(raw as u64)
                .ok_or_else(|| LoadError::MissingSymbol("RefCounted::unreference".to_string()))?
        };
        drop(ref_counted);

        Ok(Self {
            table,
            string_ops,
            string_name_ops,
            array_ops,
            packed_ops,
            ref_counted_tag,
            unreference,
            _library: library,
        })
    }

    fn string_name(&self, text: &str) -> Option<TempStringName> {
        new_string_name(&self.table, text).ok()
    }

    fn builtin_size(&self, ops: &BuiltinOps, value: *const c_void) -> i64 {
        let Some(size) = ops.size else { return 0 };
        let mut count: i64 = 0;
        // SAFETY: `value` points at a live value of the builtin's type.
        unsafe { size(value as *mut c_void, ptr::null(), ptr::addr_of_mut!(count).cast(), 0) };
        count
    }

    fn builtin_resize(&self, ops: &BuiltinOps, value: *mut c_void, len: i64) {
        let Some(resize) = ops.resize else { return };
        let arg: *const c_void = ptr::addr_of!(len).cast();
        let mut error: i64 = 0;
        // SAFETY: one i64 argument, i64 return, `value` is a live value.
        unsafe { resize(value, &arg, ptr::addr_of_mut!(error).cast(), 1) };
        if error != 0 {
            tracing::error!(target: "ffi.native", error, len, "builtin resize failed");
        }
    }

    fn construct_builtin(&self, ops: &BuiltinOps, out: &mut [Word]) {
        if let Some(constructor) = ops.constructor {
            // SAFETY: `out` is large enough for the type; default constructor takes no args.
            unsafe { constructor(out.as_mut_ptr().cast(), ptr::null()) };
        }
    }
}

fn new_string_name(table: &InterfaceTable, text: &str) -> Result<TempStringName, LoadError> {
    let mut word: Word = 0;
    // SAFETY: destination is one word; `text` is valid for `len` bytes.
    let destroy = unsafe { (table.variant_get_ptr_destructor)(VariantType::StringName.to_raw()) }
        .ok_or_else(|| LoadError::MissingSymbol("StringName destructor".to_string()))?;
    unsafe {
        (table.string_name_new_with_utf8_chars_and_len)(
            ptr::addr_of_mut!(word).cast(),
            text.as_ptr().cast(),
            text.len() as i64,
        )
    };
    Ok(TempStringName { word, destroy })
}

impl NativeInterface for ProcAddressInterface {
    fn version(&self) -> EngineVersion {
        let mut raw = RawVersion {
            major: 0,
            minor: 0,
            patch: 0,
            string: ptr::null(),
        };
        // SAFETY: `raw` is a valid out-parameter.
        unsafe { (self.table.get_godot_version)(&mut raw) };
        let label = if raw.string.is_null() {
            String::new()
        } else {
            // SAFETY: the engine returns a static NUL-terminated string.
            unsafe { CStr::from_ptr(raw.string) }.to_string_lossy().into_owned()
        };
        EngineVersion {
            major: raw.major,
            minor: raw.minor,
            patch: raw.patch,
            label,
        }
    }

    fn lookup_method(&self, class: &str, method: &str, hash: i64) -> Option<MethodBind> {
        let class = self.string_name(class)?;
        let method = self.string_name(method)?;
        // SAFETY: both StringNames are live for the call.
        let raw = unsafe { (self.table.classdb_get_method_bind)(class.as_ptr(), method.as_ptr(), hash) };
        MethodBind::from_raw(raw as u64)
    }

    fn ptrcall(&self, method: MethodBind, instance: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
        let arg_ptrs: Vec<*const c_void> = args.iter().map(|words| words.as_ptr().cast()).collect();
        let ret_ptr = if ret.is_empty() {
            ptr::null_mut()
        } else {
            ret.as_mut_ptr().cast()
        };
        // SAFETY: each argument points at its encoded words; the return slot is
        // sized for the method's return type by the caller.
        unsafe {
            (self.table.object_method_bind_ptrcall)(
                method.as_raw() as *mut c_void,
                instance.0 as *mut c_void,
                arg_ptrs.as_ptr(),
                ret_ptr,
            )
        };
    }

    fn call(
        &self,
        method: MethodBind,
        instance: ObjectPtr,
        args: &[&[Word]],
        ret: &mut [Word; MAX_VALUE_WORDS],
    ) -> Result<(), CallError> {
        let arg_ptrs: Vec<*const c_void> = args.iter().map(|words| words.as_ptr().cast()).collect();
        let mut error = RawCallError::default();
        // SAFETY: every argument is a 3-word Variant; `ret` receives a Variant.
        unsafe {
            (self.table.object_method_bind_call)(
                method.as_raw() as *mut c_void,
                instance.0 as *mut c_void,
                arg_ptrs.as_ptr(),
                arg_ptrs.len() as i64,
                ret.as_mut_ptr().cast(),
                &mut error,
            )
        };
        match CallError::from_raw(error.error, error.argument, error.expected) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn construct_object(&self, class: &str) -> ObjectPtr {
        let Some(class) = self.string_name(class) else {
            return ObjectPtr::NULL;
        };
        // SAFETY: live StringName.
        ObjectPtr(unsafe { (self.table.classdb_construct_object)(class.as_ptr()) } as Word)
    }

    fn string_new(&self, text: &str) -> Word {
        let mut word: Word = 0;
        // SAFETY: one-word destination; `text` valid for its length.
        unsafe {
            (self.table.string_new_with_utf8_chars_and_len)(
                ptr::addr_of_mut!(word).cast(),
                text.as_ptr().cast(),
                text.len() as i64,
            )
        };
        word
    }

    fn string_to_utf8(&self, string: Word) -> Vec<u8> {
        let source: *const c_void = ptr::addr_of!(string).cast();
        // SAFETY: a null buffer with length 0 only queries the length.
        let len = unsafe { (self.table.string_to_utf8_chars)(source, ptr::null_mut(), 0) };
        let mut bytes = vec![0u8; usize::try_from(len).unwrap_or(0)];
        if !bytes.is_empty() {
            // SAFETY: `bytes` has room for `len` bytes.
            unsafe {
                (self.table.string_to_utf8_chars)(source, bytes.as_mut_ptr().cast(), len)
            };
        }
        bytes
    }

    fn packed_new(&self, kind: PackedKind, bytes: &[u8]) -> [Word; 2] {
        let slot = packed_slot(kind);
        let ops = &self.packed_ops[slot];
        let mut words = [0 as Word; 2];
        self.construct_builtin(ops, &mut words);
        let len = (bytes.len() / kind.element_size()) as i64;
        if len > 0 {
            self.builtin_resize(ops, words.as_mut_ptr().cast(), len);
            // SAFETY: after resize the storage is contiguous and holds `len` elements.
            unsafe {
                let data = (self.table.packed_index[slot])(words.as_mut_ptr().cast(), 0);
                if !data.is_null() {
                    ptr::copy_nonoverlapping(bytes.as_ptr(), data, len as usize * kind.element_size());
                }
            }
        }
        words
    }

    fn packed_to_bytes(&self, kind: PackedKind, array: &[Word]) -> Vec<u8> {
        let slot = packed_slot(kind);
        let len = self.builtin_size(&self.packed_ops[slot], array.as_ptr().cast());
        let byte_len = usize::try_from(len).unwrap_or(0) * kind.element_size();
        if byte_len == 0 {
            return Vec::new();
        }
        let mut bytes = vec![0u8; byte_len];
        // SAFETY: the array holds `len` contiguous elements.
        unsafe {
            let data = (self.table.packed_index_const[slot])(array.as_ptr().cast(), 0);
            if !data.is_null() {
                ptr::copy_nonoverlapping(data, bytes.as_mut_ptr(), byte_len);
            }
        }
        bytes
    }

    fn array_new(&self, elements: &[[Word; MAX_VALUE_WORDS]]) -> Word {
        let mut array = [0 as Word; 1];
        self.construct_builtin(&self.array_ops, &mut array);
        self.builtin_resize(&self.array_ops, array.as_mut_ptr().cast(), elements.len() as i64);
        for (index, element) in elements.iter().enumerate() {
            // SAFETY: index is within the resized array; the slot holds a Nil Variant.
            unsafe {
                let slot = (self.table.array_operator_index)(array.as_mut_ptr().cast(), index as i64);
                if !slot.is_null() {
                    (self.table.variant_destroy)(slot);
                    (self.table.variant_new_copy)(slot, element.as_ptr().cast());
                }
            }
        }
        array[0]
    }

    fn array_to_variants(&self, array: Word) -> Vec<[Word; MAX_VALUE_WORDS]> {
        let source: *const c_void = ptr::addr_of!(array).cast();
        let len = self.builtin_size(&self.array_ops, source);
        (0..len)
            .map(|index| {
                let mut copy = [0 as Word; MAX_VALUE_WORDS];
                // SAFETY: index < size; `copy` receives a new Variant.
                unsafe {
                    let element = (self.table.array_operator_index_const)(source, index);
                    if !element.is_null() {
                        (self.table.variant_new_copy)(copy.as_mut_ptr().cast(), element);
                    }
                }
                copy
            })
            .collect()
    }

    fn variant_new(&self, ty: VariantType, payload: &[Word]) -> [Word; MAX_VALUE_WORDS] {
        let mut variant = [0 as Word; MAX_VALUE_WORDS];
        if ty == VariantType::Nil {
            return variant;
        }
        let mut value = [0 as Word; 2];
        let count = payload.len().min(2);
        value[..count].copy_from_slice(&payload[..count]);
        // SAFETY: constructor for a valid tag; `value` holds the payload.
        unsafe {
            if let Some(from_type) = (self.table.get_variant_from_type_constructor)(ty.to_raw()) {
                from_type(variant.as_mut_ptr().cast(), value.as_mut_ptr().cast());
            }
        }
        variant
    }

    fn variant_type(&self, variant: &[Word]) -> u64 {
        // SAFETY: `variant` points at 3 words holding a Variant.
        u64::from(unsafe { (self.table.variant_get_type)(variant.as_ptr().cast()) })
    }

    fn variant_payload(&self, variant: &[Word], ty: VariantType) -> [Word; 2] {
        let mut value = [0 as Word; 2];
        let mut source = [0 as Word; MAX_VALUE_WORDS];
        let count = variant.len().min(MAX_VALUE_WORDS);
        source[..count].copy_from_slice(&variant[..count]);
        // SAFETY: constructor for a valid tag writes a new value of that type.
        unsafe {
            if let Some(to_type) = (self.table.get_variant_to_type_constructor)(ty.to_raw()) {
                to_type(value.as_mut_ptr().cast(), source.as_mut_ptr().cast());
            }
        }
        value
    }

    fn instance_id(&self, object: ObjectPtr) -> InstanceId {
        if object.is_null() {
            return InstanceId(0);
        }
        // SAFETY: non-null object pointer.
        InstanceId(unsafe { (self.table.object_get_instance_id)(object.0 as *const c_void) })
    }

    fn object_from_instance_id(&self, id: InstanceId) -> ObjectPtr {
        // SAFETY: the engine returns null for unknown ids.
        ObjectPtr(unsafe { (self.table.object_get_instance_from_id)(id.0) } as Word)
    }

    fn is_ref_counted(&self, object: ObjectPtr) -> bool {
        if object.is_null() {
            return false;
        }
        // SAFETY: non-null object pointer, tag from `classdb_get_class_tag`.
        let cast = unsafe {
            (self.table.object_cast_to)(object.0 as *const c_void, self.ref_counted_tag as *mut c_void)
        };
        !cast.is_null()
    }

    fn release(&self, handle: &Handle) {
        let mut words = [0 as Word; MAX_VALUE_WORDS];
        let source = handle.words();
        words[..source.len()].copy_from_slice(source);
        let target: *mut c_void = words.as_mut_ptr().cast();
        match handle.kind() {
            // SAFETY (all arms): the handle was produced by this interface and
            // is released exactly once by its Lifetime.
            HandleKind::String => unsafe { (self.string_ops.destructor)(target) },
            HandleKind::StringName => unsafe { (self.string_name_ops.destructor)(target) },
            HandleKind::Packed(kind) => unsafe { (self.packed_ops[packed_slot(kind)].destructor)(target) },
            HandleKind::Array => unsafe { (self.array_ops.destructor)(target) },
            HandleKind::Variant => unsafe { (self.table.variant_destroy)(target) },
            HandleKind::Object => unsafe { (self.table.object_destroy)(words[0] as *mut c_void) },
            HandleKind::RefCounted => {
                let object = ObjectPtr(words[0]);
                let mut last = [0 as Word; 1];
                self.ptrcall(self.unreference, object, &[], &mut last);
                if last[0] & 0xFF != 0 {
                    unsafe { (self.table.object_destroy)(object.0 as *mut c_void) };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn empty_lookup(_name: *const c_char) -> Option<unsafe extern "C" fn()> {
        None
    }

    unsafe extern "C" fn never_called() {}

    unsafe extern "C" fn lookup_without_variant_get_type(
        name: *const c_char,
    ) -> Option<unsafe extern "C" fn()> {
        let name = CStr::from_ptr(name);
        if name.to_bytes() == b"variant_get_type" {
            None
        } else {
            Some(never_called as unsafe extern "C" fn())
        }
    }

    #[test]
    fn test_missing_symbol_fails_load() {
        let err = unsafe { ProcAddressInterface::from_get_proc_address(empty_lookup) }
            .err()
            .unwrap();
        assert_eq!(err, LoadError::MissingSymbol("get_godot_version".to_string()));

        let err = unsafe { ProcAddressInterface::from_get_proc_address(lookup_without_variant_get_type) }
            .err()
            .unwrap();
        assert_eq!(err, LoadError::MissingSymbol("variant_get_type".to_string()));
    }

    #[test]
    fn test_missing_library() {
        let err = ProcAddressInterface::load(Path::new("/nonexistent/libengine.so"), "entry")
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Library(_)));
    }

    #[test]
    fn test_packed_slots_follow_kind_order() {
        for (index, kind) in PackedKind::ALL.iter().enumerate() {
            assert_eq!(packed_slot(*kind), index);
        }
    }
}
