//! In-process engine.
//!
//! `HeadlessEngine` implements [`NativeInterface`] without a real engine: a
//! small class database (Object, RefCounted, Node, Resource, FileAccess),
//! an in-memory file system, and accounting of every allocation and release
//! so that ownership bugs show up as test failures instead of crashes.

use crate::bindings::handle::{Handle, HandleKind, InstanceId, ObjectPtr, PackedKind, Word, MAX_VALUE_WORDS};
use crate::bindings::invoke::MethodSignature;
use crate::bindings::variant::VariantType;
use crate::classes::{file_access::sig as file_sig, node::sig as node_sig, object::sig as object_sig, resource::sig as resource_sig};
use crate::core::error::{CallError, NativeErrorCode};
use crate::native::{EngineVersion, MethodBind, NativeInterface};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const OBJECT_BASE: Word = 0x7f00_0000_0000;

/// Largest file the in-memory filesystem will grow to.
const MAX_FILE_LEN: usize = 1 << 30;

const CLASS_PARENTS: &[(&str, Option<&str>)] = &[
    ("Object", None),
    ("RefCounted", Some("Object")),
    ("Resource", Some("RefCounted")),
    ("FileAccess", Some("RefCounted")),
    ("Node", Some("Object")),
];

fn parent_class(class: &str) -> Option<&'static str> {
    CLASS_PARENTS
        .iter()
        .find(|(name, _)| *name == class)
        .and_then(|(_, parent)| *parent)
}

fn class_chain(class: &str) -> Vec<String> {
    let mut chain = vec![class.to_string()];
    let mut current = parent_class(class);
    while let Some(parent) = current {
        chain.push(parent.to_string());
        current = parent_class(parent);
    }
    chain
}

fn is_ref_counted_class(class: &str) -> bool {
    class_chain(class).iter().any(|c| c == "RefCounted")
}

/// FileAccess open flags.
const READ: i64 = 1;
const WRITE: i64 = 2;
const READ_WRITE: i64 = 3;
const WRITE_READ: i64 = 7;

struct OpenFile {
    path: String,
    position: usize,
    readable: bool,
    writable: bool,
    eof: bool,
    open: bool,
}

struct ObjectRecord {
    class: String,
    id: u64,
    ref_counted: bool,
    refcount: u32,
    name: String,
    parent: Option<Word>,
    children: Vec<Word>,
    file: Option<OpenFile>,
    local_to_scene: bool,
}

struct HeadlessState {
    next_id: u64,
    strings: HashMap<Word, Vec<u8>>,
    packed: HashMap<Word, (PackedKind, Vec<u8>)>,
    arrays: HashMap<Word, Vec<[Word; MAX_VALUE_WORDS]>>,
    objects: HashMap<Word, ObjectRecord>,
    instances: HashMap<u64, Word>,
    files: HashMap<String, Vec<u8>>,
    last_open_error: NativeErrorCode,
    releases: HashMap<Handle, u32>,
    violations: Vec<String>,
}

type MethodBody = fn(&mut HeadlessState, ObjectPtr, &[&[Word]], &mut [Word]);

struct NativeMethod {
    class: &'static str,
    name: &'static str,
    hash: i64,
    is_static: bool,
    params: &'static [VariantType],
    ret: VariantType,
    body: MethodBody,
}

/// Reference engine for tests, benches and the probe binary.
pub struct HeadlessEngine {
    state: Mutex<HeadlessState>,
    methods: Vec<NativeMethod>,
    lookups: Mutex<HashMap<(String, String), usize>>,
    root: ObjectPtr,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessEngine {
    pub fn new() -> Self {
        let methods = method_table();

        let mut state = HeadlessState {
            next_id: 1,
            strings: HashMap::new(),
            packed: HashMap::new(),
            arrays: HashMap::new(),
            objects: HashMap::new(),
            instances: HashMap::new(),
            files: HashMap::new(),
            last_open_error: NativeErrorCode::Ok,
            releases: HashMap::new(),
            violations: Vec::new(),
        };
        let root = state.new_object("Node");
        if let Some(record) = state.objects.get_mut(&root.0) {
            record.name = "root".to_string();
        }

        Self {
            state: Mutex::new(state),
            methods,
            lookups: Mutex::new(HashMap::new()),
            root,
        }
    }

    /// The engine-owned scene root.
    pub fn root(&self) -> ObjectPtr {
        self.root
    }

    pub fn write_file(&self, path: &str, contents: &[u8]) {
        lock(&self.state)
            .files
            .insert(path.to_string(), contents.to_vec());
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state).files.get(path).cloned()
    }

    /// Stores raw bytes as a native String, bypassing UTF-8 validation.
    pub fn inject_raw_string(&self, bytes: &[u8]) -> Word {
        lock(&self.state).new_string(bytes.to_vec())
    }

    /// How many times `handle` was passed to `release`.
    pub fn release_count(&self, handle: &Handle) -> u32 {
        lock(&self.state)
            .releases
            .get(handle)
            .copied()
            .unwrap_or(0)
    }

    /// Release calls for an object, whichever kind of handle was used.
    pub fn object_release_count(&self, ptr: ObjectPtr) -> u32 {
        self.release_count(&Handle::object(ptr, false)) + self.release_count(&Handle::object(ptr, true))
    }

    pub fn is_alive(&self, ptr: ObjectPtr) -> bool {
        lock(&self.state).objects.contains_key(&ptr.0)
    }

    pub fn reference_count(&self, ptr: ObjectPtr) -> Option<u32> {
        lock(&self.state)
            .objects
            .get(&ptr.0)
            .filter(|record| record.ref_counted)
            .map(|record| record.refcount)
    }

    pub fn object_class(&self, ptr: ObjectPtr) -> Option<String> {
        lock(&self.state)
            .objects
            .get(&ptr.0)
            .map(|record| record.class.clone())
    }

    pub fn children(&self, ptr: ObjectPtr) -> Vec<ObjectPtr> {
        lock(&self.state)
            .objects
            .get(&ptr.0)
            .map(|record| record.children.iter().copied().map(ObjectPtr).collect())
            .unwrap_or_default()
    }

    /// Strings, packed arrays and arrays not yet released.
    pub fn live_allocations(&self) -> usize {
        let state = lock(&self.state);
        state.strings.len() + state.packed.len() + state.arrays.len()
    }

    pub fn live_objects(&self) -> usize {
        lock(&self.state).objects.len()
    }

    /// Double frees, use-after-free and other misuse seen so far.
    pub fn violations(&self) -> Vec<String> {
        lock(&self.state).violations.clone()
    }

    /// How many times the method was looked up through `lookup_method`.
    pub fn method_lookups(&self, class: &str, method: &str) -> usize {
        lock(&self.lookups)
            .get(&(class.to_string(), method.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn method(&self, bind: MethodBind) -> Option<&NativeMethod> {
        let index = usize::try_from(bind.as_raw()).ok()?.checked_sub(1)?;
        self.methods.get(index)
    }
}

impl HeadlessState {
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn violation(&mut self, message: String) {
        tracing::warn!(target: "ffi.native", %message, "headless engine violation");
        self.violations.push(message);
    }

    fn new_string(&mut self, bytes: Vec<u8>) -> Word {
        let id = self.alloc_id();
        self.strings.insert(id, bytes);
        id
    }

    fn read_string(&mut self, word: Word) -> String {
        match self.strings.get(&word) {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => {
                self.violation(format!("read of released string {word}"));
                String::new()
            }
        }
    }

    fn new_packed(&mut self, kind: PackedKind, bytes: Vec<u8>) -> [Word; 2] {
        let id = self.alloc_id();
        let len = (bytes.len() / kind.element_size()) as Word;
        self.packed.insert(id, (kind, bytes));
        [id, len]
    }

    fn read_packed(&mut self, word: Word) -> Vec<u8> {
        match self.packed.get(&word) {
            Some((_, bytes)) => bytes.clone(),
            None => {
                self.violation(format!("read of released packed array {word}"));
                Vec::new()
            }
        }
    }

    fn new_array(&mut self, elements: &[[Word; MAX_VALUE_WORDS]]) -> Word {
        let copies: Vec<_> = elements.iter().map(|v| self.copy_variant(v)).collect();
        let id = self.alloc_id();
        self.arrays.insert(id, copies);
        id
    }

    fn copy_variant(&mut self, variant: &[Word; MAX_VALUE_WORDS]) -> [Word; MAX_VALUE_WORDS] {
        let [tag, a, b] = *variant;
        match VariantType::from_raw(tag) {
            Some(VariantType::String) => {
                let bytes = self.strings.get(&a).cloned().unwrap_or_default();
                [tag, self.new_string(bytes), 0]
            }
            Some(ty @ (VariantType::PackedByteArray
            | VariantType::PackedInt32Array
            | VariantType::PackedInt64Array
            | VariantType::PackedFloat32Array
            | VariantType::PackedFloat64Array)) => {
                let kind = PackedKind::from_variant_type(ty).unwrap_or(PackedKind::Byte);
                let bytes = self.read_packed(a);
                let [id, len] = self.new_packed(kind, bytes);
                [tag, id, len]
            }
            Some(VariantType::Array) => {
                let elements = self.arrays.get(&a).cloned().unwrap_or_default();
                [tag, self.new_array(&elements), 0]
            }
            Some(VariantType::Object) => {
                self.reference(b);
                [tag, a, b]
            }
            _ => [tag, a, b],
        }
    }

    fn release_variant(&mut self, variant: &[Word]) {
        let (tag, a, b) = match variant {
            [tag, a, b, ..] => (*tag, *a, *b),
            _ => return,
        };
        match VariantType::from_raw(tag) {
            Some(VariantType::String) => self.free_string(a),
            Some(
                VariantType::PackedByteArray
                | VariantType::PackedInt32Array
                | VariantType::PackedInt64Array
                | VariantType::PackedFloat32Array
                | VariantType::PackedFloat64Array,
            ) => self.free_packed(a),
            Some(VariantType::Array) => self.free_array(a),
            Some(VariantType::Object) => {
                if self.objects.get(&b).is_some_and(|record| record.ref_counted) {
                    self.unreference(b);
                }
            }
            _ => {}
        }
    }

    fn free_string(&mut self, word: Word) {
        if self.strings.remove(&word).is_none() {
            self.violation(format!("double free of string {word}"));
        }
    }

    fn free_packed(&mut self, word: Word) {
        if self.packed.remove(&word).is_none() {
            self.violation(format!("double free of packed array {word}"));
        }
    }

    fn free_array(&mut self, word: Word) {
        match self.arrays.remove(&word) {
            Some(elements) => {
                for element in elements {
                    self.release_variant(&element);
                }
            }
            None => self.violation(format!("double free of array {word}")),
        }
    }

    fn new_object(&mut self, class: &str) -> ObjectPtr {
        let id = self.alloc_id();
        let ptr = OBJECT_BASE + id * 16;
        let ref_counted = is_ref_counted_class(class);
        self.objects.insert(
            ptr,
            ObjectRecord {
                class: class.to_string(),
                id,
                ref_counted,
                refcount: u32::from(ref_counted),
                name: String::new(),
                parent: None,
                children: Vec::new(),
                file: None,
                local_to_scene: false,
            },
        );
        self.instances.insert(id, ptr);
        ObjectPtr(ptr)
    }

    fn object(&mut self, ptr: ObjectPtr) -> Option<&mut ObjectRecord> {
        self.objects.get_mut(&ptr.0)
    }

    fn destroy_object(&mut self, ptr: Word) {
        let Some(record) = self.objects.remove(&ptr) else {
            self.violation(format!("destroy of dead object {ptr:#x}"));
            return;
        };
        self.instances.remove(&record.id);
        if let Some(parent) = record.parent.and_then(|parent| self.objects.get_mut(&parent)) {
            parent.children.retain(|child| *child != ptr);
        }
        for child in record.children {
            if let Some(child_record) = self.objects.get_mut(&child) {
                child_record.parent = None;
            }
            self.destroy_object(child);
        }
    }

    fn reference(&mut self, ptr: Word) {
        if let Some(record) = self.objects.get_mut(&ptr) {
            if record.ref_counted {
                record.refcount += 1;
            }
        }
    }

    fn unreference(&mut self, ptr: Word) {
        let remaining = match self.objects.get_mut(&ptr) {
            Some(record) if record.ref_counted => {
                record.refcount = record.refcount.saturating_sub(1);
                record.refcount
            }
            Some(_) => {
                self.violation(format!("unreference of non ref-counted object {ptr:#x}"));
                return;
            }
            None => {
                self.violation(format!("unreference of dead object {ptr:#x}"));
                return;
            }
        };
        if remaining == 0 {
            self.destroy_object(ptr);
        }
    }

    fn instance_id(&self, ptr: Word) -> u64 {
        self.objects.get(&ptr).map_or(0, |record| record.id)
    }
}

// ---------------------------------------------------------------------------
// Argument helpers for method bodies
// ---------------------------------------------------------------------------

fn word_arg(args: &[&[Word]], index: usize) -> Word {
    args.get(index)
        .and_then(|words| words.first())
        .copied()
        .unwrap_or(0)
}

fn int_arg(args: &[&[Word]], index: usize) -> i64 {
    word_arg(args, index) as i64
}

fn bool_arg(args: &[&[Word]], index: usize) -> bool {
    word_arg(args, index) & 0xFF != 0
}

fn put_ret(ret: &mut [Word], words: &[Word]) {
    let count = ret.len().min(words.len());
    ret[..count].copy_from_slice(&words[..count]);
}

fn ret_string(state: &mut HeadlessState, ret: &mut [Word], text: &[u8]) {
    let word = state.new_string(text.to_vec());
    put_ret(ret, &[word]);
}

// ---------------------------------------------------------------------------
// Object / RefCounted
// ---------------------------------------------------------------------------

fn object_get_instance_id(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    put_ret(ret, &[state.instance_id(this.0)]);
}

fn object_get_class(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let class = state
        .objects
        .get(&this.0)
        .map(|record| record.class.clone())
        .unwrap_or_default();
    ret_string(state, ret, class.as_bytes());
}

fn refcounted_get_reference_count(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let count = state.objects.get(&this.0).map_or(0, |record| record.refcount);
    put_ret(ret, &[count as Word]);
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

fn node_get_name(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let name = state
        .objects
        .get(&this.0)
        .map(|record| record.name.clone())
        .unwrap_or_default();
    ret_string(state, ret, name.as_bytes());
}

fn node_set_name(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    let name = state.read_string(word_arg(args, 0));
    if let Some(record) = state.object(this) {
        record.name = name;
    }
}

fn node_get_parent(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let parent = state.objects.get(&this.0).and_then(|record| record.parent);
    put_ret(ret, &[parent.unwrap_or(0)]);
}

fn node_add_child(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    let child = word_arg(args, 0);
    match state.objects.get(&child).map(|record| record.parent) {
        None => state.violation(format!("add_child of dead object {child:#x}")),
        Some(Some(parent)) => state.violation(format!(
            "add_child of {child:#x} which already has parent {parent:#x}"
        )),
        Some(None) if child == this.0 => state.violation("node added as its own child".to_string()),
        Some(None) => {
            if let Some(record) = state.objects.get_mut(&child) {
                record.parent = Some(this.0);
            }
            if let Some(record) = state.object(this) {
                record.children.push(child);
            }
        }
    }
}

fn node_remove_child(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    let child = word_arg(args, 0);
    let removed = state
        .object(this)
        .map(|record| {
            let before = record.children.len();
            record.children.retain(|c| *c != child);
            before != record.children.len()
        })
        .unwrap_or(false);
    if removed {
        if let Some(record) = state.objects.get_mut(&child) {
            record.parent = None;
        }
    } else {
        state.violation(format!("remove_child of non-child {child:#x}"));
    }
}

fn node_get_child_count(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let count = state.objects.get(&this.0).map_or(0, |record| record.children.len());
    put_ret(ret, &[count as Word]);
}

fn node_get_child(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
    let index = int_arg(args, 0);
    let child = state.objects.get(&this.0).and_then(|record| {
        let len = record.children.len() as i64;
        let index = if index < 0 { len + index } else { index };
        usize::try_from(index)
            .ok()
            .and_then(|i| record.children.get(i).copied())
    });
    put_ret(ret, &[child.unwrap_or(0)]);
}

fn node_queue_free(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], _ret: &mut [Word]) {
    state.destroy_object(this.0);
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

fn resource_duplicate(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let Some((class, name, local)) = state
        .objects
        .get(&this.0)
        .map(|record| (record.class.clone(), record.name.clone(), record.local_to_scene))
    else {
        put_ret(ret, &[0]);
        return;
    };
    let copy = state.new_object(&class);
    if let Some(record) = state.object(copy) {
        record.name = name;
        record.local_to_scene = local;
    }
    put_ret(ret, &[copy.0]);
}

fn resource_set_local_to_scene(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    let enable = bool_arg(args, 0);
    if let Some(record) = state.object(this) {
        record.local_to_scene = enable;
    }
}

fn resource_is_local_to_scene(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let local = state.objects.get(&this.0).is_some_and(|record| record.local_to_scene);
    put_ret(ret, &[local as Word]);
}

// ---------------------------------------------------------------------------
// FileAccess
// ---------------------------------------------------------------------------

fn file_open(state: &mut HeadlessState, _this: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
    let path = state.read_string(word_arg(args, 0));
    let flags = int_arg(args, 1);

    let (readable, writable, truncate, must_exist) = match flags {
        READ => (true, false, false, true),
        WRITE => (false, true, true, false),
        READ_WRITE => (true, true, false, true),
        WRITE_READ => (true, true, true, false),
        _ => {
            state.last_open_error = NativeErrorCode::ParameterRangeError;
            put_ret(ret, &[0]);
            return;
        }
    };
    if path.is_empty() {
        state.last_open_error = NativeErrorCode::FileBadPath;
        put_ret(ret, &[0]);
        return;
    }
    if must_exist && !state.files.contains_key(&path) {
        state.last_open_error = NativeErrorCode::FileNotFound;
        put_ret(ret, &[0]);
        return;
    }
    if truncate {
        state.files.insert(path.clone(), Vec::new());
    }

    let file = state.new_object("FileAccess");
    if let Some(record) = state.object(file) {
        record.file = Some(OpenFile {
            path,
            position: 0,
            readable,
            writable,
            eof: false,
            open: true,
        });
    }
    state.last_open_error = NativeErrorCode::Ok;
    put_ret(ret, &[file.0]);
}

fn file_get_open_error(state: &mut HeadlessState, _this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    put_ret(ret, &[state.last_open_error.to_raw() as Word]);
}

fn file_exists(state: &mut HeadlessState, _this: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
    let path = state.read_string(word_arg(args, 0));
    put_ret(ret, &[state.files.contains_key(&path) as Word]);
}

fn file_get_file_as_bytes(state: &mut HeadlessState, _this: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
    let path = state.read_string(word_arg(args, 0));
    let bytes = match state.files.get(&path) {
        Some(bytes) => {
            state.last_open_error = NativeErrorCode::Ok;
            bytes.clone()
        }
        None => {
            state.last_open_error = NativeErrorCode::FileNotFound;
            Vec::new()
        }
    };
    let words = state.new_packed(PackedKind::Byte, bytes);
    put_ret(ret, &words);
}

fn file_get_file_as_string(state: &mut HeadlessState, _this: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
    let path = state.read_string(word_arg(args, 0));
    let bytes = match state.files.get(&path) {
        Some(bytes) => {
            state.last_open_error = NativeErrorCode::Ok;
            bytes.clone()
        }
        None => {
            state.last_open_error = NativeErrorCode::FileNotFound;
            Vec::new()
        }
    };
    ret_string(state, ret, &bytes);
}

/// Runs `f` on the open file behind `this`; `None` when it is closed or missing.
fn with_file<R>(
    state: &mut HeadlessState,
    this: ObjectPtr,
    f: impl FnOnce(&mut OpenFile, &mut HashMap<String, Vec<u8>>) -> R,
) -> Option<R> {
    let HeadlessState { objects, files, .. } = state;
    let file = objects.get_mut(&this.0)?.file.as_mut()?;
    if !file.open {
        return None;
    }
    Some(f(file, files))
}

fn store_bytes(state: &mut HeadlessState, this: ObjectPtr, bytes: &[u8]) {
    let written = with_file(state, this, |file, files| {
        if !file.writable {
            return Err(format!("write to unwritable file {this}"));
        }
        let end = file
            .position
            .checked_add(bytes.len())
            .filter(|end| *end <= MAX_FILE_LEN)
            .ok_or_else(|| format!("write past {MAX_FILE_LEN} bytes at position {} of {this}", file.position))?;
        let contents = files.entry(file.path.clone()).or_default();
        if contents.len() < end {
            contents.resize(end, 0);
        }
        contents[file.position..end].copy_from_slice(bytes);
        file.position = end;
        Ok(())
    });
    match written {
        Some(Ok(())) => {}
        Some(Err(message)) => state.violation(message),
        None => state.violation(format!("write to closed file {this}")),
    }
}

fn load_bytes(state: &mut HeadlessState, this: ObjectPtr, count: usize) -> Vec<u8> {
    with_file(state, this, |file, files| {
        if !file.readable {
            return Vec::new();
        }
        let contents = files.get(&file.path).map(Vec::as_slice).unwrap_or_default();
        let start = file.position.min(contents.len());
        let end = file
            .position
            .checked_add(count)
            .map_or(contents.len(), |end| end.min(contents.len()));
        if end - start < count {
            file.eof = true;
        }
        file.position = end;
        contents[start..end].to_vec()
    })
    .unwrap_or_default()
}

fn store_int(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], width: usize) {
    let bytes = word_arg(args, 0).to_le_bytes();
    store_bytes(state, this, &bytes[..width]);
}

fn get_int(state: &mut HeadlessState, this: ObjectPtr, ret: &mut [Word], width: usize) {
    let bytes = load_bytes(state, this, width);
    let mut buffer = [0u8; 8];
    buffer[..bytes.len()].copy_from_slice(&bytes);
    put_ret(ret, &[u64::from_le_bytes(buffer)]);
}

fn file_store_8(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    store_int(state, this, args, 1);
}

fn file_store_16(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    store_int(state, this, args, 2);
}

fn file_store_32(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    store_int(state, this, args, 4);
}

fn file_store_64(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    store_int(state, this, args, 8);
}

fn file_get_8(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    get_int(state, this, ret, 1);
}

fn file_get_16(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    get_int(state, this, ret, 2);
}

fn file_get_32(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    get_int(state, this, ret, 4);
}

fn file_get_64(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    get_int(state, this, ret, 8);
}

fn file_store_string(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    let word = word_arg(args, 0);
    let bytes = state.strings.get(&word).cloned();
    match bytes {
        Some(bytes) => store_bytes(state, this, &bytes),
        None => state.violation(format!("store_string of released string {word}")),
    }
}

fn file_store_buffer(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    let bytes = state.read_packed(word_arg(args, 0));
    store_bytes(state, this, &bytes);
}

fn file_get_buffer(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
    let count = usize::try_from(int_arg(args, 0)).unwrap_or(0);
    let bytes = load_bytes(state, this, count);
    let words = state.new_packed(PackedKind::Byte, bytes);
    put_ret(ret, &words);
}

fn file_get_as_text(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let text = with_file(state, this, |file, files| files.get(&file.path).cloned().unwrap_or_default())
        .unwrap_or_default();
    ret_string(state, ret, &text);
}

fn file_seek(state: &mut HeadlessState, this: ObjectPtr, args: &[&[Word]], _ret: &mut [Word]) {
    let position = usize::try_from(int_arg(args, 0)).unwrap_or(0);
    with_file(state, this, |file, _| {
        file.position = position;
        file.eof = false;
    });
}

fn file_get_position(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let position = with_file(state, this, |file, _| file.position).unwrap_or(0);
    put_ret(ret, &[position as Word]);
}

fn file_get_length(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let length = with_file(state, this, |file, files| files.get(&file.path).map_or(0, Vec::len)).unwrap_or(0);
    put_ret(ret, &[length as Word]);
}

fn file_eof_reached(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let eof = with_file(state, this, |file, _| file.eof).unwrap_or(false);
    put_ret(ret, &[eof as Word]);
}

fn file_is_open(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], ret: &mut [Word]) {
    let open = with_file(state, this, |_, _| true).unwrap_or(false);
    put_ret(ret, &[open as Word]);
}

fn file_close(state: &mut HeadlessState, this: ObjectPtr, _args: &[&[Word]], _ret: &mut [Word]) {
    with_file(state, this, |file, _| file.open = false);
}

fn method_table() -> Vec<NativeMethod> {
    use VariantType::{Bool, Int, Nil, Object, PackedByteArray, String};

    macro_rules! method {
        ($sig:ty, $static:expr, [$($param:expr),*], $ret:expr, $body:expr) => {
            NativeMethod {
                class: <$sig as MethodSignature>::CLASS,
                name: <$sig as MethodSignature>::METHOD,
                hash: <$sig as MethodSignature>::HASH,
                is_static: $static,
                params: &[$($param),*],
                ret: $ret,
                body: $body,
            }
        };
    }

    vec![
        method!(object_sig::GetInstanceId, false, [], Int, object_get_instance_id),
        method!(object_sig::GetClass, false, [], String, object_get_class),
        method!(object_sig::GetReferenceCount, false, [], Int, refcounted_get_reference_count),
        method!(node_sig::GetName, false, [], String, node_get_name),
        method!(node_sig::SetName, false, [String], Nil, node_set_name),
        method!(node_sig::GetParent, false, [], Object, node_get_parent),
        method!(node_sig::AddChild, false, [Object], Nil, node_add_child),
        method!(node_sig::RemoveChild, false, [Object], Nil, node_remove_child),
        method!(node_sig::GetChildCount, false, [], Int, node_get_child_count),
        method!(node_sig::GetChild, false, [Int], Object, node_get_child),
        method!(node_sig::QueueFree, false, [], Nil, node_queue_free),
        method!(resource_sig::Duplicate, false, [Bool], Object, resource_duplicate),
        method!(resource_sig::SetLocalToScene, false, [Bool], Nil, resource_set_local_to_scene),
        method!(resource_sig::IsLocalToScene, false, [], Bool, resource_is_local_to_scene),
        method!(file_sig::Open, true, [String, Int], Object, file_open),
        method!(file_sig::GetOpenError, true, [], Int, file_get_open_error),
        method!(file_sig::FileExists, true, [String], Bool, file_exists),
        method!(file_sig::GetFileAsBytes, true, [String], PackedByteArray, file_get_file_as_bytes),
        method!(file_sig::GetFileAsString, true, [String], String, file_get_file_as_string),
        method!(file_sig::Store8, false, [Int], Nil, file_store_8),
        method!(file_sig::Store16, false, [Int], Nil, file_store_16),
        method!(file_sig::Store32, false, [Int], Nil, file_store_32),
        method!(file_sig::Store64, false, [Int], Nil, file_store_64),
        method!(file_sig::Get8, false, [], Int, file_get_8),
        method!(file_sig::Get16, false, [], Int, file_get_16),
        method!(file_sig::Get32, false, [], Int, file_get_32),
        method!(file_sig::Get64, false, [], Int, file_get_64),
        method!(file_sig::StoreString, false, [String], Nil, file_store_string),
        method!(file_sig::StoreBuffer, false, [PackedByteArray], Nil, file_store_buffer),
        method!(file_sig::GetBuffer, false, [Int], PackedByteArray, file_get_buffer),
        method!(file_sig::GetAsText, false, [], String, file_get_as_text),
        method!(file_sig::Seek, false, [Int], Nil, file_seek),
        method!(file_sig::GetPosition, false, [], Int, file_get_position),
        method!(file_sig::GetLength, false, [], Int, file_get_length),
        method!(file_sig::EofReached, false, [], Bool, file_eof_reached),
        method!(file_sig::IsOpen, false, [], Bool, file_is_open),
        method!(file_sig::Close, false, [], Nil, file_close),
    ]
}

/// Width of a pointer-call value of type `ty`.
fn ptr_width(ty: VariantType) -> usize {
    match ty {
        VariantType::Nil => 0,
        ty if PackedKind::from_variant_type(ty).is_some() => 2,
        VariantType::Vector3 | VariantType::Color => 2,
        _ => 1,
    }
}

impl NativeInterface for HeadlessEngine {
    fn version(&self) -> EngineVersion {
        EngineVersion {
            major: 4,
            minor: 3,
            patch: 0,
            label: "headless".to_string(),
        }
    }

    fn lookup_method(&self, class: &str, method: &str, hash: i64) -> Option<MethodBind> {
        *lock(&self.lookups)
            .entry((class.to_string(), method.to_string()))
            .or_default() += 1;

        for candidate in class_chain(class) {
            let found = self
                .methods
                .iter()
                .position(|entry| entry.class == candidate && entry.name == method);
            if let Some(index) = found {
                let entry = &self.methods[index];
                if entry.hash != hash {
                    tracing::debug!(
                        target: "ffi.native",
                        class,
                        method,
                        expected = entry.hash,
                        got = hash,
                        "method hash mismatch"
                    );
                    return None;
                }
                return MethodBind::from_raw(index as u64 + 1);
            }
        }
        None
    }

    fn ptrcall(&self, method: MethodBind, instance: ObjectPtr, args: &[&[Word]], ret: &mut [Word]) {
        let mut state = lock(&self.state);
        let Some(entry) = self.method(method) else {
            state.violation(format!("ptrcall with unknown method bind {}", method.as_raw()));
            return;
        };
        if !entry.is_static {
            let class = state.objects.get(&instance.0).map(|record| record.class.clone());
            match class {
                None => {
                    state.violation(format!(
                        "{}::{} called on dead or null instance {instance}",
                        entry.class, entry.name
                    ));
                    return;
                }
                Some(class) if !class_chain(&class).iter().any(|c| c == entry.class) => {
                    state.violation(format!(
                        "{}::{} called on a {class}",
                        entry.class, entry.name
                    ));
                    return;
                }
                Some(_) => {}
            }
        }
        if args.len() != entry.params.len() {
            state.violation(format!(
                "{}::{} expects {} arguments, got {}",
                entry.class,
                entry.name,
                entry.params.len(),
                args.len()
            ));
            return;
        }
        (entry.body)(&mut *state, instance, args, ret);
    }

    fn call(
        &self,
        method: MethodBind,
        instance: ObjectPtr,
        args: &[&[Word]],
        ret: &mut [Word; MAX_VALUE_WORDS],
    ) -> Result<(), CallError> {
        let entry = self.method(method).ok_or(CallError::InvalidMethod)?;
        let expected = entry.params.len() as i32;
        if args.len() > entry.params.len() {
            return Err(CallError::TooManyArguments { expected });
        }
        if args.len() < entry.params.len() {
            return Err(CallError::TooFewArguments { expected });
        }

        let mut ptr_args: Vec<[Word; 2]> = Vec::with_capacity(args.len());
        for (index, (arg, param)) in args.iter().zip(entry.params).enumerate() {
            let tag = arg.first().copied().unwrap_or(0);
            if tag != param.to_raw() as Word {
                return Err(CallError::InvalidArgument {
                    argument: index as i32,
                    expected: param.to_raw() as i32,
                });
            }
            let a = arg.get(1).copied().unwrap_or(0);
            let b = arg.get(2).copied().unwrap_or(0);
            ptr_args.push(match param {
                VariantType::Object => [b, 0],
                _ => [a, b],
            });
        }

        if !entry.is_static && instance.is_null() {
            return Err(CallError::InstanceIsNull);
        }
        if !entry.is_static && !self.is_alive(instance) {
            return Err(CallError::InstanceIsNull);
        }

        let slices: Vec<&[Word]> = ptr_args
            .iter()
            .zip(entry.params)
            .map(|(words, param)| &words[..ptr_width(*param).max(1)])
            .collect();
        let mut raw = [0; 2];
        let width = ptr_width(entry.ret);
        self.ptrcall(method, instance, &slices, &mut raw[..width]);

        let tag = entry.ret.to_raw() as Word;
        *ret = match entry.ret {
            VariantType::Nil => [0, 0, 0],
            VariantType::Object => {
                let id = lock(&self.state).instance_id(raw[0]);
                [tag, id, raw[0]]
            }
            _ => [tag, raw[0], raw[1]],
        };
        Ok(())
    }

    fn construct_object(&self, class: &str) -> ObjectPtr {
        let mut state = lock(&self.state);
        match class {
            "Object" | "RefCounted" | "Node" | "Resource" => state.new_object(class),
            _ => {
                state.violation(format!("cannot construct class {class}"));
                ObjectPtr::NULL
            }
        }
    }

    fn string_new(&self, text: &str) -> Word {
        lock(&self.state).new_string(text.as_bytes().to_vec())
    }

    fn string_to_utf8(&self, string: Word) -> Vec<u8> {
        let mut state = lock(&self.state);
        match state.strings.get(&string) {
            Some(bytes) => bytes.clone(),
            None => {
                state.violation(format!("read of released string {string}"));
                Vec::new()
            }
        }
    }

    fn packed_new(&self, kind: PackedKind, bytes: &[u8]) -> [Word; 2] {
        lock(&self.state).new_packed(kind, bytes.to_vec())
    }

    fn packed_to_bytes(&self, kind: PackedKind, array: &[Word]) -> Vec<u8> {
        let mut state = lock(&self.state);
        let word = array.first().copied().unwrap_or(0);
        match state.packed.get(&word) {
            Some((stored, bytes)) if *stored == kind => bytes.clone(),
            Some((stored, _)) => {
                let stored = *stored;
                state.violation(format!("packed array {word} is {stored:?}, read as {kind:?}"));
                Vec::new()
            }
            None => {
                state.violation(format!("read of released packed array {word}"));
                Vec::new()
            }
        }
    }

    fn array_new(&self, elements: &[[Word; MAX_VALUE_WORDS]]) -> Word {
        lock(&self.state).new_array(elements)
    }

    fn array_to_variants(&self, array: Word) -> Vec<[Word; MAX_VALUE_WORDS]> {
        let mut state = lock(&self.state);
        match state.arrays.get(&array).cloned() {
            Some(elements) => elements.iter().map(|v| state.copy_variant(v)).collect(),
            None => {
                state.violation(format!("read of released array {array}"));
                Vec::new()
            }
        }
    }

    fn variant_new(&self, ty: VariantType, payload: &[Word]) -> [Word; MAX_VALUE_WORDS] {
        let mut state = lock(&self.state);
        let a = payload.first().copied().unwrap_or(0);
        let b = payload.get(1).copied().unwrap_or(0);
        let tag = ty.to_raw() as Word;
        match ty {
            VariantType::Nil => [0, 0, 0],
            VariantType::Object => {
                state.reference(a);
                [tag, state.instance_id(a), a]
            }
            // copy composites so the variant owns its payload
            _ => state.copy_variant(&[tag, a, b]),
        }
    }

    fn variant_type(&self, variant: &[Word]) -> u64 {
        variant.first().copied().unwrap_or(0)
    }

    fn variant_payload(&self, variant: &[Word], ty: VariantType) -> [Word; 2] {
        let mut state = lock(&self.state);
        let words = [
            variant.first().copied().unwrap_or(0),
            variant.get(1).copied().unwrap_or(0),
            variant.get(2).copied().unwrap_or(0),
        ];
        if words[0] != ty.to_raw() as Word {
            state.violation(format!("variant of type {} read as {ty:?}", words[0]));
            return [0, 0];
        }
        match ty {
            VariantType::Object => [words[2], 0],
            _ => {
                let [_, a, b] = state.copy_variant(&words);
                [a, b]
            }
        }
    }

    fn instance_id(&self, object: ObjectPtr) -> InstanceId {
        InstanceId(lock(&self.state).instance_id(object.0))
    }

    fn object_from_instance_id(&self, id: InstanceId) -> ObjectPtr {
        ObjectPtr(lock(&self.state).instances.get(&id.0).copied().unwrap_or(0))
    }

    fn is_ref_counted(&self, object: ObjectPtr) -> bool {
        lock(&self.state)
            .objects
            .get(&object.0)
            .is_some_and(|record| record.ref_counted)
    }

    fn release(&self, handle: &Handle) {
        let mut state = lock(&self.state);
        *state.releases.entry(*handle).or_default() += 1;
        let words = handle.words();
        let first = words.first().copied().unwrap_or(0);
        match handle.kind() {
            HandleKind::String | HandleKind::StringName => state.free_string(first),
            HandleKind::Packed(_) => state.free_packed(first),
            HandleKind::Array => state.free_array(first),
            HandleKind::Variant => state.release_variant(words),
            HandleKind::Object => state.destroy_object(first),
            HandleKind::RefCounted => state.unreference(first),
        }
    }
}
