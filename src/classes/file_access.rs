//! FileAccess 包装
//!
//! `open` 返回的文件对象由宿主持有，所在 Lifetime 结束时释放引用。
//! 整数写入按存储宽度截断，读取按无符号宽度还原。

use crate::bindings::codec::{IntWidth, ObjectRef};
use crate::bindings::invoke::{invoke, invoke_static, CallContext};
use crate::classes::object::EngineClass;
use crate::core::error::{BindingError, BindingResult, NativeErrorCode};
use serde::{Deserialize, Serialize};

pub mod sig {
    use crate::bindings::codec::ObjectRef;
    use crate::bindings::ownership::{Intent, ReturnKind};
    use crate::core::error::NativeErrorCode;

    crate::method_signature! {
        pub Open = "FileAccess"::"open" [1247358404] (String, i64) -> Option<ObjectRef>,
            intent = Intent::Factory, returns = ReturnKind::RefCounted
    }
    crate::method_signature! {
        pub GetOpenError = "FileAccess"::"get_open_error" [166280745] () -> NativeErrorCode
    }
    crate::method_signature! {
        pub FileExists = "FileAccess"::"file_exists" [2323990056] (String) -> bool
    }
    crate::method_signature! {
        pub GetFileAsBytes = "FileAccess"::"get_file_as_bytes" [659035735] (String) -> Vec<u8>
    }
    crate::method_signature! {
        pub GetFileAsString = "FileAccess"::"get_file_as_string" [1703090593] (String) -> String
    }

    crate::method_signature! { pub Store8 = "FileAccess"::"store_8" [1286410249] (i64) -> () }
    crate::method_signature! { pub Store16 = "FileAccess"::"store_16" [1286410249] (i64) -> () }
    crate::method_signature! { pub Store32 = "FileAccess"::"store_32" [1286410249] (i64) -> () }
    crate::method_signature! { pub Store64 = "FileAccess"::"store_64" [1286410249] (i64) -> () }
    crate::method_signature! { pub Get8 = "FileAccess"::"get_8" [3905245786] () -> i64 }
    crate::method_signature! { pub Get16 = "FileAccess"::"get_16" [3905245786] () -> i64 }
    crate::method_signature! { pub Get32 = "FileAccess"::"get_32" [3905245786] () -> i64 }
    crate::method_signature! { pub Get64 = "FileAccess"::"get_64" [3905245786] () -> i64 }

    crate::method_signature! {
        pub StoreString = "FileAccess"::"store_string" [83702148] (String) -> ()
    }
    crate::method_signature! {
        pub StoreBuffer = "FileAccess"::"store_buffer" [2971499966] (Vec<u8>) -> ()
    }
    crate::method_signature! {
        pub GetBuffer = "FileAccess"::"get_buffer" [4131300905] (i64) -> Vec<u8>
    }
    crate::method_signature! {
        pub GetAsText = "FileAccess"::"get_as_text" [201670096] () -> String
    }
    crate::method_signature! { pub Seek = "FileAccess"::"seek" [1286410249] (u64) -> () }
    crate::method_signature! {
        pub GetPosition = "FileAccess"::"get_position" [3905245786] () -> u64
    }
    crate::method_signature! {
        pub GetLength = "FileAccess"::"get_length" [3905245786] () -> u64
    }
    crate::method_signature! {
        pub EofReached = "FileAccess"::"eof_reached" [36873697] () -> bool
    }
    crate::method_signature! { pub IsOpen = "FileAccess"::"is_open" [36873697] () -> bool }
    crate::method_signature! { pub Close = "FileAccess"::"close" [3218959716] () -> () }
}

/// `FileAccess.ModeFlags`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeFlags {
    Read,
    Write,
    ReadWrite,
    WriteRead,
}

impl ModeFlags {
    pub const fn bits(self) -> i64 {
        match self {
            ModeFlags::Read => 1,
            ModeFlags::Write => 2,
            ModeFlags::ReadWrite => 3,
            ModeFlags::WriteRead => 7,
        }
    }
}

/// An open engine file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAccess {
    object: ObjectRef,
}

impl EngineClass for FileAccess {
    const CLASS: &'static str = "FileAccess";

    fn from_object(object: ObjectRef) -> Self {
        Self { object }
    }

    fn object(&self) -> ObjectRef {
        self.object
    }
}

impl FileAccess {
    /// Opens `path`. A null result is reported with the engine's open error.
    pub fn open(cx: &CallContext<'_>, path: &str, flags: ModeFlags) -> BindingResult<Self> {
        match invoke_static::<sig::Open>(cx, (path.to_string(), flags.bits()))? {
            Some(object) => Ok(Self { object }),
            None => {
                let code = Self::get_open_error(cx)?;
                tracing::debug!(target: "ffi.methods", path, ?flags, ?code, "file open failed");
                Err(BindingError::Native(if code.is_ok() {
                    NativeErrorCode::FileCantOpen
                } else {
                    code
                }))
            }
        }
    }

    pub fn get_open_error(cx: &CallContext<'_>) -> BindingResult<NativeErrorCode> {
        invoke_static::<sig::GetOpenError>(cx, ())
    }

    pub fn file_exists(cx: &CallContext<'_>, path: &str) -> BindingResult<bool> {
        invoke_static::<sig::FileExists>(cx, (path.to_string(),))
    }

    /// Whole file contents. Missing files are an error, not an empty buffer.
    pub fn get_file_as_bytes(cx: &CallContext<'_>, path: &str) -> BindingResult<Vec<u8>> {
        let bytes = invoke_static::<sig::GetFileAsBytes>(cx, (path.to_string(),))?;
        if bytes.is_empty() {
            Self::get_open_error(cx)?.into_result()?;
        }
        Ok(bytes)
    }

    pub fn get_file_as_string(cx: &CallContext<'_>, path: &str) -> BindingResult<String> {
        let text = invoke_static::<sig::GetFileAsString>(cx, (path.to_string(),))?;
        if text.is_empty() {
            Self::get_open_error(cx)?.into_result()?;
        }
        Ok(text)
    }

    pub fn store_8(&self, cx: &CallContext<'_>, value: i64) -> BindingResult<()> {
        invoke::<sig::Store8>(cx, self.object.ptr(), (value,))
    }

    pub fn store_16(&self, cx: &CallContext<'_>, value: i64) -> BindingResult<()> {
        invoke::<sig::Store16>(cx, self.object.ptr(), (value,))
    }

    pub fn store_32(&self, cx: &CallContext<'_>, value: i64) -> BindingResult<()> {
        invoke::<sig::Store32>(cx, self.object.ptr(), (value,))
    }

    pub fn store_64(&self, cx: &CallContext<'_>, value: i64) -> BindingResult<()> {
        invoke::<sig::Store64>(cx, self.object.ptr(), (value,))
    }

    pub fn get_8(&self, cx: &CallContext<'_>) -> BindingResult<i64> {
        invoke::<sig::Get8>(cx, self.object.ptr(), ()).map(|v| IntWidth::U8.wrap(v))
    }

    pub fn get_16(&self, cx: &CallContext<'_>) -> BindingResult<i64> {
        invoke::<sig::Get16>(cx, self.object.ptr(), ()).map(|v| IntWidth::U16.wrap(v))
    }

    pub fn get_32(&self, cx: &CallContext<'_>) -> BindingResult<i64> {
        invoke::<sig::Get32>(cx, self.object.ptr(), ()).map(|v| IntWidth::U32.wrap(v))
    }

    pub fn get_64(&self, cx: &CallContext<'_>) -> BindingResult<i64> {
        invoke::<sig::Get64>(cx, self.object.ptr(), ())
    }

    pub fn store_string(&self, cx: &CallContext<'_>, text: &str) -> BindingResult<()> {
        invoke::<sig::StoreString>(cx, self.object.ptr(), (text.to_string(),))
    }

    pub fn store_buffer(&self, cx: &CallContext<'_>, bytes: &[u8]) -> BindingResult<()> {
        invoke::<sig::StoreBuffer>(cx, self.object.ptr(), (bytes.to_vec(),))
    }

    pub fn get_buffer(&self, cx: &CallContext<'_>, length: usize) -> BindingResult<Vec<u8>> {
        let length = i64::try_from(length).unwrap_or(i64::MAX);
        invoke::<sig::GetBuffer>(cx, self.object.ptr(), (length,))
    }

    /// Entire file as text, independent of the cursor.
    pub fn get_as_text(&self, cx: &CallContext<'_>) -> BindingResult<String> {
        invoke::<sig::GetAsText>(cx, self.object.ptr(), ())
    }

    pub fn seek(&self, cx: &CallContext<'_>, position: u64) -> BindingResult<()> {
        invoke::<sig::Seek>(cx, self.object.ptr(), (position,))
    }

    pub fn get_position(&self, cx: &CallContext<'_>) -> BindingResult<u64> {
        invoke::<sig::GetPosition>(cx, self.object.ptr(), ())
    }

    pub fn get_length(&self, cx: &CallContext<'_>) -> BindingResult<u64> {
        invoke::<sig::GetLength>(cx, self.object.ptr(), ())
    }

    pub fn eof_reached(&self, cx: &CallContext<'_>) -> BindingResult<bool> {
        invoke::<sig::EofReached>(cx, self.object.ptr(), ())
    }

    pub fn is_open(&self, cx: &CallContext<'_>) -> BindingResult<bool> {
        invoke::<sig::IsOpen>(cx, self.object.ptr(), ())
    }

    /// Flushes and closes. The object itself is released with its Lifetime.
    pub fn close(&self, cx: &CallContext<'_>) -> BindingResult<()> {
        invoke::<sig::Close>(cx, self.object.ptr(), ())
    }
}
