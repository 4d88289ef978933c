//! 统一错误处理模块
//!
//! 提供绑定层范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **ABI 错误**: 方法绑定无法解析、帧容量越界、未知的 Variant 标签。调用方应视为致命错误。
//! - **引擎报告的错误** (`NativeErrorCode`): 例如文件打开失败，属于普通的 `Err`。
//! - **误用**: 在 `end()` 之后向 Lifetime 注册句柄等，直接 panic，不在此处建模。
//!
//! `BindingError` 汇总所有子系统错误。

use crate::bindings::classes::ClassRegistrationError;
use crate::bindings::handle::PackedKind;
use crate::bindings::variant::VariantType;
use crate::config::ConfigError;
use crate::native::dylib::LoadError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 绑定层核心错误类型
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Unresolved method binding {class}::{method} (hash {hash}); bindings do not match the running engine")]
    UnresolvedMethod {
        class: String,
        method: String,
        hash: i64,
    },

    #[error("Call frame capacity {requested} exceeds the maximum of {max} arguments")]
    FrameCapacity { requested: usize, max: usize },

    #[error("Call frame overflow: all {capacity} argument slots are filled")]
    FrameOverflow { capacity: usize },

    #[error("Invalid return slot: {0}")]
    ReturnSlot(String),

    #[error("Invalid UTF-8 sequence after {valid_up_to} bytes")]
    InvalidUtf8 { valid_up_to: usize },

    #[error("Unexpected null object pointer")]
    NullObject,

    #[error("Object instance {0} no longer refers to the decoded pointer")]
    StaleInstance(u64),

    #[error("Unknown variant type tag: {0}")]
    UnknownVariantType(u64),

    #[error("Variant type {0:?} is not supported by the marshalling layer")]
    UnsupportedVariant(VariantType),

    #[error("Variant type mismatch: expected {expected:?}, found {found:?}")]
    VariantMismatch {
        expected: VariantType,
        found: VariantType,
    },

    #[error("Packed {kind:?} array byte length {len} is not a multiple of the element size")]
    PackedLength { kind: PackedKind, len: usize },

    #[error("Ownership policy error: {0}")]
    Ownership(String),

    #[error("Variant call failed: {0}")]
    Call(#[from] CallError),

    #[error("Engine reported error: {0:?}")]
    Native(NativeErrorCode),

    #[error("Lifetime error: {0}")]
    Lifetime(#[from] LifetimeError),

    #[error("Class registration error: {0}")]
    Class(#[from] ClassRegistrationError),

    #[error("Virtual dispatch error: {0}")]
    Virtual(#[from] VirtualError),

    #[error("Native library error: {0}")]
    Load(#[from] LoadError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine version {found} is older than the required {required}")]
    IncompatibleEngine { found: String, required: String },
}

/// Lifetime 错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifetimeError {
    #[error("Lifetime {0} has already ended")]
    AlreadyEnded(u64),

    #[error("Handle key belongs to lifetime {key_lifetime}, not {lifetime}")]
    ForeignKey { lifetime: u64, key_lifetime: u64 },

    #[error("Handle is not registered in lifetime {0}")]
    NotRegistered(u64),

    #[error("Handle is already registered in lifetime {0}")]
    AlreadyRegistered(u64),
}

/// 虚函数分发错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VirtualError {
    #[error("Virtual {class}::{name} is registered twice")]
    Duplicate { class: String, name: String },

    #[error("Virtual table is full ({0} entries)")]
    TableFull(usize),

    #[error("No virtual registered at index {0}")]
    UnknownIndex(u8),

    #[error("No virtual named {name} on {class} or its ancestors")]
    NotFound { class: String, name: String },

    #[error("Instance passed to {name} is not a {expected}")]
    InstanceType { name: String, expected: &'static str },

    #[error("Virtual {name} expects {expected} arguments, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
}

/// Variant 调用路径的错误，与引擎的 `GDExtensionCallErrorType` 一一对应
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallError {
    #[error("invalid method")]
    InvalidMethod,

    #[error("argument {argument} has the wrong type, expected type tag {expected}")]
    InvalidArgument { argument: i32, expected: i32 },

    #[error("too many arguments, expected {expected}")]
    TooManyArguments { expected: i32 },

    #[error("too few arguments, expected {expected}")]
    TooFewArguments { expected: i32 },

    #[error("instance is null")]
    InstanceIsNull,

    #[error("method is not const")]
    MethodNotConst,
}

impl CallError {
    /// 由引擎的原始错误码构造，`0` 表示成功
    pub fn from_raw(error: i32, argument: i32, expected: i32) -> Option<Self> {
        match error {
            0 => None,
            1 => Some(CallError::InvalidMethod),
            2 => Some(CallError::InvalidArgument { argument, expected }),
            3 => Some(CallError::TooManyArguments { expected }),
            4 => Some(CallError::TooFewArguments { expected }),
            5 => Some(CallError::InstanceIsNull),
            _ => Some(CallError::MethodNotConst),
        }
    }
}

/// 引擎 `Error` 枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeErrorCode {
    Ok,
    Failed,
    Unavailable,
    Unconfigured,
    Unauthorized,
    ParameterRangeError,
    OutOfMemory,
    FileNotFound,
    FileBadDrive,
    FileBadPath,
    FileNoPermission,
    FileAlreadyInUse,
    FileCantOpen,
    FileCantWrite,
    FileCantRead,
    FileUnrecognized,
    FileCorrupt,
    FileEof,
    Other(i64),
}

impl NativeErrorCode {
    pub fn from_raw(code: i64) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Failed,
            2 => Self::Unavailable,
            3 => Self::Unconfigured,
            4 => Self::Unauthorized,
            5 => Self::ParameterRangeError,
            6 => Self::OutOfMemory,
            7 => Self::FileNotFound,
            8 => Self::FileBadDrive,
            9 => Self::FileBadPath,
            10 => Self::FileNoPermission,
            11 => Self::FileAlreadyInUse,
            12 => Self::FileCantOpen,
            13 => Self::FileCantWrite,
            14 => Self::FileCantRead,
            15 => Self::FileUnrecognized,
            16 => Self::FileCorrupt,
            18 => Self::FileEof,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Self::Ok => 0,
            Self::Failed => 1,
            Self::Unavailable => 2,
            Self::Unconfigured => 3,
            Self::Unauthorized => 4,
            Self::ParameterRangeError => 5,
            Self::OutOfMemory => 6,
            Self::FileNotFound => 7,
            Self::FileBadDrive => 8,
            Self::FileBadPath => 9,
            Self::FileNoPermission => 10,
            Self::FileAlreadyInUse => 11,
            Self::FileCantOpen => 12,
            Self::FileCantWrite => 13,
            Self::FileCantRead => 14,
            Self::FileUnrecognized => 15,
            Self::FileCorrupt => 16,
            Self::FileEof => 18,
            Self::Other(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// 将引擎错误码转换为 `Result`
    pub fn into_result(self) -> BindingResult<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(BindingError::Native(self))
        }
    }
}

/// 结果类型别名
pub type BindingResult<T> = Result<T, BindingError>;
pub type LifetimeResult<T> = Result<T, LifetimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BindingError::UnresolvedMethod {
            class: "FileAccess".to_string(),
            method: "open".to_string(),
            hash: 42,
        };
        let text = err.to_string();
        assert!(text.contains("FileAccess::open"));
        assert!(text.contains("hash 42"));
    }

    #[test]
    fn test_error_conversion() {
        let err: BindingError = LifetimeError::AlreadyEnded(3).into();
        assert!(matches!(err, BindingError::Lifetime(LifetimeError::AlreadyEnded(3))));

        let err: BindingError = CallError::InstanceIsNull.into();
        assert!(matches!(err, BindingError::Call(CallError::InstanceIsNull)));
    }

    #[test]
    fn test_native_error_code_raw() {
        assert_eq!(NativeErrorCode::from_raw(7), NativeErrorCode::FileNotFound);
        assert_eq!(NativeErrorCode::from_raw(18), NativeErrorCode::FileEof);
        assert_eq!(NativeErrorCode::from_raw(17), NativeErrorCode::Other(17));
        for raw in 0..20 {
            assert_eq!(NativeErrorCode::from_raw(raw).to_raw(), raw);
        }
        assert!(NativeErrorCode::Ok.into_result().is_ok());
        assert!(matches!(
            NativeErrorCode::FileCantOpen.into_result(),
            Err(BindingError::Native(NativeErrorCode::FileCantOpen))
        ));
    }

    #[test]
    fn test_call_error_from_raw() {
        assert_eq!(CallError::from_raw(0, 0, 0), None);
        assert_eq!(
            CallError::from_raw(2, 1, 4),
            Some(CallError::InvalidArgument {
                argument: 1,
                expected: 4
            })
        );
        assert_eq!(
            CallError::from_raw(4, 0, 2),
            Some(CallError::TooFewArguments { expected: 2 })
        );
    }
}
