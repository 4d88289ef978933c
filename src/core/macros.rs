//! 核心宏定义
//!
//! 提供统一的宏来减少代码重复

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use game_engine_ffi::impl_default;
///
/// struct PoolSettings {
///     initial: usize,
///     label: String,
/// }
///
/// impl_default!(PoolSettings {
///     initial: 8,
///     label: String::new(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

/// 声明一个方法签名类型并实现 `MethodSignature`
///
/// 使用示例:
/// ```rust
/// use game_engine_ffi::method_signature;
/// use game_engine_ffi::bindings::ownership::{Intent, ReturnKind};
///
/// method_signature! {
///     /// FileAccess.get_length
///     pub GetLength = "FileAccess"::"get_length" [3905245786] () -> u64
/// }
///
/// method_signature! {
///     pub Open = "FileAccess"::"open" [1247358404] (String, i64) -> Option<game_engine_ffi::bindings::ObjectRef>,
///         intent = Intent::Factory, returns = ReturnKind::RefCounted
/// }
/// ```
#[macro_export]
macro_rules! method_signature {
    (
        $(#[$meta:meta])*
        $vis:vis $name:ident = $class:literal :: $method:literal [$hash:expr]
        ($($arg:ty),* $(,)?) -> $ret:ty
        $(, intent = $intent:expr)?
        $(, returns = $kind:expr)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        $vis struct $name;

        impl $crate::bindings::invoke::MethodSignature for $name {
            const CLASS: &'static str = $class;
            const METHOD: &'static str = $method;
            const HASH: i64 = $hash;
            $(const INTENT: $crate::bindings::ownership::Intent = $intent;)?
            $(const RETURN: $crate::bindings::ownership::ReturnKind = $kind;)?
            type Args = ($($arg,)*);
            type Ret = $ret;
        }
    };
}
