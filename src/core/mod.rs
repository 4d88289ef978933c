//! 核心模块
//!
//! 包含绑定层的公共基础：
//! - `error` - 错误类型定义
//! - `macros` - `impl_default!` 与 `method_signature!`
//! - `runtime` - 组装配置、引擎接口与缓存的运行时

pub mod error;
#[macro_use]
pub mod macros;
pub mod runtime;

// 重新导出错误类型
pub use error::{
    BindingError, BindingResult, CallError, LifetimeError, LifetimeResult, NativeErrorCode,
    VirtualError,
};

// 重新导出运行时
pub use runtime::{BindingRuntime, BindingRuntimeBuilder, RuntimeStats};
