use super::{ConfigError, ConfigResult};
use crate::bindings::callframe::MAX_FRAME_ARGS;
use crate::bindings::lifetime::LifetimeMode;
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 调用帧池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// 启动时预分配的帧数
    pub initial_pool_size: usize,

    /// 池中最多缓存的帧数
    pub max_pool_size: usize,
}

impl_default!(FrameConfig {
    initial_pool_size: 8,
    max_pool_size: 64,
});

impl FrameConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "Frame pool max size must be non-zero".to_string(),
            ));
        }
        if self.initial_pool_size > self.max_pool_size {
            return Err(ConfigError::ValidationError(format!(
                "Frame pool initial size {} exceeds max size {}",
                self.initial_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// 单帧可容纳的最大参数数
    pub const fn max_frame_args(&self) -> usize {
        MAX_FRAME_ARGS
    }
}

/// Lifetime 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LifetimeConfig {
    /// 重复结束时的处理方式（debug 构建默认 strict）
    pub mode: LifetimeMode,
}
