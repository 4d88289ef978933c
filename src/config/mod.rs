/// 绑定层配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod memory;
pub mod native;

pub use memory::{FrameConfig, LifetimeConfig};
pub use native::{Backend, NativeConfig};

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 绑定层主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfiConfig {
    /// 引擎接口
    #[serde(default)]
    pub native: NativeConfig,

    /// 调用帧池
    #[serde(default)]
    pub frames: FrameConfig,

    /// Lifetime 行为
    #[serde(default)]
    pub lifetime: LifetimeConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl FfiConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        // 引擎接口
        if let Ok(val) = env::var("GAME_ENGINE_FFI_BACKEND") {
            if let Ok(backend) = val.parse() {
                self.native.backend = backend;
            }
        }
        if let Ok(val) = env::var("GAME_ENGINE_FFI_LIBRARY") {
            self.native.library_path = Some(PathBuf::from(val));
        }

        // Lifetime
        if let Ok(val) = env::var("GAME_ENGINE_FFI_LIFETIME_MODE") {
            if let Ok(mode) = val.parse() {
                self.lifetime.mode = mode;
            }
        }

        // 调用帧池
        if let Ok(val) = env::var("GAME_ENGINE_FFI_FRAME_POOL") {
            if let Ok(size) = val.parse() {
                self.frames.max_pool_size = size;
            }
        }

        // 日志
        if let Ok(val) = env::var("GAME_ENGINE_FFI_LOG") {
            self.logging.filter = Some(val);
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.native.validate()?;
        self.frames.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./ffi.toml
    /// 2. ./ffi.json
    /// 3. <config_dir>/game_engine/ffi.toml
    /// 4. 使用默认配置
    ///
    /// 找到的配置会再应用环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = Self::find_config_file().unwrap_or_else(|| {
            tracing::info!(target: "ffi.config", "using default configuration");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    fn find_config_file() -> Option<Self> {
        if let Ok(config) = Self::from_toml_file("ffi.toml") {
            tracing::info!(target: "ffi.config", "loaded config from ffi.toml");
            return Some(config);
        }

        if let Ok(config) = Self::from_json_file("ffi.json") {
            tracing::info!(target: "ffi.config", "loaded config from ffi.json");
            return Some(config);
        }

        let config_path = dirs::config_dir()?.join("game_engine").join("ffi.toml");
        match Self::from_toml_file(&config_path) {
            Ok(config) => {
                tracing::info!(target: "ffi.config", path = ?config_path, "loaded config");
                Some(config)
            }
            Err(ConfigError::FileError(_)) => None,
            Err(err) => {
                tracing::warn!(target: "ffi.config", path = ?config_path, error = %err, "ignoring invalid config");
                None
            }
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,

    /// `EnvFilter` 指令，优先于 `level`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

use crate::impl_default;

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
    filter: None,
});

impl LoggingConfig {
    /// 传给 `EnvFilter` 的过滤指令
    pub fn directives(&self) -> String {
        self.filter
            .clone()
            .unwrap_or_else(|| self.level.as_str().to_string())
    }
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::lifetime::LifetimeMode;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    #[test]
    fn test_default_config() {
        let config = FfiConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.native.backend, Backend::Headless);
        assert_eq!(config.frames.initial_pool_size, 8);
        assert_eq!(config.frames.max_pool_size, 64);
    }

    #[test]
    fn test_toml_serialization() {
        let mut config = FfiConfig::default();
        config.lifetime.mode = LifetimeMode::Lenient;
        config.native.min_version = Some((4, 2));
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = FfiConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.lifetime.mode, LifetimeMode::Lenient);
        assert_eq!(parsed.native.min_version, Some((4, 2)));
    }

    #[test]
    fn test_partial_toml() {
        let config = FfiConfig::from_toml_str(
            r#"
            [lifetime]
            mode = "strict"

            [logging]
            level = "Debug"
            log_to_console = false
            filter = "ffi.lifetime=trace"
            "#,
        )
        .unwrap();
        assert_eq!(config.lifetime.mode, LifetimeMode::Strict);
        assert_eq!(config.frames.max_pool_size, 64);
        assert_eq!(config.logging.directives(), "ffi.lifetime=trace");
    }

    #[test]
    fn test_json_serialization() {
        let config = FfiConfig::default();
        let json_str = serde_json::to_string(&config).unwrap();
        let parsed = FfiConfig::from_json_str(&json_str).unwrap();
        assert_eq!(config.frames.max_pool_size, parsed.frames.max_pool_size);
        assert_eq!(parsed.logging.directives(), "info");
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffi.toml");
        let mut config = FfiConfig::default();
        config.frames.initial_pool_size = 2;
        config.save_toml(&path).unwrap();

        let loaded = FfiConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded.frames.initial_pool_size, 2);

        let json_path = dir.path().join("ffi.json");
        config.save_json(&json_path).unwrap();
        assert_eq!(FfiConfig::from_json_file(&json_path).unwrap().frames.initial_pool_size, 2);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = FfiConfig::default();
        config.frames.initial_pool_size = 100;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = FfiConfig::default();
        config.native.backend = Backend::Dynamic;
        assert!(config.validate().is_err());
        config.native.library_path = Some(PathBuf::from("libengine.so"));
        assert!(config.validate().is_ok());

        assert!(matches!(
            FfiConfig::from_toml_str("[frames]\nmax_pool_size = \"many\""),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            FfiConfig::from_toml_file("/nonexistent/ffi.toml"),
            Err(ConfigError::FileError(_))
        ));
    }

    /// 串行化修改进程环境变量的测试，结束时恢复原值
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
        _lock: MutexGuard<'static, ()>,
    }

    impl EnvGuard {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            let saved = vars
                .iter()
                .map(|(key, value)| {
                    let previous = env::var(key).ok();
                    env::set_var(key, value);
                    (*key, previous)
                })
                .collect();
            Self { saved, _lock: lock }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, previous) in &self.saved {
                match previous {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_overrides() {
        let config = {
            let _env = EnvGuard::set(&[
                ("GAME_ENGINE_FFI_LIFETIME_MODE", "lenient"),
                ("GAME_ENGINE_FFI_FRAME_POOL", "16"),
            ]);
            let mut config = FfiConfig::default();
            config.apply_env_overrides();
            config
        };

        assert_eq!(config.lifetime.mode, LifetimeMode::Lenient);
        assert_eq!(config.frames.max_pool_size, 16);
    }

    #[test]
    fn test_env_guard_restores_previous_values() {
        let current = || {
            let _lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
            env::var("GAME_ENGINE_FFI_LOG").ok()
        };
        let before = current();
        {
            let _env = EnvGuard::set(&[("GAME_ENGINE_FFI_LOG", "ffi.lifetime=trace")]);
            let mut config = FfiConfig::default();
            config.apply_env_overrides();
            assert_eq!(config.logging.directives(), "ffi.lifetime=trace");
        }
        assert_eq!(current(), before);
    }
}
