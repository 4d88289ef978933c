use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// 引擎接口后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// 进程内引擎
    Headless,
    /// 从动态库解析的扩展接口
    Dynamic,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "headless" => Ok(Backend::Headless),
            "dynamic" => Ok(Backend::Dynamic),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// 引擎接口配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// 后端选择
    pub backend: Backend,

    /// 动态库路径（Dynamic 后端必需）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_path: Option<PathBuf>,

    /// 入口符号
    pub entry_symbol: String,

    /// 最低引擎版本 (major, minor)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<(u32, u32)>,
}

impl_default!(NativeConfig {
    backend: Backend::Headless,
    library_path: None,
    entry_symbol: "gdextension_get_proc_address".to_string(),
    min_version: None,
});

impl NativeConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.backend == Backend::Dynamic && self.library_path.is_none() {
            return Err(ConfigError::ValidationError(
                "Dynamic backend requires a library path".to_string(),
            ));
        }
        if self.entry_symbol.is_empty() {
            return Err(ConfigError::ValidationError(
                "Entry symbol must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
