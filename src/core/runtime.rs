//! 绑定运行时
//!
//! 把配置、日志、引擎接口、方法缓存、调用帧池和虚函数表组装在一起。
//! 宿主在扩展初始化时构建一次 `BindingRuntime`，之后所有包装调用都通过它
//! 提供的 [`CallContext`] 进行。

use crate::bindings::classes::{ClassRegistry, ExtensionClass};
use crate::bindings::frame_pool::{FramePool, FramePoolStats};
use crate::bindings::handle::Word;
use crate::bindings::invoke::CallContext;
use crate::bindings::lifetime::{Lifetime, LifetimeMode};
use crate::bindings::method_table::{MethodBindingTable, MethodTableStats};
use crate::bindings::virtuals::{VirtualTable, VirtualTableBuilder};
use crate::config::{Backend, FfiConfig, LoggingConfig, NativeConfig};
use crate::core::error::{BindingError, BindingResult, VirtualError};
use crate::native::{EngineVersion, HeadlessEngine, NativeInterface, ProcAddressInterface};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// 运行时统计
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub engine: EngineVersion,
    pub lifetime_mode: LifetimeMode,
    pub methods: MethodTableStats,
    pub frames: FramePoolStats,
    pub extension_classes: usize,
    pub virtuals: usize,
}

/// 绑定运行时
///
/// # 示例
///
/// ```
/// use game_engine_ffi::classes::Node;
/// use game_engine_ffi::config::FfiConfig;
/// use game_engine_ffi::core::BindingRuntime;
///
/// let runtime = BindingRuntime::builder(FfiConfig::default()).build()?;
/// let name = runtime.scope(|cx| {
///     let node = Node::new(cx)?;
///     node.set_name(cx, "Player")?;
///     node.get_name(cx)
/// })??;
/// assert_eq!(name, "Player");
/// # Ok::<(), game_engine_ffi::core::BindingError>(())
/// ```
pub struct BindingRuntime {
    native: Arc<dyn NativeInterface>,
    version: EngineVersion,
    mode: LifetimeMode,
    methods: MethodBindingTable,
    frames: FramePool,
    virtuals: VirtualTable,
    classes: ClassRegistry,
}

impl BindingRuntime {
    pub fn builder(config: FfiConfig) -> BindingRuntimeBuilder {
        BindingRuntimeBuilder {
            config,
            native: None,
            classes: ClassRegistry::new(),
            virtuals: VirtualTableBuilder::new(),
        }
    }

    /// 初始化全局 tracing 订阅者，重复调用时返回 `false`
    pub fn init_logging(config: &LoggingConfig) -> bool {
        if !config.log_to_console {
            return false;
        }

        let filter = EnvFilter::try_new(config.directives()).unwrap_or_else(|err| {
            eprintln!("invalid log filter {:?}: {}", config.directives(), err);
            EnvFilter::new(config.level.as_str())
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
    }

    pub fn native(&self) -> &Arc<dyn NativeInterface> {
        &self.native
    }

    pub fn version(&self) -> &EngineVersion {
        &self.version
    }

    pub fn lifetime_mode(&self) -> LifetimeMode {
        self.mode
    }

    pub fn methods(&self) -> &MethodBindingTable {
        &self.methods
    }

    pub fn frames(&self) -> &FramePool {
        &self.frames
    }

    pub fn virtuals(&self) -> &VirtualTable {
        &self.virtuals
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// 开启一个新的 Lifetime，调用方负责 `end()`
    pub fn begin_lifetime(&self) -> Lifetime {
        Lifetime::begin(Arc::clone(&self.native), self.mode)
    }

    pub fn context<'a>(&'a self, lifetime: &'a Lifetime) -> CallContext<'a> {
        CallContext::new(&self.methods, &self.frames, lifetime)
    }

    /// 在新的 Lifetime 中执行 `f`，结束时释放其中所有句柄
    pub fn scope<R>(&self, f: impl FnOnce(&CallContext<'_>) -> R) -> BindingResult<R> {
        let lifetime = self.begin_lifetime();
        let result = f(&self.context(&lifetime));
        let released = lifetime.end()?;
        tracing::trace!(target: "ffi.lifetime", released, "runtime scope ended");
        Ok(result)
    }

    /// 按类名和虚函数名分发，找不到时沿父类链查找
    pub fn call_virtual(
        &self,
        class: &str,
        name: &str,
        instance: &mut dyn Any,
        args: &[&[Word]],
        ret: &mut [Word],
    ) -> BindingResult<()> {
        let index = self
            .virtuals
            .resolve(&self.classes, class, name)
            .ok_or_else(|| VirtualError::NotFound {
                class: class.to_string(),
                name: name.to_string(),
            })?;
        self.virtuals.call(index, &self.native, self.mode, instance, args, ret)
    }

    /// 引擎查询虚函数时使用的编号，`0` 表示未覆盖
    pub fn virtual_index(&self, class: &str, name: &str) -> u8 {
        self.virtuals.raw_index(&self.classes, class, name)
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            engine: self.version.clone(),
            lifetime_mode: self.mode,
            methods: self.methods.stats(),
            frames: self.frames.stats(),
            extension_classes: self.classes.class_count(),
            virtuals: self.virtuals.len(),
        }
    }
}

/// [`BindingRuntime`] 构建器
pub struct BindingRuntimeBuilder {
    config: FfiConfig,
    native: Option<Arc<dyn NativeInterface>>,
    classes: ClassRegistry,
    virtuals: VirtualTableBuilder,
}

impl BindingRuntimeBuilder {
    /// 使用已有的引擎接口，忽略配置中的 backend
    pub fn native(mut self, native: Arc<dyn NativeInterface>) -> Self {
        self.native = Some(native);
        self
    }

    /// 注册扩展类及其虚函数
    pub fn register_class<T: ExtensionClass>(mut self) -> BindingResult<Self> {
        self.classes.register_class::<T>(&mut self.virtuals)?;
        Ok(self)
    }

    pub fn build(self) -> BindingResult<BindingRuntime> {
        self.config.validate()?;

        let native = match self.native {
            Some(native) => native,
            None => connect(&self.config.native)?,
        };

        let version = native.version();
        if let Some((major, minor)) = self.config.native.min_version {
            if !version.at_least(major, minor) {
                return Err(BindingError::IncompatibleEngine {
                    found: version.to_string(),
                    required: format!("{}.{}", major, minor),
                });
            }
        }

        let runtime = BindingRuntime {
            native,
            mode: self.config.lifetime.mode,
            methods: MethodBindingTable::new(),
            frames: FramePool::from_config(&self.config.frames),
            virtuals: self.virtuals.build(),
            classes: self.classes,
            version,
        };
        tracing::info!(
            target: "ffi.native",
            engine = %runtime.version,
            label = %runtime.version.label,
            mode = ?runtime.mode,
            classes = runtime.classes.class_count(),
            "binding runtime ready"
        );
        Ok(runtime)
    }
}

fn connect(config: &NativeConfig) -> BindingResult<Arc<dyn NativeInterface>> {
    match config.backend {
        Backend::Headless => Ok(Arc::new(HeadlessEngine::new())),
        Backend::Dynamic => {
            let path = config.library_path.as_deref().ok_or_else(|| {
                crate::config::ConfigError::ValidationError(
                    "dynamic backend requires native.library_path".to_string(),
                )
            })?;
            let native = ProcAddressInterface::load(path, &config.entry_symbol)?;
            Ok(Arc::new(native))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::virtuals::{NodeVirtual, NodeVirtuals};
    use crate::classes::Node;
    use crate::config::LogLevel;

    #[derive(Default)]
    struct Counter {
        ready: u32,
        elapsed: f64,
    }

    impl NodeVirtuals for Counter {
        fn overrides() -> &'static [NodeVirtual] {
            &[NodeVirtual::Ready, NodeVirtual::Process]
        }

        fn ready(&mut self) {
            self.ready += 1;
        }

        fn process(&mut self, delta: f64) {
            self.elapsed += delta;
        }
    }

    impl ExtensionClass for Counter {
        const NAME: &'static str = "Counter";
        const PARENT: &'static str = "Node";

        fn create() -> Self {
            Counter::default()
        }

        fn register_virtuals(builder: &mut VirtualTableBuilder) -> BindingResult<()> {
            builder.register_node::<Self>(Self::NAME)
        }
    }

    #[test]
    fn test_build_headless() {
        let runtime = BindingRuntime::builder(FfiConfig::default()).build().unwrap();
        assert_eq!(runtime.version().major, 4);
        assert_eq!(runtime.lifetime_mode(), LifetimeMode::default());

        let count = runtime
            .scope(|cx| {
                let node = Node::new(cx)?;
                node.get_child_count(cx)
            })
            .unwrap()
            .unwrap();
        assert_eq!(count, 0);

        let stats = runtime.stats();
        assert_eq!(stats.methods.cached, 1);
        assert_eq!(stats.extension_classes, 0);
    }

    #[test]
    fn test_version_check() {
        let mut config = FfiConfig::default();
        config.native.min_version = Some((4, 2));
        assert!(BindingRuntime::builder(config.clone()).build().is_ok());

        config.native.min_version = Some((5, 0));
        assert!(matches!(
            BindingRuntime::builder(config).build(),
            Err(BindingError::IncompatibleEngine { .. })
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = FfiConfig::default();
        config.frames.max_pool_size = 0;
        assert!(matches!(
            BindingRuntime::builder(config).build(),
            Err(BindingError::Config(_))
        ));
    }

    #[test]
    fn test_call_virtual_through_runtime() {
        let runtime = BindingRuntime::builder(FfiConfig::default())
            .register_class::<Counter>()
            .unwrap()
            .build()
            .unwrap();
        assert_ne!(runtime.virtual_index("Counter", "_ready"), 0);
        assert_eq!(runtime.virtual_index("Counter", "_exit_tree"), 0);

        let mut counter = Counter::create();
        runtime.call_virtual("Counter", "_ready", &mut counter, &[], &mut []).unwrap();
        let delta = 0.5f64.to_bits();
        runtime
            .call_virtual("Counter", "_process", &mut counter, &[&[delta][..]], &mut [])
            .unwrap();
        assert_eq!(counter.ready, 1);
        assert_eq!(counter.elapsed, 0.5);

        assert!(matches!(
            runtime.call_virtual("Counter", "_exit_tree", &mut counter, &[], &mut []),
            Err(BindingError::Virtual(VirtualError::NotFound { .. }))
        ));
        assert_eq!(runtime.stats().virtuals, 2);
    }

    #[test]
    fn test_duplicate_class_registration() {
        let result = BindingRuntime::builder(FfiConfig::default())
            .register_class::<Counter>()
            .and_then(|builder| builder.register_class::<Counter>());
        assert!(matches!(result, Err(BindingError::Class(_))));
    }

    #[test]
    fn test_logging_disabled() {
        let config = LoggingConfig {
            level: LogLevel::Debug,
            log_to_console: false,
            filter: None,
        };
        assert!(!BindingRuntime::init_logging(&config));
    }
}
