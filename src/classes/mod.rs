//! 引擎类包装
//!
//! 少量手写的引擎类包装，走与生成代码相同的 `invoke` 路径：
//!
//! - [`FileAccess`]: 文件读写（`open` 返回转移给宿主的 RefCounted 对象）
//! - [`Node`]: 场景树节点（`get_parent` 返回借用对象）
//! - [`Resource`]: 资源与场景本地复制策略
//!
//! 每个模块的 `sig` 子模块声明该类用到的方法签名。

pub mod file_access;
pub mod node;
pub mod object;
pub mod resource;

pub use file_access::{FileAccess, ModeFlags};
pub use node::Node;
pub use object::EngineClass;
pub use resource::{DuplicateStrategy, LocalToSceneStrategy, Resource, SceneInstantiator, ShareStrategy};
