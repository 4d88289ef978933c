//! 扩展类注册表
//!
//! 管理宿主定义的扩展类。父类必须是引擎内置类或先注册的扩展类；
//! 注册顺序保证父类在前，注销顺序相反。

use crate::bindings::virtuals::VirtualTableBuilder;
use crate::core::error::BindingResult;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassRegistrationError {
    #[error("Duplicate class: {0}")]
    DuplicateClass(String),
    #[error("Missing parent: {0} extends unknown class {1}")]
    MissingParent(String, String),
    #[error("Unknown class: {0}")]
    UnknownClass(String),
    #[error("Class {0} still has registered subclasses: {1:?}")]
    HasSubclasses(String, Vec<String>),
}

pub type ClassResult<T> = Result<T, ClassRegistrationError>;

/// 引擎内置类及其父类
const ENGINE_CLASSES: &[(&str, Option<&str>)] = &[
    ("Object", None),
    ("RefCounted", Some("Object")),
    ("Resource", Some("RefCounted")),
    ("FileAccess", Some("RefCounted")),
    ("Node", Some("Object")),
];

/// 类元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub parent: String,
    pub is_tool: bool,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            is_tool: false,
        }
    }
}

/// 宿主侧扩展类
pub trait ExtensionClass: std::any::Any + Send {
    const NAME: &'static str;
    const PARENT: &'static str;

    fn create() -> Self
    where
        Self: Sized;

    /// 注册该类覆盖的虚函数
    fn register_virtuals(_builder: &mut VirtualTableBuilder) -> BindingResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// 扩展类注册表
pub struct ClassRegistry {
    engine_parents: HashMap<String, Option<String>>,
    classes: HashMap<String, ClassInfo>,
    order: Vec<String>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    pub fn new() -> Self {
        let engine_parents = ENGINE_CLASSES
            .iter()
            .map(|(name, parent)| (name.to_string(), parent.map(str::to_string)))
            .collect();
        Self {
            engine_parents,
            classes: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// 添加扩展类
    pub fn register(&mut self, info: ClassInfo) -> ClassResult<()> {
        // 检查重复类
        if self.is_known(&info.name) {
            return Err(ClassRegistrationError::DuplicateClass(info.name));
        }

        // 检查父类
        if !self.is_known(&info.parent) {
            return Err(ClassRegistrationError::MissingParent(
                info.name,
                info.parent,
            ));
        }

        tracing::debug!(target: "ffi.virtuals", class = %info.name, parent = %info.parent, "class registered");
        self.order.push(info.name.clone());
        self.classes.insert(info.name.clone(), info);
        Ok(())
    }

    /// 注册 `T` 并把它的虚函数写入 `builder`
    pub fn register_class<T: ExtensionClass>(&mut self, builder: &mut VirtualTableBuilder) -> BindingResult<()> {
        self.register(ClassInfo::new(T::NAME, T::PARENT))?;
        T::register_virtuals(builder)
    }

    /// 移除扩展类（子类必须先移除）
    pub fn unregister(&mut self, name: &str) -> ClassResult<ClassInfo> {
        if !self.classes.contains_key(name) {
            return Err(ClassRegistrationError::UnknownClass(name.to_string()));
        }

        let children: Vec<String> = self
            .classes
            .values()
            .filter(|info| info.parent == name)
            .map(|info| info.name.clone())
            .collect();
        if !children.is_empty() {
            return Err(ClassRegistrationError::HasSubclasses(name.to_string(), children));
        }

        self.order.retain(|class| class != name);
        self.classes
            .remove(name)
            .ok_or_else(|| ClassRegistrationError::UnknownClass(name.to_string()))
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.classes.contains_key(name) || self.engine_parents.contains_key(name)
    }

    pub fn is_engine_class(&self, name: &str) -> bool {
        self.engine_parents.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    fn parent_of(&self, name: &str) -> Option<&str> {
        match self.classes.get(name) {
            Some(info) => Some(info.parent.as_str()),
            None => self
                .engine_parents
                .get(name)
                .and_then(|parent| parent.as_deref()),
        }
    }

    /// 父类链（不含自身），最近的在前
    pub fn ancestors<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let mut current = self.parent_of(name);
        std::iter::from_fn(move || {
            let next = current?;
            current = self.parent_of(next);
            Some(next)
        })
    }

    pub fn inherits_from(&self, name: &str, ancestor: &str) -> bool {
        name == ancestor || self.ancestors(name).any(|class| class == ancestor)
    }

    /// 获取拓扑排序的扩展类列表（父类在前）
    pub fn registration_order(&self) -> Vec<&ClassInfo> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();

        fn visit<'a>(
            name: &str,
            classes: &'a HashMap<String, ClassInfo>,
            visited: &mut HashSet<String>,
            order: &mut Vec<&'a ClassInfo>,
        ) {
            if visited.contains(name) {
                return;
            }
            let Some(info) = classes.get(name) else {
                return;
            };
            visited.insert(name.to_string());
            visit(&info.parent, classes, visited, order);
            order.push(info);
        }

        for name in &self.order {
            visit(name, &self.classes, &mut visited, &mut order);
        }
        order
    }

    /// 注销顺序（子类在前）
    pub fn unregistration_order(&self) -> Vec<&ClassInfo> {
        let mut order = self.registration_order();
        order.reverse();
        order
    }

    /// 获取扩展类数量
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::virtuals::{NodeVirtual, NodeVirtuals};

    struct Enemy;

    impl NodeVirtuals for Enemy {
        fn overrides() -> &'static [NodeVirtual] {
            &[NodeVirtual::Ready]
        }
    }

    impl ExtensionClass for Enemy {
        const NAME: &'static str = "Enemy";
        const PARENT: &'static str = "Node";

        fn create() -> Self {
            Enemy
        }

        fn register_virtuals(builder: &mut VirtualTableBuilder) -> BindingResult<()> {
            builder.register_node::<Self>(Self::NAME)
        }
    }

    #[test]
    fn test_parent_must_exist() {
        let mut registry = ClassRegistry::new();
        assert_eq!(
            registry.register(ClassInfo::new("Boss", "Enemy")),
            Err(ClassRegistrationError::MissingParent(
                "Boss".to_string(),
                "Enemy".to_string()
            ))
        );
        registry.register(ClassInfo::new("Enemy", "Node")).unwrap();
        registry.register(ClassInfo::new("Boss", "Enemy")).unwrap();
        assert_eq!(registry.class_count(), 2);
    }

    #[test]
    fn test_duplicate_class() {
        let mut registry = ClassRegistry::new();
        registry.register(ClassInfo::new("Enemy", "Node")).unwrap();
        assert!(matches!(
            registry.register(ClassInfo::new("Enemy", "Node")),
            Err(ClassRegistrationError::DuplicateClass(_))
        ));
        assert!(matches!(
            registry.register(ClassInfo::new("Node", "Object")),
            Err(ClassRegistrationError::DuplicateClass(_))
        ));
    }

    #[test]
    fn test_ancestors() {
        let mut registry = ClassRegistry::new();
        registry.register(ClassInfo::new("Enemy", "Node")).unwrap();
        registry.register(ClassInfo::new("Boss", "Enemy")).unwrap();
        let chain: Vec<_> = registry.ancestors("Boss").collect();
        assert_eq!(chain, vec!["Enemy", "Node", "Object"]);
        assert!(registry.inherits_from("Boss", "Object"));
        assert!(!registry.inherits_from("Boss", "RefCounted"));
        assert_eq!(registry.ancestors("Object").count(), 0);
    }

    #[test]
    fn test_order() {
        let mut registry = ClassRegistry::new();
        registry.register(ClassInfo::new("Enemy", "Node")).unwrap();
        registry.register(ClassInfo::new("Boss", "Enemy")).unwrap();
        registry.register(ClassInfo::new("Save", "Resource")).unwrap();

        let names: Vec<_> = registry
            .registration_order()
            .iter()
            .map(|info| info.name.as_str())
            .collect();
        assert_eq!(names, vec!["Enemy", "Boss", "Save"]);

        let reversed: Vec<_> = registry
            .unregistration_order()
            .iter()
            .map(|info| info.name.as_str())
            .collect();
        assert_eq!(reversed, vec!["Save", "Boss", "Enemy"]);
    }

    #[test]
    fn test_unregister_children_first() {
        let mut registry = ClassRegistry::new();
        registry.register(ClassInfo::new("Enemy", "Node")).unwrap();
        registry.register(ClassInfo::new("Boss", "Enemy")).unwrap();
        assert!(matches!(
            registry.unregister("Enemy"),
            Err(ClassRegistrationError::HasSubclasses(_, _))
        ));
        registry.unregister("Boss").unwrap();
        registry.unregister("Enemy").unwrap();
        assert!(matches!(
            registry.unregister("Node"),
            Err(ClassRegistrationError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_register_class_with_virtuals() {
        let mut registry = ClassRegistry::new();
        let mut builder = VirtualTableBuilder::new();
        registry.register_class::<Enemy>(&mut builder).unwrap();
        let table = builder.build();
        assert!(table.resolve(&registry, "Enemy", "_ready").is_some());
        assert_eq!(table.raw_index(&registry, "Enemy", "_process"), 0);
        let _ = Enemy::create();
    }
}
