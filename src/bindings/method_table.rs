//! Method binding table.
//!
//! Caches engine method pointers per `(class, method, hash)`. The hit path
//! takes a read lock only; a miss re-checks under the write lock so the
//! expensive engine lookup runs at most once per key even when several
//! threads miss together.

use crate::core::error::{BindingError, BindingResult};
use crate::native::{MethodBind, NativeInterface};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Identity of an engine method. The hash encodes the expected signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub class: Cow<'static, str>,
    pub method: Cow<'static, str>,
    pub hash: i64,
}

impl MethodKey {
    pub const fn new_static(class: &'static str, method: &'static str, hash: i64) -> Self {
        Self {
            class: Cow::Borrowed(class),
            method: Cow::Borrowed(method),
            hash,
        }
    }

    pub fn new(class: impl Into<String>, method: impl Into<String>, hash: i64) -> Self {
        Self {
            class: Cow::Owned(class.into()),
            method: Cow::Owned(method.into()),
            hash,
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}#{}", self.class, self.method, self.hash)
    }
}

/// Snapshot of table counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MethodTableStats {
    pub cached: usize,
    pub hits: u64,
    pub misses: u64,
    pub resolutions: u64,
    pub failures: u64,
}

/// Process-wide cache of resolved method pointers, injected where needed.
#[derive(Default)]
pub struct MethodBindingTable {
    binds: RwLock<HashMap<MethodKey, MethodBind>>,
    hits: AtomicU64,
    misses: AtomicU64,
    resolutions: AtomicU64,
    failures: AtomicU64,
}

impl MethodBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a method pointer, consulting the engine only on first use.
    pub fn resolve(
        &self,
        native: &dyn NativeInterface,
        class: &'static str,
        method: &'static str,
        hash: i64,
    ) -> BindingResult<MethodBind> {
        self.resolve_key(native, &MethodKey::new_static(class, method, hash))
    }

    pub fn resolve_key(&self, native: &dyn NativeInterface, key: &MethodKey) -> BindingResult<MethodBind> {
        {
            let binds = self.binds.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(bind) = binds.get(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(*bind);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut binds = self.binds.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(bind) = binds.get(key) {
            return Ok(*bind);
        }

        self.resolutions.fetch_add(1, Ordering::Relaxed);
        match native.lookup_method(&key.class, &key.method, key.hash) {
            Some(bind) => {
                tracing::debug!(target: "ffi.methods", method = %key, "method bind resolved");
                binds.insert(key.clone(), bind);
                Ok(bind)
            }
            None => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    target: "ffi.methods",
                    method = %key,
                    "method bind not found; bindings do not match the running engine"
                );
                Err(BindingError::UnresolvedMethod {
                    class: key.class.to_string(),
                    method: key.method.to_string(),
                    hash: key.hash,
                })
            }
        }
    }

    /// Pre-resolves a batch of keys, stopping at the first failure.
    pub fn warm<'k>(
        &self,
        native: &dyn NativeInterface,
        keys: impl IntoIterator<Item = &'k MethodKey>,
    ) -> BindingResult<usize> {
        let mut resolved = 0;
        for key in keys {
            self.resolve_key(native, key)?;
            resolved += 1;
        }
        Ok(resolved)
    }

    pub fn contains(&self, key: &MethodKey) -> bool {
        self.binds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.binds.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MethodTableStats {
        MethodTableStats {
            cached: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            resolutions: self.resolutions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classes::file_access::sig;
    use crate::bindings::invoke::MethodSignature;
    use crate::native::HeadlessEngine;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resolve_once() {
        let engine = HeadlessEngine::new();
        let table = MethodBindingTable::new();
        let first = table
            .resolve(&engine, "FileAccess", "get_length", sig::GetLength::HASH)
            .unwrap();
        let second = table
            .resolve(&engine, "FileAccess", "get_length", sig::GetLength::HASH)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(engine.method_lookups("FileAccess", "get_length"), 1);
        let stats = table.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.resolutions, 1);
        assert_eq!(stats.cached, 1);
    }

    #[test]
    fn test_hash_mismatch_is_unresolved() {
        let engine = HeadlessEngine::new();
        let table = MethodBindingTable::new();
        let err = table
            .resolve(&engine, "FileAccess", "get_length", 12345)
            .unwrap_err();
        assert!(matches!(err, BindingError::UnresolvedMethod { hash: 12345, .. }));
        assert_eq!(table.stats().failures, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_warm() {
        let engine = HeadlessEngine::new();
        let table = MethodBindingTable::new();
        let keys = [
            MethodKey::new_static("FileAccess", "get_length", sig::GetLength::HASH),
            MethodKey::new("FileAccess", "get_position", sig::GetPosition::HASH),
        ];
        assert_eq!(table.warm(&engine, &keys).unwrap(), 2);
        assert!(keys.iter().all(|key| table.contains(key)));
    }

    #[test]
    fn test_concurrent_resolution_hits_engine_once() {
        let engine = Arc::new(HeadlessEngine::new());
        let table = Arc::new(MethodBindingTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| {
                            table
                                .resolve(engine.as_ref(), "FileAccess", "get_length", sig::GetLength::HASH)
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut binds = Vec::new();
        for handle in handles {
            binds.extend(handle.join().unwrap());
        }
        assert!(binds.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(engine.method_lookups("FileAccess", "get_length"), 1);
        assert_eq!(table.stats().resolutions, 1);
    }
}
