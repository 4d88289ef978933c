//! Ownership arena for native handles.
//!
//! A [`Lifetime`] collects every native handle created or received during
//! one logical call chain and releases all of them, exactly once, when the
//! chain ends. Handles that must outlive the chain are transferred out
//! first and become the caller's responsibility.
//!
//! Misuse is a programming error: registering or transferring after `end`
//! panics. A second `end` panics in [`LifetimeMode::Strict`] and returns
//! [`LifetimeError::AlreadyEnded`] in [`LifetimeMode::Lenient`].

use crate::bindings::handle::Handle;
use crate::core::error::{BindingResult, LifetimeError, LifetimeResult};
use crate::native::NativeInterface;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LIFETIME_ID: AtomicU64 = AtomicU64::new(1);

/// How a second `end` is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifetimeMode {
    Strict,
    Lenient,
}

impl Default for LifetimeMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LifetimeMode::Strict
        } else {
            LifetimeMode::Lenient
        }
    }
}

impl std::str::FromStr for LifetimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(LifetimeMode::Strict),
            "lenient" => Ok(LifetimeMode::Lenient),
            other => Err(format!("unknown lifetime mode '{other}'")),
        }
    }
}

/// Names one registration inside one Lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleKey {
    lifetime: u64,
    index: u32,
}

impl HandleKey {
    pub fn lifetime_id(&self) -> u64 {
        self.lifetime
    }
}

/// Counters for one Lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifetimeStats {
    pub registered: usize,
    pub transferred: usize,
    pub released: usize,
}

#[derive(Default)]
struct LifetimeState {
    slots: Vec<Option<Handle>>,
    /// Live handles of exclusive kinds, for duplicate detection.
    exclusive: HashSet<Handle>,
    live: usize,
    ended: bool,
    stats: LifetimeStats,
}

/// Scoped registry of native handles.
///
/// `Lifetime` is `!Sync` (interior `RefCell`), so one instance serves one
/// call chain at a time.
pub struct Lifetime {
    id: u64,
    native: Arc<dyn NativeInterface>,
    mode: LifetimeMode,
    state: RefCell<LifetimeState>,
}

impl Lifetime {
    /// Begins a new, empty Lifetime.
    pub fn begin(native: Arc<dyn NativeInterface>, mode: LifetimeMode) -> Self {
        let id = NEXT_LIFETIME_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target: "ffi.lifetime", id, ?mode, "lifetime begin");
        Self {
            id,
            native,
            mode,
            state: RefCell::new(LifetimeState::default()),
        }
    }

    /// Runs `f` inside a fresh Lifetime and ends it afterwards.
    pub fn scope<R>(
        native: Arc<dyn NativeInterface>,
        mode: LifetimeMode,
        f: impl FnOnce(&Lifetime) -> R,
    ) -> R {
        let lifetime = Lifetime::begin(native, mode);
        let result = f(&lifetime);
        if !lifetime.is_ended() {
            lifetime.release_all();
        }
        result
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> LifetimeMode {
        self.mode
    }

    pub fn native(&self) -> &dyn NativeInterface {
        self.native.as_ref()
    }

    pub fn native_arc(&self) -> &Arc<dyn NativeInterface> {
        &self.native
    }

    /// Registers a handle for release at `end`.
    ///
    /// # Panics
    ///
    /// Panics if the Lifetime has already ended, or if an exclusive handle
    /// (see [`Handle::is_exclusive`]) is already held.
    pub fn register(&self, handle: Handle) -> HandleKey {
        match self.try_register(handle) {
            Ok(key) => key,
            Err(_) => panic!(
                "lifetime {} already holds {:?}; it would be released twice",
                self.id, handle
            ),
        }
    }

    /// Like [`Lifetime::register`], but reports a duplicate exclusive handle
    /// as [`LifetimeError::AlreadyRegistered`] instead of panicking.
    ///
    /// # Panics
    ///
    /// Panics if the Lifetime has already ended.
    pub fn try_register(&self, handle: Handle) -> LifetimeResult<HandleKey> {
        let mut state = self.state.borrow_mut();
        if state.ended {
            panic!(
                "lifetime {} used after end: cannot register {:?}",
                self.id, handle
            );
        }
        if handle.is_exclusive() && !state.exclusive.insert(handle) {
            return Err(LifetimeError::AlreadyRegistered(self.id));
        }
        let index = state.slots.len() as u32;
        state.slots.push(Some(handle));
        state.live += 1;
        state.stats.registered += 1;
        Ok(HandleKey {
            lifetime: self.id,
            index,
        })
    }

    /// Takes over a handle that was transferred out of another Lifetime.
    pub fn adopt(&self, handle: Handle) -> HandleKey {
        self.register(handle)
    }

    /// Removes a handle from the release set and hands it to the caller.
    ///
    /// # Panics
    ///
    /// Panics if the Lifetime has already ended.
    pub fn transfer(&self, key: HandleKey) -> LifetimeResult<Handle> {
        let mut state = self.state.borrow_mut();
        if state.ended {
            panic!("lifetime {} used after end: cannot transfer", self.id);
        }
        if key.lifetime != self.id {
            return Err(LifetimeError::ForeignKey {
                lifetime: self.id,
                key_lifetime: key.lifetime,
            });
        }
        let handle = state
            .slots
            .get_mut(key.index as usize)
            .and_then(Option::take)
            .ok_or(LifetimeError::NotRegistered(self.id))?;
        state.exclusive.remove(&handle);
        state.live -= 1;
        state.stats.transferred += 1;
        Ok(handle)
    }

    /// Transfers the most recent registration equal to `handle`.
    pub fn transfer_handle(&self, handle: &Handle) -> LifetimeResult<Handle> {
        let key = {
            let state = self.state.borrow();
            state
                .slots
                .iter()
                .rposition(|slot| slot.as_ref() == Some(handle))
                .map(|index| HandleKey {
                    lifetime: self.id,
                    index: index as u32,
                })
        };
        match key {
            Some(key) => self.transfer(key),
            None => {
                if self.is_ended() {
                    panic!("lifetime {} used after end: cannot transfer", self.id);
                }
                Err(LifetimeError::NotRegistered(self.id))
            }
        }
    }

    /// Moves a registered handle out into an [`Owned`] guard.
    pub fn detach(&self, handle: &Handle) -> LifetimeResult<Owned> {
        let handle = self.transfer_handle(handle)?;
        Ok(Owned::new(handle, Arc::clone(&self.native)))
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        let state = self.state.borrow();
        if handle.is_exclusive() {
            return state.exclusive.contains(handle);
        }
        state.slots.iter().any(|slot| slot.as_ref() == Some(handle))
    }

    /// Number of handles that `end` would release.
    pub fn len(&self) -> usize {
        self.state.borrow().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ended(&self) -> bool {
        self.state.borrow().ended
    }

    pub fn stats(&self) -> LifetimeStats {
        self.state.borrow().stats
    }

    /// Ends the Lifetime, releasing every handle still registered.
    ///
    /// Returns the number of handles released.
    ///
    /// # Panics
    ///
    /// Panics on a second `end` in [`LifetimeMode::Strict`].
    pub fn end(&self) -> BindingResult<usize> {
        if self.is_ended() {
            match self.mode {
                LifetimeMode::Strict => {
                    panic!("lifetime {} ended twice", self.id)
                }
                LifetimeMode::Lenient => {
                    tracing::warn!(target: "ffi.lifetime", id = self.id, "lifetime ended twice");
                    return Err(LifetimeError::AlreadyEnded(self.id).into());
                }
            }
        }
        Ok(self.release_all())
    }

    fn release_all(&self) -> usize {
        let handles: Vec<Handle> = {
            let mut state = self.state.borrow_mut();
            state.ended = true;
            state.live = 0;
            state.exclusive.clear();
            std::mem::take(&mut state.slots)
                .into_iter()
                .flatten()
                .collect()
        };

        for handle in &handles {
            self.native.release(handle);
        }

        let released = handles.len();
        self.state.borrow_mut().stats.released += released;
        tracing::trace!(target: "ffi.lifetime", id = self.id, released, "lifetime end");
        released
    }
}

impl Drop for Lifetime {
    fn drop(&mut self) {
        let ended = self.state.borrow().ended;
        if !ended {
            let released = self.release_all();
            if released > 0 {
                tracing::debug!(
                    target: "ffi.lifetime",
                    id = self.id,
                    released,
                    "lifetime dropped without end"
                );
            }
        }
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Lifetime")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("live", &state.live)
            .field("ended", &state.ended)
            .finish()
    }
}

/// A handle transferred out of every Lifetime.
///
/// Released when dropped unless handed on with [`Owned::adopt_into`] or
/// [`Owned::into_raw`].
pub struct Owned {
    handle: Option<Handle>,
    native: Arc<dyn NativeInterface>,
}

impl Owned {
    pub fn new(handle: Handle, native: Arc<dyn NativeInterface>) -> Self {
        Self {
            handle: Some(handle),
            native,
        }
    }

    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }

    /// Registers the handle in `lifetime`, which releases it at its end.
    pub fn adopt_into(mut self, lifetime: &Lifetime) -> Option<HandleKey> {
        self.handle.take().map(|handle| lifetime.adopt(handle))
    }

    /// Gives up ownership without releasing (for example, to the engine).
    pub fn into_raw(mut self) -> Option<Handle> {
        self.handle.take()
    }

    /// Releases the handle now.
    pub fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            self.native.release(&handle);
        }
    }
}

impl Drop for Owned {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.native.release(&handle);
        }
    }
}

impl fmt::Debug for Owned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned").field("handle", &self.handle).finish()
    }
}
