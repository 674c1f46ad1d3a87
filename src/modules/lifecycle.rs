//! Per-module runtime state.
//!
//! Each registered module owns one [`ModuleSlot`]. The slot carries:
//! - a lifecycle mutex that serializes load/unload of that module id,
//! - the current [`ModuleState`] and live instance behind a `RwLock`,
//! - the in-flight counter of tasks bound to the instance.
//!
//! Workers bind to a module through [`ModuleLease`]. A lease is only handed
//! out while the state is `ready`, and the check and increment happen under
//! the state read lock, so once `unload` has flipped the state to `draining`
//! no new lease can appear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, MutexGuard, Notify, RwLock};

use crate::modules::executor::{Executor, ModuleInstance};
use crate::modules::manifest::ModuleManifest;
use crate::types::ModuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Unloaded,
    Loading,
    Ready,
    Draining,
    Failed,
}

impl ModuleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModuleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unloaded" => Ok(Self::Unloaded),
            "loading" => Ok(Self::Loading),
            "ready" => Ok(Self::Ready),
            "draining" => Ok(Self::Draining),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown module state `{}`", other)),
        }
    }
}

/// A module instance bound to the manifest it was built from.
///
/// Hot-swapping replaces the whole `Arc<LoadedModule>` in the slot; a running
/// instance is never mutated in place.
#[derive(Debug)]
pub struct LoadedModule {
    pub manifest: Arc<ModuleManifest>,
    pub instance: ModuleInstance,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedModule {
    pub fn id(&self) -> &ModuleId {
        &self.manifest.id
    }
}

#[derive(Debug)]
pub(crate) struct SlotInner {
    pub state: ModuleState,
    pub loaded: Option<Arc<LoadedModule>>,
    pub failure: Option<String>,
}

pub struct ModuleSlot {
    id: ModuleId,
    lifecycle: Mutex<()>,
    inner: RwLock<SlotInner>,
    in_flight: AtomicUsize,
    drained: Notify,
}

impl ModuleSlot {
    pub(crate) fn new(id: ModuleId) -> Self {
        Self {
            id,
            lifecycle: Mutex::new(()),
            inner: RwLock::new(SlotInner {
                state: ModuleState::Unloaded,
                loaded: None,
                failure: None,
            }),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub async fn state(&self) -> ModuleState {
        self.inner.read().await.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The live instance, if the module is ready or draining.
    pub async fn loaded(&self) -> Option<Arc<LoadedModule>> {
        self.inner.read().await.loaded.clone()
    }

    pub async fn failure(&self) -> Option<String> {
        self.inner.read().await.failure.clone()
    }

    pub(crate) async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    pub(crate) async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, SlotInner> {
        self.inner.write().await
    }

    /// Hand out a lease if the module is ready and `accept` approves the
    /// instance. `accept` runs under the state read lock and must be quick.
    pub async fn try_lease_if<F>(self: &Arc<Self>, accept: F) -> Option<ModuleLease>
    where
        F: FnOnce(&LoadedModule) -> bool,
    {
        let inner = self.inner.read().await;
        if inner.state != ModuleState::Ready {
            return None;
        }
        let module = inner.loaded.as_ref()?;
        if !accept(module) {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(ModuleLease {
            slot: Arc::clone(self),
            module: Arc::clone(module),
        })
    }

    /// Wait until the in-flight count reaches zero or `deadline` passes.
    /// Returns `true` when drained.
    pub(crate) async fn wait_drained(&self, deadline: tokio::time::Instant) -> bool {
        loop {
            // Register interest before checking so a release in between is not missed.
            let notified = self.drained.notified();
            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl fmt::Debug for ModuleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSlot")
            .field("id", &self.id)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Binds one in-flight task to a module instance. Dropping the lease
/// decrements the module's in-flight count.
pub struct ModuleLease {
    slot: Arc<ModuleSlot>,
    module: Arc<LoadedModule>,
}

impl ModuleLease {
    pub fn id(&self) -> &ModuleId {
        self.module.id()
    }

    pub fn module(&self) -> &Arc<LoadedModule> {
        &self.module
    }

    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.module.instance.as_executor().cloned()
    }
}

impl Drop for ModuleLease {
    fn drop(&mut self) {
        self.slot.release();
    }
}

impl fmt::Debug for ModuleLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLease").field("module", self.id()).finish()
    }
}
