//! Lock registry: which mutex governs a (lock type, wallet) pair
//!
//! The registry owns one global [`TimedMutex`] per [`LockType`] and a lazily
//! populated map of per-wallet mutex sets. `SEND_TX` is scoped per wallet, so
//! different wallets may build transactions concurrently. `HSM` is always
//! global, since the external signing device serves one session at a time.
//!
//! The registry is an ordinary value built by the service's composition root
//! and shared through an `Arc`; tests build their own isolated instances.

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;

use super::mutex::{TimedMutex, DEFAULT_UNLOCK_TIMEOUT};
use crate::logging::{log_lock, LogLevel};

/// Whether a lock type is shared process-wide or instantiated per wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Global,
    PerWallet,
}

/// Closed set of lock types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    /// Guards transaction construction and broadcast for a wallet
    SendTx,
    /// Guards the single shared connection to the external signing device
    Hsm,
}

impl LockType {
    /// Every lock type, in registration order
    pub const ALL: [LockType; 2] = [LockType::SendTx, LockType::Hsm];

    /// Scoping table. A new lock type must be registered here.
    pub fn scope(&self) -> LockScope {
        match self {
            LockType::SendTx => LockScope::PerWallet,
            LockType::Hsm => LockScope::Global,
        }
    }

    /// Message returned to callers refused by this lock
    pub fn busy_message(&self) -> &'static str {
        match self {
            LockType::SendTx => {
                "You already have a transaction being sent. Please wait until it's done to send another."
            }
            LockType::Hsm => {
                "You already have a connection open with the HSM. Please wait until it's closed to try again."
            }
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockType::SendTx => write!(f, "SEND_TX"),
            LockType::Hsm => write!(f, "HSM"),
        }
    }
}

/// Auto-release timeouts per lock type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeouts {
    pub send_tx: Duration,
    pub hsm: Duration,
}

impl LockTimeouts {
    pub fn for_type(&self, lock_type: LockType) -> Duration {
        match lock_type {
            LockType::SendTx => self.send_tx,
            LockType::Hsm => self.hsm,
        }
    }
}

impl Default for LockTimeouts {
    fn default() -> Self {
        Self {
            send_tx: DEFAULT_UNLOCK_TIMEOUT,
            hsm: DEFAULT_UNLOCK_TIMEOUT,
        }
    }
}

type MutexSet = HashMap<LockType, Arc<TimedMutex>>;

/// Registry of global and per-wallet mutexes
pub struct LockRegistry {
    global: MutexSet,
    per_wallet: Mutex<HashMap<String, MutexSet>>,
    timeouts: LockTimeouts,
    runtime: Handle,
}

impl LockRegistry {
    /// Create a registry whose timers run on `runtime`
    pub fn new(runtime: Handle, timeouts: LockTimeouts) -> Self {
        let global = LockType::ALL
            .iter()
            .map(|lock_type| {
                let name = format!("{}:global", lock_type);
                (*lock_type, Arc::new(TimedMutex::new(name, runtime.clone())))
            })
            .collect();

        Self {
            global,
            per_wallet: Mutex::new(HashMap::new()),
            timeouts,
            runtime,
        }
    }

    /// Create a registry on the current Tokio runtime with default timeouts
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_current_runtime() -> Self {
        Self::new(Handle::current(), LockTimeouts::default())
    }

    pub fn timeouts(&self) -> LockTimeouts {
        self.timeouts
    }

    fn wallets(&self) -> MutexGuard<'_, HashMap<String, MutexSet>> {
        self.per_wallet
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve the mutex governing `lock_type` for `wallet_id`
    ///
    /// Global lock types ignore `wallet_id`. Per-wallet lock types create the
    /// wallet's mutex on first use; without a wallet id they resolve to the
    /// global instance (single-wallet mode).
    pub fn resolve(&self, lock_type: LockType, wallet_id: Option<&str>) -> Arc<TimedMutex> {
        self.with_mutex(lock_type, wallet_id, Arc::clone)
    }

    /// Run `f` on the resolved mutex
    ///
    /// Per-wallet mutexes are used under the wallet map guard, so a wallet
    /// cannot be forgotten between resolving its mutex and acquiring it.
    fn with_mutex<R>(
        &self,
        lock_type: LockType,
        wallet_id: Option<&str>,
        f: impl FnOnce(&Arc<TimedMutex>) -> R,
    ) -> R {
        let wallet_id = match (lock_type.scope(), wallet_id) {
            (LockScope::PerWallet, Some(wallet_id)) => wallet_id,
            _ => return f(&self.global[&lock_type]),
        };

        let mut wallets = self.wallets();
        let set = wallets.entry(wallet_id.to_string()).or_default();
        let mutex = set.entry(lock_type).or_insert_with(|| {
            debug!("Creating {} mutex for wallet {}", lock_type, wallet_id);
            let name = format!("{}:{}", lock_type, wallet_id);
            Arc::new(TimedMutex::new(name, self.runtime.clone()))
        });
        f(mutex)
    }

    /// Try to take a lock; `false` means the operation is refused now
    pub fn lock(&self, lock_type: LockType, wallet_id: Option<&str>) -> bool {
        let timeout = self.timeouts.for_type(lock_type);
        let acquired = self.with_mutex(lock_type, wallet_id, |mutex| mutex.try_acquire(timeout));
        log_refusal(acquired, lock_type, wallet_id);
        acquired
    }

    /// Release a lock. Releasing a free lock is a no-op.
    pub fn unlock(&self, lock_type: LockType, wallet_id: Option<&str>) {
        self.with_mutex(lock_type, wallet_id, |mutex| mutex.release());
    }

    pub fn is_locked(&self, lock_type: LockType, wallet_id: Option<&str>) -> bool {
        match (lock_type.scope(), wallet_id) {
            (LockScope::PerWallet, Some(wallet_id)) => self
                .wallets()
                .get(wallet_id)
                .and_then(|set| set.get(&lock_type))
                .map(|mutex| mutex.is_held())
                .unwrap_or(false),
            _ => self.global[&lock_type].is_held(),
        }
    }

    /// Take a lock and return a guard that releases it exactly once
    ///
    /// Returns `None` when the lock is held by another flow.
    pub fn acquire(&self, lock_type: LockType, wallet_id: Option<&str>) -> Option<LockGuard> {
        let timeout = self.timeouts.for_type(lock_type);
        let acquired = self.with_mutex(lock_type, wallet_id, |mutex| {
            mutex
                .acquire_epoch(timeout)
                .map(|epoch| (Arc::clone(mutex), epoch))
        });
        log_refusal(acquired.is_some(), lock_type, wallet_id);

        acquired.map(|(mutex, epoch)| LockGuard {
            mutex,
            epoch,
            lock_type,
            released: false,
        })
    }

    /// Drop the per-wallet mutex set of a stopped wallet
    ///
    /// Must not be called while one of the wallet's locks is held. Returns
    /// whether the wallet had any mutex registered.
    pub fn forget(&self, wallet_id: &str) -> bool {
        let removed = self.wallets().remove(wallet_id).is_some();
        if removed {
            debug!("Dropped mutex set for wallet {}", wallet_id);
        }
        removed
    }

    /// Like [`forget`](Self::forget), but refused with the held lock type
    /// while any of the wallet's locks is held
    ///
    /// The check and the removal happen under one map guard.
    pub fn forget_if_free(&self, wallet_id: &str) -> Result<bool, LockType> {
        let mut wallets = self.wallets();
        if let Some(set) = wallets.get(wallet_id) {
            if let Some(held) = LockType::ALL
                .iter()
                .find(|lock_type| set.get(*lock_type).map_or(false, |m| m.is_held()))
            {
                return Err(*held);
            }
        }

        let removed = wallets.remove(wallet_id).is_some();
        if removed {
            debug!("Dropped mutex set for wallet {} (all locks free)", wallet_id);
        }
        Ok(removed)
    }

    /// Number of wallets with a registered mutex set
    pub fn wallet_count(&self) -> usize {
        self.wallets().len()
    }
}

fn log_refusal(acquired: bool, lock_type: LockType, wallet_id: Option<&str>) {
    if !acquired {
        log_lock(
            LogLevel::Info,
            "lock refused",
            Some(json!({
                "lock_type": lock_type.to_string(),
                "wallet_id": wallet_id,
            })),
        );
    }
}

/// Holds an acquired lock and releases it on drop
///
/// The guard only releases the acquisition it was created for: if the timer
/// already force-released the mutex and another flow took it, dropping this
/// guard leaves the newer holder alone.
#[must_use = "dropping the guard releases the lock"]
pub struct LockGuard {
    mutex: Arc<TimedMutex>,
    epoch: u64,
    lock_type: LockType,
    released: bool,
}

impl LockGuard {
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// Release now instead of at end of scope
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.mutex.release_epoch(self.epoch);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("mutex", &self.mutex.name())
            .field("epoch", &self.epoch)
            .field("released", &self.released)
            .finish()
    }
}
