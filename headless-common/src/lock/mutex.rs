//! Non-blocking mutex with a failsafe auto-release timer
//!
//! A [`TimedMutex`] is either `FREE` or `HELD`. Acquisition never waits:
//! `try_acquire` on a held mutex returns `false` immediately and the caller is
//! expected to report "busy" rather than retry.
//!
//! ```text
//!   FREE --try_acquire (true)--> HELD
//!   HELD --try_acquire (false)-> HELD
//!   HELD --release-----------> FREE
//!   HELD --timer fires-------> FREE
//! ```
//!
//! Every successful acquisition arms a timer task on the injected Tokio
//! runtime. `release` aborts it. If the holder never releases (panic, early
//! return outside a guard), the timer force-releases the mutex after the
//! timeout. Each acquisition gets a new epoch so that a stale timer, or a
//! stale guard, can never free a later holder.

use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Default time after which a held mutex is force-released
pub const DEFAULT_UNLOCK_TIMEOUT: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Default)]
struct MutexState {
    held: bool,
    epoch: u64,
    expiry: Option<JoinHandle<()>>,
}

impl MutexState {
    fn clear(&mut self) {
        self.held = false;
        if let Some(timer) = self.expiry.take() {
            timer.abort();
        }
    }
}

/// Lock the shared state, recovering from poisoning
///
/// The state is a flag, an epoch and a timer handle; none of them can be left
/// half-updated by a panicking holder.
fn lock_state(state: &Mutex<MutexState>) -> MutexGuard<'_, MutexState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A single named lock with boolean status and an auto-expiring timer
#[derive(Debug)]
pub struct TimedMutex {
    name: String,
    state: Arc<Mutex<MutexState>>,
    runtime: Handle,
}

impl TimedMutex {
    /// Create a free mutex whose timers run on `runtime`
    pub fn new(name: impl Into<String>, runtime: Handle) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MutexState::default())),
            runtime,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Try to take the mutex without waiting
    ///
    /// Returns `true` and arms the auto-release timer if the mutex was free,
    /// `false` if it is already held.
    pub fn try_acquire(&self, timeout: Duration) -> bool {
        self.acquire_epoch(timeout).is_some()
    }

    /// Like [`try_acquire`](Self::try_acquire), returning the acquisition epoch
    pub(crate) fn acquire_epoch(&self, timeout: Duration) -> Option<u64> {
        let mut state = lock_state(&self.state);
        if state.held {
            debug!("Mutex {} refused: already held", self.name);
            return None;
        }

        state.held = true;
        state.epoch = state.epoch.wrapping_add(1);
        if let Some(old_timer) = state.expiry.take() {
            old_timer.abort();
        }

        let epoch = state.epoch;
        let shared = Arc::clone(&self.state);
        let name = self.name.clone();
        state.expiry = Some(self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut state = lock_state(&shared);
            if state.held && state.epoch == epoch {
                state.held = false;
                state.expiry = None;
                warn!(
                    "Mutex {} was not released within {:?}, releasing it",
                    name, timeout
                );
            }
        }));

        debug!("Mutex {} acquired (epoch {})", self.name, epoch);
        Some(epoch)
    }

    /// Release the mutex and cancel its timer
    ///
    /// Releasing a free mutex is a no-op.
    pub fn release(&self) {
        let mut state = lock_state(&self.state);
        if state.held {
            debug!("Mutex {} released", self.name);
        }
        state.clear();
    }

    /// Release only if the mutex is still held by the acquisition `epoch`
    ///
    /// Returns whether the mutex was released.
    pub(crate) fn release_epoch(&self, epoch: u64) -> bool {
        let mut state = lock_state(&self.state);
        if !state.held || state.epoch != epoch {
            debug!(
                "Mutex {} not released: epoch {} is no longer the holder",
                self.name, epoch
            );
            return false;
        }

        state.clear();
        debug!("Mutex {} released (epoch {})", self.name, epoch);
        true
    }

    pub fn is_held(&self) -> bool {
        lock_state(&self.state).held
    }
}

impl Drop for TimedMutex {
    fn drop(&mut self) {
        if let Some(timer) = lock_state(&self.state).expiry.take() {
            timer.abort();
        }
    }
}
