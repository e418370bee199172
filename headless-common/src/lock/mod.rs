//! Non-blocking locks guarding transaction sends and HSM sessions
//!
//! - [`TimedMutex`]: one lock with a failsafe auto-release timer
//! - [`LockRegistry`]: maps a lock type and wallet to its mutex
//! - [`LockGuard`]: releases an acquired lock exactly once

pub mod mutex;
pub mod registry;

pub use mutex::{TimedMutex, DEFAULT_UNLOCK_TIMEOUT};
pub use registry::{LockGuard, LockRegistry, LockScope, LockTimeouts, LockType};
