//! Synchronization primitives abstraction for loom testing compatibility.
//!
//! The registry, the dispatcher queue and each connection's send path all lock
//! through this module. Production builds get `parking_lot` (no poisoning, so a
//! panicking connection thread never wedges a lock for everyone else); loom
//! builds get `loom::sync` so the `loom-tests/` crate can model-check the queue
//! and the registry.
//!
//! ```ignore
//! use crate::sync::{Arc, Mutex};
//! ```
//!
//! Run the loom suite from the isolated crate:
//! ```bash
//! cd loom-tests
//! RUSTFLAGS="--cfg loom" cargo test --release
//! ```

/// When running under loom (`RUSTFLAGS="--cfg loom"`), use loom's types
#[cfg(loom)]
pub(crate) mod inner {
    pub use loom::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
    pub use loom::sync::Arc;

    /// Loom's mutex returns a `LockResult`; wrap it so call sites read the same
    /// as with `parking_lot`.
    #[derive(Debug, Default)]
    pub struct Mutex<T>(loom::sync::Mutex<T>);

    impl<T> Mutex<T> {
        pub fn new(value: T) -> Self {
            Self(loom::sync::Mutex::new(value))
        }

        #[allow(clippy::unwrap_used)] // loom never poisons outside a failing model
        pub fn lock(&self) -> loom::sync::MutexGuard<'_, T> {
            self.0.lock().unwrap()
        }
    }
}

/// In production, use parking_lot for performance
#[cfg(not(loom))]
pub(crate) mod inner {
    pub use parking_lot::Mutex;
    pub use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
    pub use std::sync::Arc;
}

pub(crate) use inner::*;
