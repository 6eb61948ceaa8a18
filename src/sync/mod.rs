//! Synchronization building blocks shared by the exchange objects.

mod spinlock;
pub(crate) mod waitqueue;

pub use spinlock::{SpinLock, SpinLockGuard};
