//! Synchronization primitives.
//!
//! Muon runs one CPU with no preemption of kernel code, so these exist
//! to make interior mutability sound, not to arbitrate real contention.

mod lazy;
mod spinlock;

pub use lazy::LazyLock;
pub use spinlock::{SpinLock, SpinLockGuard};
