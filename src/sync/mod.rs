//! Synchronization primitives for short critical sections

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
