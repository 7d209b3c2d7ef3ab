//! Synchronization primitives of the machine.
//!
//! - [`SpinLock`]: busy-waiting lock for short critical sections that must
//!   never put the caller to sleep.
//! - [`Mutex`]: sleeping lock for long critical sections.
//!
//! Both locks hand out guards that must be released with an explicit
//! `unlock()` call.

mod mutex;
mod spinlock;

pub use mutex::{Mutex, MutexGuard};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
