//! Blocking mutex.
//!
//! Unlike the [`SpinLock`], a [`Mutex`] puts the waiting thread to sleep
//! until the holder releases the lock. It suits critical sections that may be
//! held for a long time, such as a bulk file transfer through a shared
//! buffer.
//!
//! The mutex keeps the list of threads sleeping on it. On unlock, the first
//! sleeper is woken up and retries the acquisition.

use super::{SpinLock, SpinLockGuard, WouldBlock};
use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    thread::Thread,
};

/// A mutual exclusion primitive that blocks the waiting threads.
pub struct Mutex<T> {
    t: SpinLock<T>,
    waiters: SpinLock<VecDeque<Thread>>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> Mutex<T> {
        Mutex {
            t: SpinLock::new(t),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Acquires the mutex, sleeping until it is able to do so.
    #[track_caller]
    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            // Registering as a waiter under the waiters lock closes the window
            // between a failed attempt and the holder's wake-up.
            let mut waiters = self.waiters.lock();
            if let Ok(guard) = self.t.try_lock() {
                waiters.unlock();
                return MutexGuard {
                    guard: Some(guard),
                    lock: self,
                };
            }
            waiters.push_back(std::thread::current());
            waiters.unlock();
            std::thread::park();
        }
    }

    /// Attempts to acquire this mutex without sleeping.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        self.t.try_lock().map(|guard| MutexGuard {
            guard: Some(guard),
            lock: self,
        })
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.t.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a mutex.
///
/// Like [`SpinLockGuard`], the guard must be released explicitly with
/// [`MutexGuard::unlock`].
pub struct MutexGuard<'a, T: 'a> {
    guard: Option<SpinLockGuard<'a, T>>,
    lock: &'a Mutex<T>,
}

impl<T> MutexGuard<'_, T> {
    /// Releases the mutex and wakes up a sleeping thread, if any.
    pub fn unlock(mut self) {
        self.release();
        core::mem::forget(self);
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.unlock();
        }
        let mut waiters = self.lock.waiters.lock();
        let next = waiters.pop_front();
        waiters.unlock();
        if let Some(th) = next {
            th.unpark();
        }
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.guard.as_ref() {
            Some(guard) => &**guard,
            None => unreachable!(),
        }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.guard.as_mut() {
            Some(guard) => &mut **guard,
            None => unreachable!(),
        }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // An unwinding thread still hands the mutex over to its waiters.
        self.release();
        if !std::thread::panicking() {
            panic!("`.unlock()` must be explicitly called for MutexGuard.");
        }
    }
}
