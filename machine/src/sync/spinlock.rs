//! Spin lock.
//!
//! A spin lock protects short critical sections, such as the check-and-mutate
//! sequence of the physical frame pool. A waiting thread polls the lock word
//! with an atomic read-modify-write instruction instead of going to sleep, so
//! acquiring the lock never blocks the thread in the scheduler.
//!
//! Like every lock of this machine, the guard must be released **explicitly**
//! with [`SpinLockGuard::unlock`]. Dropping a guard without unlocking is a
//! kernel bug and panics, which makes forgotten unlocks on early-return paths
//! visible immediately.

use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug)]
pub struct WouldBlock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// The data can only be accessed through the guards returned from [`lock`]
/// and [`try_lock`], which guarantees that the data is only ever accessed
/// when the spin lock is locked.
///
/// # Examples
///
/// ```
/// use machine::sync::SpinLock;
/// use std::sync::Arc;
///
/// let data = Arc::new(SpinLock::new(0));
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let data = data.clone();
///         std::thread::spawn(move || {
///             let mut guard = data.lock();
///             *guard += 1;
///             // the lock must be "explicitly" unlocked.
///             guard.unlock();
///         })
///     })
///     .collect();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// let guard = data.lock();
/// assert_eq!(*guard, 4);
/// guard.unlock();
/// ```
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spin lock in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(t),
        }
    }

    /// Consumes this spin lock, returning the underlying data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the spin lock, spinning until it is able to do so.
    ///
    /// Upon returning, the thread is the only thread with the lock held. When
    /// the returned guard goes out of scope without
    /// [`SpinLockGuard::unlock`], panic occurs.
    ///
    /// Locking a spin lock twice from the same thread deadlocks.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let caller = core::panic::Location::caller();
        loop {
            if let Ok(guard) = self.try_lock_at(caller) {
                break guard;
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
                std::thread::yield_now();
            }
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// If the lock could not be acquired at this time, then [`WouldBlock`]
    /// is returned. This function does not spin.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        self.try_lock_at(core::panic::Location::caller())
    }

    fn try_lock_at(
        &self,
        caller: &'static core::panic::Location<'static>,
    ) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Ok(SpinLockGuard {
                caller,
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            Err(WouldBlock)
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a spin lock.
///
/// The lock must be explicitly unlocked by [`unlock`] method. When this
/// structure is dropped without unlock, panic occurs.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static core::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the underlying [`SpinLock`].
    pub fn unlock(self) {
        self.lock.locked.store(false, Ordering::Release);
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // A thread that is unwinding (a panic, or a thread exit) releases
        // the lock so that the rest of the machine keeps running.
        self.lock.locked.store(false, Ordering::Release);
        if !std::thread::panicking() {
            panic!(
                "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
                self.caller
            );
        }
    }
}
