//! Kernel threads.
//!
//! Every user process runs on exactly one kernel thread. A thread is created
//! with a [`ThreadBuilder`], can terminate itself at any depth of its call
//! stack with [`Current::exit`], and can be waited for with
//! [`JoinHandle::join`], which yields the exit code.
//!
//! ```
//! use machine::thread::{Current, ThreadBuilder};
//!
//! let handle = ThreadBuilder::new("worker")
//!     .spawn(|| Current::exit(42))
//!     .unwrap();
//! assert_eq!(handle.join(), 42);
//! ```

use crate::KernelError;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};

/// The payload that carries an exit code while the exiting thread unwinds
/// back to its entry point.
struct ThreadExit(i32);

/// A handle to join thread.
pub struct JoinHandle {
    /// Name of the thread.
    pub name: String,
    inner: std::thread::JoinHandle<i32>,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    ///
    /// Blocks until the thread finishes. A thread that returns from its
    /// function exits with code 0.
    ///
    /// # Panics
    ///
    /// If the thread panicked, the panic is propagated to the joiner.
    pub fn join(self) -> i32 {
        match self.inner.join() {
            Ok(code) => code,
            Err(payload) => resume_unwind(payload),
        }
    }
}

/// The opaque structure indicating the running thread.
pub struct Current {
    _p: (),
}

impl Current {
    /// Exit the current thread with `exit_code`.
    ///
    /// The stack of the current thread is unwound up to the thread's entry
    /// point, so every value owned by the thread is dropped. The exit code is
    /// then handed to the [`JoinHandle`].
    pub fn exit(exit_code: i32) -> ! {
        resume_unwind(Box::new(ThreadExit(exit_code)))
    }

    /// Get the current thread's name.
    pub fn name() -> Option<String> {
        std::thread::current().name().map(String::from)
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            name: String::from(name),
        }
    }

    /// Spawn the thread.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if the host refuses to create the thread.
    pub fn spawn<F: FnOnce() + Send + 'static>(
        self,
        thread_fn: F,
    ) -> Result<JoinHandle, KernelError> {
        let inner = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || match catch_unwind(AssertUnwindSafe(thread_fn)) {
                Ok(()) => 0,
                Err(payload) => match payload.downcast::<ThreadExit>() {
                    Ok(exit) => exit.0,
                    Err(payload) => resume_unwind(payload),
                },
            })
            .map_err(|e| {
                log::warn!("thread {}: spawn failed: {}", self.name, e);
                KernelError::NoMemory
            })?;
        Ok(JoinHandle {
            name: self.name,
            inner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code() {
        let handle = ThreadBuilder::new("exit").spawn(|| Current::exit(-7)).unwrap();
        assert_eq!(handle.join(), -7);
    }

    #[test]
    fn returns_zero() {
        let handle = ThreadBuilder::new("ret").spawn(|| {}).unwrap();
        assert_eq!(handle.join(), 0);
    }

    #[test]
    fn exit_from_nested_frames() {
        fn deep(n: usize) -> usize {
            if n == 0 {
                Current::exit(5)
            }
            deep(n - 1) + 1
        }
        let handle = ThreadBuilder::new("deep")
            .spawn(|| {
                deep(16);
            })
            .unwrap();
        assert_eq!(handle.join(), 5);
    }

    #[test]
    fn name_is_kept() {
        let handle = ThreadBuilder::new("named")
            .spawn(|| assert_eq!(Current::name().as_deref(), Some("named")))
            .unwrap();
        assert_eq!(handle.name, "named");
        assert_eq!(handle.join(), 0);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn panic_propagates() {
        let handle = ThreadBuilder::new("panic").spawn(|| panic!("boom")).unwrap();
        handle.join();
    }
}
