//! Power management of the machine.

use crate::sync::SpinLock;
use crossbeam_utils::sync::{Parker, Unparker};
use std::sync::atomic::{AtomicBool, Ordering};

/// The power switch of the machine.
///
/// The machine starts powered on. Once switched off, it stays off.
pub struct PowerSwitch {
    off: AtomicBool,
    waiters: SpinLock<Vec<Unparker>>,
}

impl Default for PowerSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerSwitch {
    /// Creates a switch in the powered-on position.
    pub fn new() -> Self {
        Self {
            off: AtomicBool::new(false),
            waiters: SpinLock::new(Vec::new()),
        }
    }

    /// Returns true once the machine is powered off.
    pub fn is_off(&self) -> bool {
        self.off.load(Ordering::SeqCst)
    }

    /// Switches the machine off and wakes every thread blocked in
    /// [`PowerSwitch::wait`].
    pub fn off(&self) {
        if !self.off.swap(true, Ordering::SeqCst) {
            log::info!("Machine halting!");
        }
        let mut waiters = self.waiters.lock();
        let unparkers = core::mem::take(&mut *waiters);
        waiters.unlock();
        for unparker in unparkers {
            unparker.unpark();
        }
    }

    /// Blocks the calling thread until the machine is powered off.
    pub fn wait(&self) {
        let parker = Parker::new();
        let mut waiters = self.waiters.lock();
        waiters.push(parker.unparker().clone());
        waiters.unlock();
        while !self.is_off() {
            parker.park();
        }
    }
}
