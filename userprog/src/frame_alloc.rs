//! # Physical frame allocator
//!
//! Every user page is backed by one physical frame of the machine. Frames are
//! handed out by a single [`FrameAllocator`] shared by all processes of a
//! [`UserKernel`]. It is the only piece of memory-management state that
//! processes share with each other: page tables, and the frames they
//! reference, are private to their owner.
//!
//! The pool keeps free frames in FIFO order, so a frame that was just released
//! is the last one to be handed out again. Every mutation of the pool happens
//! inside one critical section guarded by a [`SpinLock`], which makes the
//! check-and-take sequence of [`FrameAllocator::acquire_many`] atomic with
//! respect to other processes.
//!
//! Releasing a frame that is already free, or that never belonged to the
//! pool, is a kernel bug and panics.
//!
//! [`UserKernel`]: crate::kernel::UserKernel

use machine::{KernelError, memory::FrameNumber, sync::SpinLock};
use std::collections::VecDeque;

struct FramePool {
    free: VecDeque<FrameNumber>,
    // true iff the frame is in `free`.
    is_free: Vec<bool>,
}

/// The pool of free physical frames.
pub struct FrameAllocator {
    pool: SpinLock<FramePool>,
}

impl FrameAllocator {
    /// Creates a pool that owns frames `0..num_frames`, all of them free.
    pub fn new(num_frames: usize) -> Self {
        Self {
            pool: SpinLock::new(FramePool {
                free: (0..num_frames).map(FrameNumber).collect(),
                is_free: vec![true; num_frames],
            }),
        }
    }

    /// The number of frames the pool owns, free or not.
    pub fn capacity(&self) -> usize {
        let pool = self.pool.lock();
        let capacity = pool.is_free.len();
        pool.unlock();
        capacity
    }

    /// The number of frames currently free.
    pub fn free_frames(&self) -> usize {
        let pool = self.pool.lock();
        let free = pool.free.len();
        pool.unlock();
        free
    }

    /// Takes one free frame.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if no frame is free.
    pub fn acquire(&self) -> Result<FrameNumber, KernelError> {
        let mut pool = self.pool.lock();
        let frame = pool.free.pop_front();
        if let Some(frame) = frame {
            pool.is_free[frame.0] = false;
        }
        pool.unlock();
        frame.ok_or(KernelError::NoMemory)
    }

    /// Takes `count` free frames at once.
    ///
    /// Either every requested frame is handed out, or none is: availability
    /// is checked and the frames are taken within the same critical section.
    ///
    /// # Errors
    /// - [`KernelError::NoMemory`] if fewer than `count` frames are free.
    pub fn acquire_many(&self, count: usize) -> Result<Vec<FrameNumber>, KernelError> {
        let mut pool = self.pool.lock();
        if pool.free.len() < count {
            let free = pool.free.len();
            pool.unlock();
            log::debug!("frame_alloc: {} frames requested, {} free", count, free);
            return Err(KernelError::NoMemory);
        }
        let frames: Vec<_> = pool.free.drain(..count).collect();
        for frame in frames.iter() {
            pool.is_free[frame.0] = false;
        }
        pool.unlock();
        Ok(frames)
    }

    /// Returns `frame` to the pool.
    ///
    /// # Panics
    /// Panics if `frame` is already free or does not belong to the pool.
    #[track_caller]
    pub fn release(&self, frame: FrameNumber) {
        let mut pool = self.pool.lock();
        match pool.is_free.get(frame.0).copied() {
            Some(false) => {
                pool.is_free[frame.0] = true;
                pool.free.push_back(frame);
                pool.unlock();
            }
            Some(true) => {
                pool.unlock();
                panic!("frame_alloc: double release of frame {}", frame.0);
            }
            None => {
                pool.unlock();
                panic!("frame_alloc: frame {} is not part of the pool", frame.0);
            }
        }
    }
}
