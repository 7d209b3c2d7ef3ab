//! Physical memory of the machine.
//!
//! Physical memory is an array of page-sized frames. Frames are identified by
//! their [`FrameNumber`]; which frame belongs to which process is decided by
//! the kernel's frame allocator, not by this module.

use crate::{
    addressing::{PAGE_SIZE, Pa},
    sync::SpinLock,
};

/// The index of a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub usize);

/// The physical memory of the machine.
pub struct PhysicalMemory {
    frames: Box<[SpinLock<Box<[u8]>>]>,
}

impl PhysicalMemory {
    /// Creates a zero-filled physical memory of `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: (0..num_frames)
                .map(|_| SpinLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
                .collect(),
        }
    }

    /// The number of frames of this memory.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Run a function `f` over the contents of `frame`.
    ///
    /// # Panics
    /// Panics if the frame does not exist.
    pub fn with_frame<R>(&self, frame: FrameNumber, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.frames[frame.0].lock();
        let r = f(&guard);
        guard.unlock();
        r
    }

    /// Run a function `f` over the mutable contents of `frame`.
    ///
    /// # Panics
    /// Panics if the frame does not exist.
    pub fn with_frame_mut<R>(&self, frame: FrameNumber, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.frames[frame.0].lock();
        let r = f(&mut guard);
        guard.unlock();
        r
    }

    /// Copies bytes starting at `pa` into `buf`.
    ///
    /// The copy never crosses the end of the frame that contains `pa`; the
    /// number of bytes copied is returned.
    pub fn read(&self, pa: Pa, buf: &mut [u8]) -> usize {
        let offset = pa.offset();
        let size = buf.len().min(PAGE_SIZE - offset);
        self.with_frame(FrameNumber(pa.frame_number()), |frame| {
            buf[..size].copy_from_slice(&frame[offset..offset + size])
        });
        size
    }

    /// Copies `data` into memory starting at `pa`.
    ///
    /// The copy never crosses the end of the frame that contains `pa`; the
    /// number of bytes copied is returned.
    pub fn write(&self, pa: Pa, data: &[u8]) -> usize {
        let offset = pa.offset();
        let size = data.len().min(PAGE_SIZE - offset);
        self.with_frame_mut(FrameNumber(pa.frame_number()), |frame| {
            frame[offset..offset + size].copy_from_slice(&data[..size])
        });
        size
    }
}
