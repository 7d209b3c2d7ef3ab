//! # Pager with Eager Paging Policy
//!
//! The [`EagerPager`] backs every page with a physical frame at the moment
//! the page is mapped. A process built on it never takes a page fault: all of
//! its frames are reserved when it is loaded, and they stay with it until it
//! exits.
//!
//! Freshly mapped frames are zero-filled, so a process never observes the
//! memory of the process that used the frame before it.
use crate::{
    frame_alloc::FrameAllocator,
    page_table::PageTable,
    pager::{Pager, Region},
};
use machine::{
    KernelError, Machine,
    addressing::{Pa, Va},
    processor::Exception,
};
use std::sync::Arc;

/// [`EagerPager`] is a struct that implements the [`Pager`] trait.
/// It represents a pager strategy that is responsible for eager memory paging.
pub struct EagerPager {
    machine: Arc<Machine>,
    frames: Arc<FrameAllocator>,
}

impl EagerPager {
    /// Creates a pager that takes frames from `frames` and clears them in the
    /// memory of `machine`.
    pub fn new(machine: Arc<Machine>, frames: Arc<FrameAllocator>) -> Self {
        Self { machine, frames }
    }
}

impl Pager for EagerPager {
    fn map(
        &mut self,
        page_table: &mut PageTable,
        regions: &[Region],
    ) -> Result<usize, KernelError> {
        let total = regions.iter().map(|r| r.pages).sum();
        let mut frames = self.frames.acquire_many(total)?.into_iter();
        for region in regions {
            for frame in frames.by_ref().take(region.pages) {
                self.machine.memory().with_frame_mut(frame, |page| page.fill(0));
                page_table.push(frame, region.read_only);
            }
        }
        Ok(total)
    }

    fn translate(
        &mut self,
        page_table: &mut PageTable,
        va: Va,
        is_write: bool,
    ) -> Result<Pa, Exception> {
        Ok(page_table.translate(va, is_write)?)
    }

    fn access_ok(&self, page_table: &PageTable, va: Va, is_write: bool) -> bool {
        page_table
            .walk(va)
            .is_ok_and(|pte| !(is_write && pte.is_read_only()))
    }

    fn release(&mut self, page_table: &mut PageTable) -> usize {
        let frames = page_table.clear();
        for frame in frames.iter() {
            self.frames.release(*frame);
        }
        frames.len()
    }
}
