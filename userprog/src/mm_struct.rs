//! # Memory state of a process
//!
//! The state of a process's memory is represented by the [`MmStruct`]
//! structure, similar to the Linux kernel's `struct mm_struct`. It contains
//! two components:
//! - **Page Table**: Tracks mappings between virtual pages and physical
//!   frames.
//! - **Pager**: Defines the policy that backs pages with frames.
//!
//! ## Validating User Input
//!
//! **The kernel must never crash due to user input.** System calls receive
//! raw addresses from user programs in their argument registers, and these
//! must be checked before they are used. [`MmStruct::check_user_ptr`]
//! implements the policy every handler applies first: a pointer is rejected
//! if it is not positive, or if its virtual page lies past the end of the
//! address space.
//!
//! Passing that check does not mean every byte of a buffer is accessible. The
//! copy primitives, [`MmStruct::read_memory`] and [`MmStruct::write_memory`],
//! check every page on their own: they never touch a page the process does not
//! own, never write a read-only page, and report how many bytes they actually
//! moved. The typed accessors of [`uaccess`] first check the whole range
//! with [`MmStruct::access_ok`], so they either move every byte or fail with
//! [`KernelError::BadAddress`] without touching memory.
//!
//! [`uaccess`]: crate::uaccess

use crate::{
    page_table::PageTable,
    pager::{Pager, Region},
};
use machine::{
    KernelError, Machine,
    addressing::{PAGE_SIZE, Pa, Va},
    processor::Exception,
};
use std::{ops::Range, sync::Arc};

/// The [`MmStruct`] represents the memory state for a specific process.
///
/// The frames referenced by the page table belong to the process until
/// [`MmStruct::release`] gives them back; dropping an [`MmStruct`] releases
/// whatever it still holds.
pub struct MmStruct<P: Pager> {
    /// The page table that maintains mappings between virtual pages and
    /// physical frames.
    pub page_table: PageTable,

    /// The pager that backs pages with frames.
    pub pager: P,

    machine: Arc<Machine>,
}

impl<P: Pager> MmStruct<P> {
    /// Creates an empty address space whose pages are managed by `pager`.
    pub fn new(machine: Arc<Machine>, pager: P) -> Self {
        Self {
            page_table: PageTable::new(),
            pager,
            machine,
        }
    }

    /// The machine whose memory backs the address space.
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// The number of pages of the address space.
    #[inline]
    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    /// The size of the address space, in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.num_pages() * PAGE_SIZE
    }

    /// Wrapper function for the pager's `map` method.
    pub fn do_map(&mut self, regions: &[Region]) -> Result<usize, KernelError> {
        let Self {
            page_table, pager, ..
        } = self;
        pager.map(page_table, regions)
    }

    /// Validates a pointer received as a system call argument.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if `addr` is not positive, or if its
    ///   virtual page is not part of the address space.
    pub fn check_user_ptr(&self, addr: i32) -> Result<Va, KernelError> {
        Va::from_register(addr)
            .filter(|va| va.into_usize() > 0 && va.page_number() < self.num_pages())
            .ok_or(KernelError::BadAddress)
    }

    /// Checks whether a range of virtual addresses is accessible by the
    /// process.
    ///
    /// Every page overlapped by `addr` must be mapped, and must be writable
    /// if `is_write` is set. An empty range is always accessible.
    pub fn access_ok(&self, addr: Range<Va>, is_write: bool) -> bool {
        let (start, end) = (addr.start.into_usize(), addr.end.into_usize());
        if start >= end {
            return true;
        }
        (start / PAGE_SIZE..=(end - 1) / PAGE_SIZE).all(|vpn| {
            Va::new(vpn * PAGE_SIZE)
                .is_some_and(|va| self.pager.access_ok(&self.page_table, va, is_write))
        })
    }

    /// Translates an access of the processor to `va`.
    pub fn translate(&mut self, va: Va, is_write: bool) -> Result<Pa, Exception> {
        let Self {
            page_table, pager, ..
        } = self;
        pager.translate(page_table, va, is_write)
    }

    /// Clamps a transfer of `len` bytes at `va` to the address space.
    fn clamp(&self, va: usize, len: usize) -> usize {
        len.min(self.size().saturating_sub(va))
    }

    /// Copies bytes from virtual memory at `va` into `buf`.
    ///
    /// The transfer stops at the end of the address space or at the first
    /// page that cannot be read. Returns the number of bytes copied, which is
    /// 0 for any address outside the address space.
    pub fn read_memory(&mut self, va: usize, buf: &mut [u8]) -> usize {
        let len = self.clamp(va, buf.len());
        let mut done = 0;
        while done < len {
            let Some(pa) =
                Va::new(va + done).and_then(|va| self.page_table.translate(va, false).ok())
            else {
                break;
            };
            done += self.machine.memory().read(pa, &mut buf[done..len]);
        }
        done
    }

    /// Copies `data` into virtual memory at `va`.
    ///
    /// The transfer stops at the end of the address space or at the first
    /// page that cannot be written, read-only pages included. Returns the
    /// number of bytes copied, which is 0 for any address outside the address
    /// space.
    pub fn write_memory(&mut self, va: usize, data: &[u8]) -> usize {
        let len = self.clamp(va, data.len());
        let mut done = 0;
        while done < len {
            let Some(pa) =
                Va::new(va + done).and_then(|va| self.page_table.translate(va, true).ok())
            else {
                break;
            };
            done += self.machine.memory().write(pa, &data[done..len]);
        }
        done
    }

    /// Gives every frame of the address space back to the frame allocator.
    ///
    /// Returns the number of frames released. The address space is empty
    /// afterwards, so releasing twice is harmless.
    pub fn release(&mut self) -> usize {
        let Self {
            page_table, pager, ..
        } = self;
        pager.release(page_table)
    }
}

impl<P: Pager> Drop for MmStruct<P> {
    fn drop(&mut self) {
        self.release();
    }
}
