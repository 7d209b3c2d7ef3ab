//! Pager, a trait for paging policy.
use crate::page_table::{PageTable, PageTableMappingError};
use machine::{
    KernelError,
    addressing::{Pa, Va},
    processor::Exception,
};

/// A run of pages with the same protection, mapped at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Number of pages of the region.
    pub pages: usize,
    /// Whether writes to the region are refused.
    pub read_only: bool,
}

/// The [`Pager`] trait defines how the pages of an address space are backed
/// by physical frames. It is the strategy a [`MmStruct`] composes with: the
/// address space asks its pager to map regions, to translate addresses
/// issued by the processor, and to give the frames back when the process
/// exits.
///
/// The kernel ships [`EagerPager`], which backs every page with a frame at
/// the time the page is mapped.
///
/// [`MmStruct`]: crate::mm_struct::MmStruct
/// [`EagerPager`]: crate::eager_pager::EagerPager
pub trait Pager {
    /// Maps `regions`, one after the other, at the end of `page_table`.
    ///
    /// The mapping is all or nothing: if it fails, `page_table` is left
    /// untouched and no frame is consumed.
    ///
    /// # Returns
    /// - `Ok(n)`: Number of pages mapped.
    /// - `Err(KernelError::NoMemory)`: Not enough physical frames.
    fn map(
        &mut self,
        page_table: &mut PageTable,
        regions: &[Region],
    ) -> Result<usize, KernelError>;

    /// Resolves an access of the processor to `va`.
    ///
    /// # Returns
    /// - `Ok(pa)`: The physical address to access.
    /// - `Err(Exception)`: The exception the access raises.
    fn translate(
        &mut self,
        page_table: &mut PageTable,
        va: Va,
        is_write: bool,
    ) -> Result<Pa, Exception>;

    /// Checks whether the kernel may access `va` on behalf of the process.
    ///
    /// Unlike [`Pager::translate`], this never changes the page table.
    fn access_ok(&self, page_table: &PageTable, va: Va, is_write: bool) -> bool;

    /// Unmaps every page of `page_table`, returning its frames to the pool.
    ///
    /// Returns the number of frames released.
    fn release(&mut self, page_table: &mut PageTable) -> usize;
}

impl From<PageTableMappingError> for Exception {
    fn from(e: PageTableMappingError) -> Self {
        match e {
            PageTableMappingError::OutOfRange => Exception::AddressError,
            PageTableMappingError::NotValid => Exception::PageFault,
            PageTableMappingError::ReadOnly => Exception::ReadOnly,
        }
    }
}
