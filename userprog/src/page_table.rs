//! # Single-level page table
//!
//! A user address space is a contiguous range of virtual pages starting at
//! virtual page 0. The page table of a process is therefore a plain array of
//! [`TranslationEntry`], indexed by virtual page number:
//!
//! ```text
//!  virtual address (32 bits)
//! +--------------------------------+--------------+
//! |   virtual page number (20)     |  offset (12) |
//! +--------------------------------+--------------+
//!                 |
//!                 v
//!   entries[vpn] = { frame, VALID | READ_ONLY | USED | DIRTY }
//! ```
//!
//! The length of the table is the number of pages the process owns: its code
//! and data sections, its stack, and one page for the program arguments.
//! Addresses past the end of the table do not belong to the process.
//!
//! Each valid entry references a frame taken from the
//! [`FrameAllocator`]; no two valid entries, in this table or any other,
//! reference the same frame. [`PageTable::clear`] hands the frames back to
//! the caller so they can be returned to the pool.
//!
//! [`FrameAllocator`]: crate::frame_alloc::FrameAllocator

use machine::{
    addressing::{Pa, Va},
    memory::FrameNumber,
};

bitflags::bitflags! {
    /// Flags of a [`TranslationEntry`].
    pub struct PteFlags: u32 {
        /// The entry maps a frame.
        const VALID = 1 << 0;
        /// Writes to the page are not allowed.
        const READ_ONLY = 1 << 1;
        /// The page has been accessed since the flag was last cleared.
        const USED = 1 << 2;
        /// The page has been written since the flag was last cleared.
        const DIRTY = 1 << 3;
    }
}

/// A mapping from one virtual page to one physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// The virtual page number this entry translates.
    pub vpn: usize,
    /// The frame backing the page. Meaningless unless [`PteFlags::VALID`] is
    /// set.
    pub frame: FrameNumber,
    /// Flags of the entry.
    pub flags: PteFlags,
}

impl TranslationEntry {
    /// Returns true if the entry maps a frame.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(PteFlags::VALID)
    }

    /// Returns true if the page must not be written.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(PteFlags::READ_ONLY)
    }
}

/// Errors of page table lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageTableMappingError {
    /// The virtual page number is past the end of the table.
    OutOfRange,
    /// The entry does not map a frame.
    NotValid,
    /// A write was attempted on a read-only page.
    ReadOnly,
}

/// The page table of a process.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: Vec<TranslationEntry>,
}

impl PageTable {
    /// Creates an empty page table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of pages covered by the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table covers no page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entries of the table, in virtual page order.
    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Maps the next virtual page to `frame`.
    ///
    /// Pages are only ever appended, which keeps virtual page numbers
    /// contiguous from 0. Returns the virtual page number of the new entry.
    pub fn push(&mut self, frame: FrameNumber, read_only: bool) -> usize {
        let vpn = self.entries.len();
        let mut flags = PteFlags::VALID;
        flags.set(PteFlags::READ_ONLY, read_only);
        self.entries.push(TranslationEntry { vpn, frame, flags });
        vpn
    }

    /// Finds the valid entry of the page that contains `va`.
    pub fn walk(&self, va: Va) -> Result<&TranslationEntry, PageTableMappingError> {
        match self.entries.get(va.page_number()) {
            None => Err(PageTableMappingError::OutOfRange),
            Some(pte) if !pte.is_valid() => Err(PageTableMappingError::NotValid),
            Some(pte) => Ok(pte),
        }
    }

    /// Finds the valid entry of the page that contains `va`, for update.
    pub fn walk_mut(&mut self, va: Va) -> Result<&mut TranslationEntry, PageTableMappingError> {
        match self.entries.get_mut(va.page_number()) {
            None => Err(PageTableMappingError::OutOfRange),
            Some(pte) if !pte.is_valid() => Err(PageTableMappingError::NotValid),
            Some(pte) => Ok(pte),
        }
    }

    /// Translates `va` for an access, recording the access in the entry.
    ///
    /// Every successful translation sets [`PteFlags::USED`]; a write also
    /// sets [`PteFlags::DIRTY`].
    pub fn translate(&mut self, va: Va, is_write: bool) -> Result<Pa, PageTableMappingError> {
        let pte = self.walk_mut(va)?;
        if is_write && pte.is_read_only() {
            return Err(PageTableMappingError::ReadOnly);
        }
        pte.flags |= PteFlags::USED;
        if is_write {
            pte.flags |= PteFlags::DIRTY;
        }
        Ok(Pa::from_frame(pte.frame.0, va.offset()))
    }

    /// Empties the table, returning the frames of its valid entries.
    pub fn clear(&mut self) -> Vec<FrameNumber> {
        self.entries
            .drain(..)
            .filter(TranslationEntry::is_valid)
            .map(|pte| pte.frame)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine::addressing::PAGE_SIZE;

    fn va(addr: usize) -> Va {
        Va::new(addr).unwrap()
    }

    #[test]
    fn translate() {
        let mut pt = PageTable::new();
        assert_eq!(pt.push(FrameNumber(5), true), 0);
        assert_eq!(pt.push(FrameNumber(2), false), 1);

        assert_eq!(
            pt.translate(va(PAGE_SIZE + 0x10), false),
            Ok(Pa::from_frame(2, 0x10))
        );
        assert_eq!(
            pt.translate(va(2 * PAGE_SIZE), false),
            Err(PageTableMappingError::OutOfRange)
        );
        assert_eq!(
            pt.translate(va(0x20), true),
            Err(PageTableMappingError::ReadOnly),
            "Text pages must not be writable."
        );
        assert!(
            !pt.entries()[0].flags.contains(PteFlags::USED),
            "A refused access is not recorded."
        );
    }

    #[test]
    fn used_and_dirty() {
        let mut pt = PageTable::new();
        pt.push(FrameNumber(0), false);
        pt.translate(va(4), false).unwrap();
        assert_eq!(pt.entries()[0].flags, PteFlags::VALID | PteFlags::USED);
        pt.translate(va(8), true).unwrap();
        assert!(pt.entries()[0].flags.contains(PteFlags::DIRTY));
    }

    #[test]
    fn invalid_entry() {
        let mut pt = PageTable::new();
        pt.push(FrameNumber(3), false);
        pt.walk_mut(va(0)).unwrap().flags.remove(PteFlags::VALID);
        assert_eq!(pt.walk(va(0)).err(), Some(PageTableMappingError::NotValid));
        assert!(pt.clear().is_empty(), "Invalid entries own no frame.");
        assert!(pt.is_empty());
    }
}
