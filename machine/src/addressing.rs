//! Physical and virtual addressing schemes.
//!
//! The simulated machine has a 32-bit address space. User programs issue
//! virtual addresses ([`Va`]) that the kernel translates, page by page, into
//! physical addresses ([`Pa`]) inside the machine's physical memory.
//!
//! Both address types split into a page (frame) number and an offset within
//! the page, and support the usual address arithmetic.
//!
//! ```
//! use machine::addressing::{PAGE_SIZE, Va};
//!
//! let va = Va::new(2 * PAGE_SIZE + 0x10).unwrap();
//! assert_eq!(va.page_number(), 2);
//! assert_eq!(va.offset(), 0x10);
//! ```

/// The size of a page, in bytes.
///
/// Both virtual pages and physical frames have this size.
pub const PAGE_SIZE: usize = 0x1000;

/// The number of bits to shift an address to obtain its page number.
pub const PAGE_SHIFT: usize = 12;

/// The mask that extracts the offset within a page.
pub const PAGE_MASK: usize = 0xfff;

/// The highest address representable by the machine.
const ADDRESS_LIMIT: usize = u32::MAX as usize;

/// Represents a physical address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pa(usize);

impl Pa {
    /// Creates a new physical address if the address is representable by the
    /// machine.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr <= ADDRESS_LIMIT {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Builds the physical address of byte `offset` within `frame`.
    #[inline]
    pub const fn from_frame(frame: usize, offset: usize) -> Self {
        Self((frame << PAGE_SHIFT) | (offset & PAGE_MASK))
    }

    /// Cast the physical address into raw usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// The frame number that contains this address.
    #[inline]
    pub const fn frame_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// The offset of this address within its frame.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// Represents a virtual address of a user program.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Va(usize);

impl Va {
    /// Creates a new virtual address if the address is representable by the
    /// machine.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr <= ADDRESS_LIMIT {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Interprets a register value as a virtual address.
    ///
    /// Returns `None` for negative values.
    #[inline]
    pub fn from_register(value: i32) -> Option<Self> {
        usize::try_from(value).ok().and_then(Self::new)
    }

    /// Cast the virtual address into raw usize.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// The virtual page number of this address.
    #[inline]
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// The offset of this address within its page.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}

impl core::fmt::Display for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl core::fmt::Debug for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}

impl core::fmt::Display for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}
