//! # Program loader
//!
//! The loader turns a COFF image and an argument list into a ready-to-run
//! address space and the register state of its first instruction.
//!
//! ## Address space layout
//!
//! ```text
//!  0 ──────────► +----------------------+
//!                | section 0 (.text)    |  read-only
//!                | section 1 (.rdata)   |  read-only
//!                | section 2 (.data)    |
//!                | ...                  |
//!                +----------------------+
//!                | stack (grows down)   |  `stack_pages` pages
//!  initial sp ─► +----------------------+
//!                | arguments            |  1 page
//!                +----------------------+
//! ```
//!
//! Sections must be laid out back to back from virtual page 0. Images with a
//! hole or an overlap between sections are rejected; they are never patched
//! up.
//!
//! ## Loading steps
//!
//! 1. Parse the image headers.
//! 2. Check that the sections are contiguous from page 0.
//! 3. Count the pages: sections, stack, and the argument page.
//! 4. Check that the serialized arguments fit in one page.
//! 5. Take every frame at once from the frame allocator, or none at all.
//! 6. Copy each section page into its frame.
//! 7. Write the arguments into the argument page.
//! 8. Set up the registers: `pc` at the entry point, `sp` at the top of the
//!    stack, `a0` = argc and `a1` = argv.
//!
//! A failure at any step leaves nothing behind: the frames taken so far are
//! returned to the pool when the half-built address space is dropped.

pub mod arg_builder;

use crate::{
    mm_struct::MmStruct,
    pager::{Pager, Region},
};
use arg_builder::ArgBuilder;
use machine::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    coff::{Coff, CoffError},
    processor::Registers,
};

/// Errors of [`LoadContext::load`].
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The executable does not exist.
    #[error("cannot open {0}")]
    Open(String),
    /// The executable is not a valid image.
    #[error("malformed executable: {0}")]
    Malformed(#[from] CoffError),
    /// The sections do not cover pages `0..n` back to back.
    #[error("fragmented executable: section {0} is misplaced")]
    Fragmented(String),
    /// The arguments need more than one page.
    #[error("arguments too long ({0} bytes)")]
    ArgumentsTooLong(usize),
    /// Not enough free frames for the whole address space.
    #[error("insufficient physical memory ({0} pages needed)")]
    OutOfMemory(usize),
}

impl From<LoadError> for KernelError {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::Open(_) => KernelError::NoSuchEntry,
            LoadError::Malformed(_) | LoadError::Fragmented(_) => KernelError::NoExec,
            LoadError::ArgumentsTooLong(_) => KernelError::InvalidArgument,
            LoadError::OutOfMemory(_) => KernelError::NoMemory,
        }
    }
}

/// A context that holds the necessary state for loading and initializing a
/// user program.
pub struct LoadContext<P: Pager> {
    /// Virtual memory layout for the new user program.
    pub mm_struct: MmStruct<P>,
    /// Initial register values for the user program.
    pub regs: Registers,
}

impl<P: Pager> LoadContext<P> {
    /// Starts loading into the empty address space `mm_struct`.
    pub fn new(mm_struct: MmStruct<P>) -> Self {
        Self {
            mm_struct,
            regs: Registers::new(),
        }
    }

    /// Checks that the sections of `coff` cover pages `0..n` back to back,
    /// and returns `n`.
    fn section_pages(coff: &Coff) -> Result<usize, LoadError> {
        let mut pages = 0;
        for section in coff.sections() {
            if section.first_vpn() != pages {
                return Err(LoadError::Fragmented(section.name().to_string()));
            }
            pages += section.num_pages();
        }
        Ok(pages)
    }

    /// Copies every page of every section into its frame.
    fn load_sections(&mut self, coff: &mut Coff) -> Result<(), LoadError> {
        let machine = self.mm_struct.machine().clone();
        for index in 0..coff.num_sections() {
            let (first_vpn, num_pages) = {
                let section = &coff.sections()[index];
                (section.first_vpn(), section.num_pages())
            };
            for spn in 0..num_pages {
                let frame = self.mm_struct.page_table.entries()[first_vpn + spn].frame;
                machine
                    .memory()
                    .with_frame_mut(frame, |page| coff.load_page(index, spn, page))
                    .map_err(CoffError::Io)?;
            }
            log::debug!(
                "loader: initialized section {} ({} pages)",
                coff.sections()[index].name(),
                num_pages
            );
        }
        Ok(())
    }

    /// Loads the executable `name` with arguments `args`.
    ///
    /// # Returns
    /// - `Ok(Self)` with a fully populated address space and the initial
    ///   register state.
    /// - `Err(LoadError)` if any step fails. No frame remains allocated in
    ///   that case.
    pub fn load(mut self, name: &str, args: &[String]) -> Result<Self, LoadError> {
        let machine = self.mm_struct.machine().clone();
        let file = machine.file_system().open(name, false).ok_or_else(|| {
            log::debug!("loader: open failed for {}", name);
            LoadError::Open(name.to_string())
        })?;
        let mut coff = Coff::load(file)?;
        let result = self.load_image(&mut coff, args);
        coff.close();
        result.map(|_| self)
    }

    fn load_image(&mut self, coff: &mut Coff, args: &[String]) -> Result<(), LoadError> {
        let section_pages = Self::section_pages(coff).inspect_err(|_| {
            log::debug!("loader: fragmented executable");
        })?;
        let stack_pages = self.mm_struct.machine().config().stack_pages;

        let args_size = ArgBuilder::<P>::size_of(args);
        if args_size > PAGE_SIZE {
            log::debug!("loader: arguments too long");
            return Err(LoadError::ArgumentsTooLong(args_size));
        }

        let mut regions: Vec<Region> = coff
            .sections()
            .iter()
            .map(|section| Region {
                pages: section.num_pages(),
                read_only: section.is_read_only(),
            })
            .collect();
        // Stack, followed by the argument page.
        regions.push(Region {
            pages: stack_pages + 1,
            read_only: false,
        });
        let total = section_pages + stack_pages + 1;
        self.mm_struct
            .do_map(&regions)
            .map_err(|_| LoadError::OutOfMemory(total))?;

        self.load_sections(coff)?;

        let argv = Va::new((total - 1) * PAGE_SIZE).ok_or(LoadError::OutOfMemory(total))?;
        let argv = ArgBuilder::new(&mut self.mm_struct, argv, args.len())
            .finish(args)
            .map_err(|_| LoadError::ArgumentsTooLong(args_size))?;

        let entry = coff.entry_point() as i32;
        self.regs = Registers::new();
        self.regs[Registers::PC] = entry;
        self.regs[Registers::NEXT_PC] = entry.wrapping_add(4);
        self.regs[Registers::SP] = ((section_pages + stack_pages) * PAGE_SIZE) as i32;
        self.regs[Registers::A0] = args.len() as i32;
        self.regs[Registers::A1] = argv.into_usize() as i32;
        Ok(())
    }
}
