//! Layout of the argument page.
//!
//! The arguments of a program live in the last page of its address space:
//!
//! ```text
//!  argv ─► +-------------+
//!          | argv[0]     | ─┐   u32, little-endian
//!          | ...         |  │
//!          | argv[argc-1]|  │
//!          +-------------+  │
//!          | "arg0\0"    | ◄┘
//!          | ...         |
//!          +-------------+
//! ```
use crate::{mm_struct::MmStruct, pager::Pager};
use machine::{KernelError, addressing::Va};

/// Size of a pointer in user memory.
const PTR_SIZE: usize = 4;

/// Writes the argument vector of a new program into its argument page.
pub struct ArgBuilder<'a, P: Pager> {
    argv: usize,
    // Next free byte of the string area.
    cursor: usize,
    mm_struct: &'a mut MmStruct<P>,
}

impl<'a, P: Pager> ArgBuilder<'a, P> {
    /// The number of bytes `args` occupy once serialized: one pointer and
    /// one NUL-terminated string per argument.
    pub fn size_of(args: &[String]) -> usize {
        args.iter().map(|arg| PTR_SIZE + arg.len() + 1).sum()
    }

    /// Starts an argument vector at `argv`, with room for `argc` pointers.
    pub fn new(mm_struct: &'a mut MmStruct<P>, argv: Va, argc: usize) -> Self {
        Self {
            argv: argv.into_usize(),
            cursor: argv.into_usize() + PTR_SIZE * argc,
            mm_struct,
        }
    }

    /// Stores `arg` as entry `index` of the vector.
    ///
    /// # Errors
    /// - [`KernelError::BadAddress`] if the vector does not fit in the
    ///   address space.
    pub fn push(&mut self, index: usize, arg: &str) -> Result<(), KernelError> {
        let mut bytes = Vec::with_capacity(arg.len() + 1);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);

        let ptr = (self.cursor as u32).to_le_bytes();
        if self.mm_struct.write_memory(self.argv + PTR_SIZE * index, &ptr) != PTR_SIZE
            || self.mm_struct.write_memory(self.cursor, &bytes) != bytes.len()
        {
            return Err(KernelError::BadAddress);
        }
        self.cursor += bytes.len();
        Ok(())
    }

    /// Stores every argument of `args`, in order, and returns `argv`.
    pub fn finish(mut self, args: &[String]) -> Result<Va, KernelError> {
        for (index, arg) in args.iter().enumerate() {
            self.push(index, arg)?;
        }
        Va::new(self.argv).ok_or(KernelError::BadAddress)
    }
}
