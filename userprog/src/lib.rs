//! # User programs on the simulated machine.
//!
//! This crate is the process and virtual-memory core of the kernel. It
//! turns executable images into processes, gives each of them a private
//! paged address space, and serves their system calls:
//!
//! - [`frame_alloc`]: The pool of physical frames shared by all processes.
//! - [`page_table`]: The per-process translation from virtual pages to
//!   frames.
//! - [`pager`], [`eager_pager`]: The policy that backs pages with frames.
//! - [`mm_struct`], [`uaccess`]: The address space of a process, and checked
//!   copies between kernel and user memory.
//! - [`loader`]: Builds an address space from a COFF image and an argument
//!   list.
//! - [`file_struct`]: The file descriptor table and the file system calls.
//! - [`syscall`]: The system call ABI.
//! - [`process`], [`kernel`]: Process lifecycle and the state shared by all
//!   processes.
//!
//! The [`Task`] implementation of [`Process`] is the entry point of every
//! trap: it decodes the system call number and dispatches to the handlers
//! above.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod eager_pager;
pub mod file_struct;
pub mod frame_alloc;
pub mod kernel;
pub mod loader;
pub mod mm_struct;
pub mod page_table;
pub mod pager;
pub mod process;
pub mod syscall;
pub mod uaccess;

use machine::{
    KernelError,
    addressing::{Pa, Va},
    processor::{Exception, Registers},
    task::Task,
};
use num_enum::TryFromPrimitive;
use syscall::SyscallAbi;

pub use kernel::UserKernel;
pub use process::{Pid, Process};

/// Represents system call numbers.
///
/// Each variant corresponds to a specific system call that can be invoked
/// using the system call interface. The numeric values align with the
/// syscall table of the user-level C library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum SyscallNumber {
    /// Stops the machine.
    Halt = 0,
    /// Terminates the current process.
    Exit = 1,
    /// Runs a program in a new child process.
    Exec = 2,
    /// Waits for a child process to exit.
    Join = 3,
    /// Creates a file and returns a file descriptor.
    Create = 4,
    /// Opens a file and returns a file descriptor.
    Open = 5,
    /// Reads data from a file descriptor.
    Read = 6,
    /// Writes data to a file descriptor.
    Write = 7,
    /// Closes an open file descriptor.
    Close = 8,
    /// Removes a file.
    Unlink = 9,
}

impl SyscallNumber {
    /// Decodes the system call number passed in `v0`.
    pub fn decode(sysno: i32) -> Result<Self, KernelError> {
        Self::try_from(sysno).map_err(|_| KernelError::NoSuchSyscall)
    }
}

impl Task for Process {
    /// Handles a system call request from a user program.
    ///
    /// An unknown system call number is a fatal fault: the process is killed
    /// without leaving an exit status.
    fn syscall(&mut self, regs: &mut Registers) {
        let abi = SyscallAbi::from_registers(regs);
        let no = match SyscallNumber::decode(abi.sysno) {
            Ok(no) => no,
            Err(e) => {
                log::warn!("process {}: {} ({})", self.pid.0, e, abi.sysno);
                self.exit(None)
            }
        };
        let kernel = self.kernel().clone();
        let return_val = match no {
            SyscallNumber::Halt => self.halt(),
            SyscallNumber::Exit => self.exit(Some(abi.arg1)),
            SyscallNumber::Exec => self.exec(&abi),
            SyscallNumber::Join => self.join(&abi),
            SyscallNumber::Create => self.file_struct.create(&mut self.mm_struct, &kernel, &abi),
            SyscallNumber::Open => self.file_struct.open(&mut self.mm_struct, &kernel, &abi),
            SyscallNumber::Read => self.file_struct.read(&mut self.mm_struct, &kernel, &abi),
            SyscallNumber::Write => self.file_struct.write(&mut self.mm_struct, &kernel, &abi),
            SyscallNumber::Close => self.file_struct.close(&abi),
            SyscallNumber::Unlink => self.file_struct.unlink(&mut self.mm_struct, &kernel, &abi),
        };
        abi.set_return_value(return_val);
    }

    /// Kills the process on any exception other than a system call.
    fn exception(&mut self, cause: Exception, regs: &mut Registers) {
        log::warn!(
            "process {}: unexpected {:?} at {:#x} (pc {:#x})",
            self.pid.0,
            cause,
            regs[Registers::BAD_VADDR],
            regs.pc()
        );
        self.exit(None)
    }

    fn translate(&mut self, va: Va, is_write: bool) -> Result<Pa, Exception> {
        self.mm_struct.translate(va, is_write)
    }
}
