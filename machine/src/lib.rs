//! # The simulated machine.
//!
//! This crate models the hardware and the low-level services that the user
//! program kernel in `userprog` is built on:
//!
//! - [`memory`]: Physical memory, split into page-sized frames.
//! - [`processor`]: The register file, the exception causes, and the
//!   [`Processor`] contract that executes user code and traps into a
//!   [`Task`].
//! - [`coff`]: The executable image format and its parser.
//! - [`fs`]: The file system and open-file contracts, with an in-memory
//!   implementation.
//! - [`teletype`]: The console, exposed as a pair of open files.
//! - [`thread`]: Kernel threads that can be joined and can exit early.
//! - [`sync`]: Spin locks and blocking mutexes.
//! - [`power`]: The machine power switch.
//!
//! A [`Machine`] bundles one instance of each of these, configured by a
//! [`MachineConfig`].
//!
//! [`Processor`]: processor::Processor
//! [`Task`]: task::Task

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod addressing;
pub mod coff;
pub mod config;
pub mod fs;
pub mod memory;
pub mod power;
pub mod processor;
pub mod sync;
pub mod task;
pub mod teletype;
pub mod thread;

use std::sync::Arc;

pub use config::{MachineConfig, MachineConfigBuilder};
use fs::FileSystem;
use memory::PhysicalMemory;
use power::PowerSwitch;
use processor::Processor;
use teletype::Console;

/// Enum representing errors that can occur during a kernel operation.
///
/// This enum is used to categorize errors encountered by the kernel operation.
/// Each variant corresponds to a specific type of error that might
/// occur during the handling of a kernel operation. User programs only ever
/// observe the generic `-1`; the variants exist so that the kernel can log
/// and test the precise reason.
#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    /// No such file or directory. (ENOENT)
    #[error("no such file or directory")]
    NoSuchEntry,
    /// I/O error. (EIO)
    #[error("input/output error")]
    IOError,
    /// Exec format error. (ENOEXEC)
    #[error("exec format error")]
    NoExec,
    /// Bad file number. (EBADF)
    #[error("bad file descriptor")]
    BadFileDescriptor,
    /// No child processes. (ECHILD)
    #[error("no child process")]
    NoChild,
    /// Out of memory. (ENOMEM)
    #[error("out of memory")]
    NoMemory,
    /// Bad address. (EFAULT)
    #[error("bad address")]
    BadAddress,
    /// Invalid argument. (EINVAL)
    #[error("invalid argument")]
    InvalidArgument,
    /// Too many open files. (EMFILE)
    #[error("too many open files")]
    TooManyOpenFile,
    /// File name too long. (ENAMETOOLONG)
    #[error("file name too long")]
    NameTooLong,
    /// Invalid system call number. (ENOSYS)
    #[error("invalid system call number")]
    NoSuchSyscall,
}

/// A simulated machine.
///
/// The machine owns its physical memory, its processor, its console, the
/// file system visible to user programs, and the power switch. It is shared
/// by every kernel thread through an [`Arc`].
pub struct Machine {
    config: MachineConfig,
    memory: PhysicalMemory,
    processor: Arc<dyn Processor>,
    file_system: Arc<dyn FileSystem>,
    console: Arc<Console>,
    power: PowerSwitch,
}

impl Machine {
    /// Assembles a machine from its configuration and devices.
    ///
    /// Physical memory is sized by [`MachineConfig::num_phys_pages`] and is
    /// zero-filled.
    pub fn new(
        config: MachineConfig,
        processor: Arc<dyn Processor>,
        file_system: Arc<dyn FileSystem>,
    ) -> Arc<Self> {
        log::info!(
            "machine: {} physical pages, {} stack pages per process.",
            config.num_phys_pages,
            config.stack_pages
        );
        Arc::new(Self {
            memory: PhysicalMemory::new(config.num_phys_pages),
            config,
            processor,
            file_system,
            console: Arc::new(Console::new()),
            power: PowerSwitch::new(),
        })
    }

    /// The configuration the machine was built with.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The physical memory of the machine.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// The processor that runs user code.
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    /// The file system that user programs see.
    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.file_system
    }

    /// The console device.
    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    /// The power switch.
    pub fn power(&self) -> &PowerSwitch {
        &self.power
    }

    /// Stops the machine.
    ///
    /// Threads blocked in [`PowerSwitch::wait`] are released and the
    /// processor refuses to run any further user instruction.
    pub fn halt(&self) {
        self.power.off();
    }
}
