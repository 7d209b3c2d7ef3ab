//! Task trait for interact with user process.

use crate::{
    addressing::{Pa, Va},
    processor::{Exception, Registers},
    thread::Current,
};

/// Represents a **task** executed by a thread.
///
/// This trait defines core functionalities required for handling event
/// triggered by user process, such as **system calls**, **exceptions** and
/// **address translation**.
pub trait Task {
    /// Handles a **system call** triggered by the user program.
    ///
    /// - The `registers` parameter contains the state of the CPU registers at
    ///   the time of the system call.
    /// - Implementations of this function should parse the system call
    ///   arguments, execute the corresponding operation, store the result
    ///   back in `registers`, and advance the program counter.
    fn syscall(&mut self, registers: &mut Registers);

    /// Handles an exception other than a system call.
    ///
    /// - `cause` tells which exception was raised. The faulting address, if
    ///   any, is in [`Registers::BAD_VADDR`].
    ///
    /// By default, the thread is killed.
    #[allow(unused_variables)]
    fn exception(&mut self, cause: Exception, registers: &mut Registers) {
        log::warn!("Unexpected user mode exception: {:?}", cause);
        Current::exit(-1)
    }

    /// Translates a virtual address issued by the processor.
    ///
    /// - `va`: The virtual address being accessed.
    /// - `is_write`: Indicates whether the memory is being **read** (`false`)
    ///   or **written to** (`true`).
    /// - Returns the physical address, or the [`Exception`] the access raises.
    fn translate(&mut self, va: Va, is_write: bool) -> Result<Pa, Exception>;
}
