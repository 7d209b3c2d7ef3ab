//! # System call ABI.
//!
//! A user program requests a service from the kernel with the `syscall`
//! instruction, which traps into [`Task::syscall`] with the program's
//! [`Registers`]:
//!
//! 1. The **system call number** is passed in the `v0` register.
//! 2. The **arguments** are passed in the registers `a0`..`a3`.
//! 3. The **return value** is stored to the `v0` register.
//!
//! Every handler returns a `Result<usize, KernelError>`. The epilogue,
//! [`SyscallAbi::set_return_value`], stores the success value, or `-1` for
//! any error, and moves the program past its `syscall` instruction. The exact
//! [`KernelError`] is never visible to user programs; it only shows up in
//! the kernel's logs.
//!
//! [`Task::syscall`]: machine::task::Task::syscall

use machine::{KernelError, processor::Registers};

/// The value user programs receive when a system call fails.
pub const SYSCALL_ERROR: i32 = -1;

/// A struct representing the system call ABI (Application Binary Interface).
///
/// This struct provides a way to access and manipulate the system call's
/// arguments and return values in the context of the system call handler. It
/// stores the system call number and up to four arguments that are passed to
/// the kernel during a system call, as well as a mutable reference to the
/// CPU registers ([`Registers`]).
pub struct SyscallAbi<'a> {
    /// The system call number that identifies the requested system service.
    pub sysno: i32,
    /// First argument for the system call.
    pub arg1: i32,
    /// Second argument for the system call.
    pub arg2: i32,
    /// Third argument for the system call.
    pub arg3: i32,
    /// Fourth argument for the system call.
    pub arg4: i32,
    /// A mutable reference to the [`Registers`] structure, which holds the
    /// state of the CPU registers.
    pub regs: &'a mut Registers,
}

impl<'a> SyscallAbi<'a> {
    /// Constructs a [`SyscallAbi`] instance from the provided registers.
    pub fn from_registers(regs: &'a mut Registers) -> Self {
        Self {
            sysno: regs[Registers::V0],
            arg1: regs[Registers::A0],
            arg2: regs[Registers::A1],
            arg3: regs[Registers::A2],
            arg4: regs[Registers::A3],
            regs,
        }
    }

    /// Sets the return value for the system call.
    ///
    /// On success `v0` holds the returned value; on error it holds
    /// [`SYSCALL_ERROR`]. The program counter is then advanced past the
    /// `syscall` instruction.
    pub fn set_return_value(self, return_val: Result<usize, KernelError>) {
        self.regs[Registers::V0] = match return_val {
            Ok(value) => value as i32,
            Err(e) => {
                log::trace!("syscall {} failed: {}", self.sysno, e);
                SYSCALL_ERROR
            }
        };
        self.regs.advance_pc();
    }
}
