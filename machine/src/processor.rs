//! The processor of the machine.
//!
//! The processor executes user code on behalf of a [`Task`]. User code sees
//! memory only through virtual addresses, which the processor hands to
//! [`Task::translate`] on every access. A `syscall` instruction traps into
//! [`Task::syscall`] with the [`Registers`] of the user program, and any
//! other fault traps into [`Task::exception`].
//!
//! ## Register convention
//!
//! | Register                 | Role on `syscall` entry | Role on return |
//! |--------------------------|-------------------------|----------------|
//! | [`Registers::V0`]        | System call number      | Return value   |
//! | [`Registers::A0`]..`A3`  | Arguments 1 to 4        |                |
//!
//! When a program starts, [`Registers::A0`] holds `argc`, [`Registers::A1`]
//! holds `argv`, and [`Registers::SP`] is the top of the user stack.
//!
//! ## Scripted programs
//!
//! [`ScriptedProcessor`] runs native closures as user programs. A closure is
//! selected by the entry point found in the program counter, and interacts
//! with the machine only through [`UserMode`]: raw system calls through the
//! register file and loads/stores through the process's address
//! translation.

use crate::{
    Machine,
    addressing::{Pa, Va},
    sync::SpinLock,
    task::Task,
    thread::Current,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::{
    collections::BTreeMap,
    ops::{Index, IndexMut},
    sync::Arc,
};

/// The register file of the processor.
#[derive(Clone, PartialEq, Eq)]
pub struct Registers([i32; Registers::NUM_TOTAL_REGS]);

impl Registers {
    /// The number of registers, including the special purpose ones.
    pub const NUM_TOTAL_REGS: usize = 40;
    /// Return value and system call number.
    pub const V0: usize = 2;
    /// Second return value.
    pub const V1: usize = 3;
    /// First argument.
    pub const A0: usize = 4;
    /// Second argument.
    pub const A1: usize = 5;
    /// Third argument.
    pub const A2: usize = 6;
    /// Fourth argument.
    pub const A3: usize = 7;
    /// Stack pointer.
    pub const SP: usize = 29;
    /// Return address.
    pub const RA: usize = 31;
    /// Program counter.
    pub const PC: usize = 34;
    /// Next program counter.
    pub const NEXT_PC: usize = 35;
    /// Previous program counter.
    pub const PREV_PC: usize = 36;
    /// The faulting virtual address of the last exception.
    pub const BAD_VADDR: usize = 39;

    /// Creates a register file with every register cleared.
    pub const fn new() -> Self {
        Self([0; Self::NUM_TOTAL_REGS])
    }

    /// The program counter.
    #[inline]
    pub fn pc(&self) -> i32 {
        self.0[Self::PC]
    }

    /// Moves to the next instruction.
    ///
    /// Called by the kernel after it finished a system call, so that the
    /// program does not execute the `syscall` instruction again.
    pub fn advance_pc(&mut self) {
        self.0[Self::PREV_PC] = self.0[Self::PC];
        self.0[Self::PC] = self.0[Self::NEXT_PC];
        self.0[Self::NEXT_PC] = self.0[Self::NEXT_PC].wrapping_add(4);
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<usize> for Registers {
    type Output = i32;

    fn index(&self, reg: usize) -> &i32 {
        &self.0[reg]
    }
}

impl IndexMut<usize> for Registers {
    fn index_mut(&mut self, reg: usize) -> &mut i32 {
        &mut self.0[reg]
    }
}

impl core::fmt::Debug for Registers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registers")
            .field("v0", &self.0[Self::V0])
            .field("a0", &self.0[Self::A0])
            .field("a1", &self.0[Self::A1])
            .field("a2", &self.0[Self::A2])
            .field("a3", &self.0[Self::A3])
            .field("sp", &format_args!("{:#x}", self.0[Self::SP]))
            .field("pc", &format_args!("{:#x}", self.0[Self::PC]))
            .finish()
    }
}

/// Causes of a trap into the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Exception {
    /// A `syscall` instruction.
    Syscall = 0,
    /// No valid translation for the address.
    PageFault = 1,
    /// No translation loaded in the TLB.
    TlbMiss = 2,
    /// Write to a read-only page.
    ReadOnly = 3,
    /// Translation produced an address outside physical memory.
    BusError = 4,
    /// Unaligned reference, or an address past the end of the address space.
    AddressError = 5,
    /// Integer overflow in add or subtract.
    Overflow = 6,
    /// Unimplemented or reserved instruction.
    IllegalInstruction = 7,
}

/// The processor contract.
///
/// `run` executes the user program whose state is in `registers` until it
/// stops trapping back to user mode. Traps are delivered to `task`.
pub trait Processor: Send + Sync {
    /// Runs user code on the current thread.
    ///
    /// Returns only if the task lets the program run off its end.
    fn run(&self, machine: &Machine, registers: &mut Registers, task: &mut dyn Task);
}

/// A user program run by the [`ScriptedProcessor`].
///
/// The returned value is passed to the `exit` system call, like the C
/// runtime does with the value returned by `main`.
pub type UserProgram = Arc<dyn Fn(&mut UserMode<'_>) -> i32 + Send + Sync>;

/// The system call the runtime issues when a program's main function
/// returns.
const SYSCALL_EXIT: i32 = 1;

/// The view a running user program has on the machine.
pub struct UserMode<'a> {
    machine: &'a Machine,
    registers: &'a mut Registers,
    task: &'a mut dyn Task,
    argc: i32,
    argv: i32,
}

impl<'a> UserMode<'a> {
    fn new(machine: &'a Machine, registers: &'a mut Registers, task: &'a mut dyn Task) -> Self {
        let (argc, argv) = (registers[Registers::A0], registers[Registers::A1]);
        Self {
            machine,
            registers,
            task,
            argc,
            argv,
        }
    }

    /// The argument count the program started with.
    pub fn argc(&self) -> i32 {
        self.argc
    }

    /// The address of the argument vector the program started with.
    pub fn argv(&self) -> u32 {
        self.argv as u32
    }

    /// Reads the argument strings of the program.
    pub fn args(&mut self) -> Vec<String> {
        (0..self.argc.max(0) as u32)
            .map(|i| {
                let ptr = self.read_word(self.argv() + 4 * i) as u32;
                self.read_cstr(ptr)
            })
            .collect()
    }

    /// The current register file.
    pub fn registers(&self) -> &Registers {
        self.registers
    }

    /// Issues a `syscall` instruction.
    ///
    /// Up to four arguments are placed in `a0`..`a3`; the remaining argument
    /// registers are cleared. Returns the value the kernel left in `v0`.
    ///
    /// A powered-off machine executes no further instruction: the calling
    /// thread is stopped instead.
    pub fn syscall(&mut self, sysno: i32, args: &[i32]) -> i32 {
        assert!(args.len() <= 4, "At most four system call arguments.");
        if self.machine.power().is_off() {
            Current::exit(-1)
        }
        self.registers[Registers::V0] = sysno;
        for (i, reg) in (Registers::A0..=Registers::A3).enumerate() {
            self.registers[reg] = args.get(i).copied().unwrap_or(0);
        }
        self.task.syscall(self.registers);
        self.registers[Registers::V0]
    }

    /// Raises `cause` at `bad_vaddr`.
    ///
    /// The exception is delivered to the task. If the task resumes the
    /// program anyway, the thread is stopped since the faulting instruction
    /// cannot make progress.
    pub fn raise(&mut self, cause: Exception, bad_vaddr: usize) -> ! {
        self.registers[Registers::BAD_VADDR] = bad_vaddr as i32;
        self.task.exception(cause, self.registers);
        Current::exit(-1)
    }

    fn translate(&mut self, va: usize, is_write: bool) -> Pa {
        let translated = Va::new(va)
            .ok_or(Exception::AddressError)
            .and_then(|va| self.task.translate(va, is_write));
        match translated {
            Ok(pa) => pa,
            Err(cause) => self.raise(cause, va),
        }
    }

    /// Loads `len` bytes at `va`.
    pub fn read_bytes(&mut self, va: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        let mut done = 0;
        while done < len {
            let pa = self.translate(va as usize + done, false);
            done += self.machine.memory().read(pa, &mut out[done..]);
        }
        out
    }

    /// Stores `data` at `va`.
    pub fn write_bytes(&mut self, va: u32, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let pa = self.translate(va as usize + done, true);
            done += self.machine.memory().write(pa, &data[done..]);
        }
    }

    /// Loads a little-endian word at `va`.
    pub fn read_word(&mut self, va: u32) -> i32 {
        let bytes = self.read_bytes(va, 4);
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Stores a little-endian word at `va`.
    pub fn write_word(&mut self, va: u32, value: i32) {
        self.write_bytes(va, &value.to_le_bytes())
    }

    /// Loads the NUL-terminated string at `va`.
    pub fn read_cstr(&mut self, mut va: u32) -> String {
        let mut bytes = Vec::new();
        loop {
            match self.read_bytes(va, 1)[0] {
                0 => break String::from_utf8_lossy(&bytes).into_owned(),
                b => bytes.push(b),
            }
            va += 1;
        }
    }

    /// The stack pointer.
    pub fn sp(&self) -> u32 {
        self.registers[Registers::SP] as u32
    }

    /// Reserves `len` bytes on the stack, keeping the stack pointer word
    /// aligned. Returns the address of the reserved area.
    pub fn alloca(&mut self, len: usize) -> u32 {
        let sp = (self.sp() - len as u32) & !3;
        self.registers[Registers::SP] = sp as i32;
        sp
    }

    /// Pushes `data` on the stack and returns its address.
    pub fn push_bytes(&mut self, data: &[u8]) -> u32 {
        let va = self.alloca(data.len());
        self.write_bytes(va, data);
        va
    }

    /// Pushes `s` with its NUL terminator on the stack and returns its
    /// address.
    pub fn push_str(&mut self, s: &str) -> u32 {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.push_bytes(&bytes)
    }

    /// Pushes an array of little-endian words on the stack and returns its
    /// address.
    pub fn push_words(&mut self, words: &[u32]) -> u32 {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.push_bytes(&bytes)
    }
}

/// A processor that runs native closures as user programs.
///
/// Programs are registered per entry point with
/// [`ScriptedProcessor::install`]. When a task starts running, the program
/// registered at its program counter is invoked; an unknown entry point
/// raises [`Exception::IllegalInstruction`].
#[derive(Default)]
pub struct ScriptedProcessor {
    programs: SpinLock<BTreeMap<i32, UserProgram>>,
}

impl ScriptedProcessor {
    /// Creates a processor with no program installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `program` as the code found at `entry`.
    pub fn install<F>(&self, entry: u32, program: F)
    where
        F: Fn(&mut UserMode<'_>) -> i32 + Send + Sync + 'static,
    {
        let mut programs = self.programs.lock();
        programs.insert(entry as i32, Arc::new(program));
        programs.unlock();
    }
}

impl Processor for ScriptedProcessor {
    fn run(&self, machine: &Machine, registers: &mut Registers, task: &mut dyn Task) {
        let pc = registers.pc();
        let programs = self.programs.lock();
        let program = programs.get(&pc).cloned();
        programs.unlock();

        let Some(program) = program else {
            registers[Registers::BAD_VADDR] = pc;
            task.exception(Exception::IllegalInstruction, registers);
            return;
        };
        let mut user = UserMode::new(machine, registers, task);
        let status = program(&mut user);
        user.syscall(SYSCALL_EXIT, &[status]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_pc() {
        let mut regs = Registers::new();
        regs[Registers::PC] = 0x100;
        regs[Registers::NEXT_PC] = 0x104;
        regs.advance_pc();
        assert_eq!(regs[Registers::PREV_PC], 0x100);
        assert_eq!(regs.pc(), 0x104);
        assert_eq!(regs[Registers::NEXT_PC], 0x108);
    }

    #[test]
    fn exception_codes() {
        assert_eq!(u32::from(Exception::ReadOnly), 3);
        assert_eq!(Exception::try_from(1u32).ok(), Some(Exception::PageFault));
        assert!(Exception::try_from(8u32).is_err());
    }
}
