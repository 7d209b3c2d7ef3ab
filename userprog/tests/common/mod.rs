//! Shared harness of the scenario tests.
//!
//! A [`Board`] is a machine with a scripted processor, an in-memory file
//! system and a kernel. Programs are native closures, installed both in the
//! processor (at a unique entry point) and in the file system (as a COFF
//! image whose entry point selects the closure). The helpers at the bottom
//! are the user-level stubs of the system calls.
#![allow(dead_code)]

use machine::{
    Machine,
    addressing::PAGE_SIZE,
    coff::{CoffBuilder, SectionKind},
    config::MachineConfig,
    fs::MemFileSystem,
    processor::{ScriptedProcessor, UserMode},
};
use std::sync::{Arc, Mutex};
use userprog::{Pid, SyscallNumber, UserKernel};

/// Pages of a process built by [`image`] with the default configuration:
/// text, data, 8 stack pages and the argument page.
pub const PAGES_PER_PROCESS: usize = 11;

pub struct Board {
    pub machine: Arc<Machine>,
    pub kernel: Arc<UserKernel>,
    pub fs: Arc<MemFileSystem>,
    cpu: Arc<ScriptedProcessor>,
    next_entry: u32,
}

pub fn boot() -> Board {
    boot_with(MachineConfig::default())
}

pub fn boot_with(config: MachineConfig) -> Board {
    let _ = env_logger::builder().is_test(true).try_init();
    let cpu = Arc::new(ScriptedProcessor::new());
    let fs = Arc::new(MemFileSystem::new());
    let machine = Machine::new(config, cpu.clone(), fs.clone());
    let kernel = UserKernel::new(machine.clone());
    Board {
        machine,
        kernel,
        fs,
        cpu,
        next_entry: 0x10,
    }
}

/// A one-page text section holding `entry`, followed by a one-page data
/// section.
pub fn image(entry: u32) -> Vec<u8> {
    CoffBuilder::new(entry)
        .section(".text", SectionKind::Text, vec![0; 0x100])
        .section(".data", SectionKind::Data, vec![0; 16])
        .build()
}

impl Board {
    /// Installs `program` as the executable `name`.
    pub fn install<F>(&mut self, name: &str, program: F)
    where
        F: Fn(&mut UserMode<'_>) -> i32 + Send + Sync + 'static,
    {
        let entry = self.next_entry;
        self.next_entry += 4;
        self.cpu.install(entry, program);
        self.fs.insert(name, image(entry));
    }

    /// Installs `image` as the executable `name` without any program behind
    /// it.
    pub fn install_image(&self, name: &str, image: Vec<u8>) {
        self.fs.insert(name, image);
    }

    /// Runs `name` as the root process until the machine powers off.
    pub fn run(&self, name: &str) -> Pid {
        self.kernel.run(name, &[]).expect("root process failed to load")
    }
}

/// Values observed by user programs, checked by the test thread once the
/// machine is off.
pub struct Recorder<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn record(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    pub fn values(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

pub fn halt(u: &mut UserMode<'_>) -> i32 {
    u.syscall(SyscallNumber::Halt as i32, &[])
}

pub fn exit(u: &mut UserMode<'_>, status: i32) -> ! {
    u.syscall(SyscallNumber::Exit as i32, &[status]);
    unreachable!("exit returned");
}

pub fn exec(u: &mut UserMode<'_>, name: &str, args: &[&str]) -> i32 {
    let name = u.push_str(name);
    let ptrs: Vec<u32> = args.iter().map(|arg| u.push_str(arg)).collect();
    let argv = u.push_words(&ptrs);
    u.syscall(
        SyscallNumber::Exec as i32,
        &[name as i32, args.len() as i32, argv as i32],
    )
}

/// Joins `pid`; returns the result of the call and the status word.
pub fn join(u: &mut UserMode<'_>, pid: i32) -> (i32, i32) {
    let status = u.alloca(4);
    u.write_word(status, i32::MIN);
    let ret = u.syscall(SyscallNumber::Join as i32, &[pid, status as i32]);
    (ret, u.read_word(status))
}

pub fn creat(u: &mut UserMode<'_>, name: &str) -> i32 {
    let name = u.push_str(name);
    u.syscall(SyscallNumber::Create as i32, &[name as i32])
}

pub fn open(u: &mut UserMode<'_>, name: &str) -> i32 {
    let name = u.push_str(name);
    u.syscall(SyscallNumber::Open as i32, &[name as i32])
}

pub fn unlink(u: &mut UserMode<'_>, name: &str) -> i32 {
    let name = u.push_str(name);
    u.syscall(SyscallNumber::Unlink as i32, &[name as i32])
}

/// Reads up to `len` bytes from `fd`; returns the result of the call and
/// the bytes read.
pub fn read(u: &mut UserMode<'_>, fd: i32, len: usize) -> (i32, Vec<u8>) {
    let buf = u.alloca(len);
    let ret = u.syscall(SyscallNumber::Read as i32, &[fd, buf as i32, len as i32]);
    let data = if ret > 0 {
        u.read_bytes(buf, ret as usize)
    } else {
        Vec::new()
    };
    (ret, data)
}

pub fn write(u: &mut UserMode<'_>, fd: i32, data: &[u8]) -> i32 {
    let buf = u.push_bytes(data);
    u.syscall(SyscallNumber::Write as i32, &[fd, buf as i32, data.len() as i32])
}

pub fn close(u: &mut UserMode<'_>, fd: i32) -> i32 {
    u.syscall(SyscallNumber::Close as i32, &[fd])
}

/// The size of the address space of a process built by [`image`].
pub fn address_space_size() -> usize {
    PAGES_PER_PROCESS * PAGE_SIZE
}
