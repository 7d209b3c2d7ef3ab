//! # Process lifecycle
//!
//! A [`Process`] aggregates everything a running user program owns: its
//! address space ([`MmStruct`]), its open files ([`FileStruct`]), and the
//! PIDs of the children it created. It runs on exactly one kernel thread,
//! which is the only thread that ever touches it.
//!
//! ```text
//!  exec ──► Created ──► Running ──► Exited ──► Reaped
//!                                     │          ▲
//!                                     └── join ──┘  (or parent exit)
//! ```
//!
//! ## System calls
//!
//! ```c
//! void halt(void);
//! void exit(int status);
//! int exec(char *name, int argc, char **argv);
//! int join(int pid, int *status);
//! ```
//!
//! A process that dies of an unhandled exception, or that issues an unknown
//! system call, goes through the same exit path as `exit`, but leaves no
//! status behind: its parent's `join` returns 0 instead of 1.

use crate::{
    eager_pager::EagerPager,
    file_struct::FileStruct,
    kernel::{ROOT_PID, UserKernel},
    mm_struct::MmStruct,
    syscall::SyscallAbi,
    uaccess::{UserCString, UserPtrRO, UserPtrWO, UserWord, user_range},
};
use crossbeam_utils::atomic::AtomicCell;
use machine::{KernelError, processor::Registers, thread::Current};
use std::{collections::BTreeSet, sync::Arc};

const PTR_SIZE: usize = <i32 as UserWord>::SIZE;

/// A process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

/// The status a process leaves when it exits. `None` until the process
/// exits, and also afterwards if it did not exit through `exit`.
pub type ExitStatus = Arc<AtomicCell<Option<i32>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Exited,
}

/// A process state, which contains file state and memory state.
pub struct Process {
    /// The identifier of the process.
    pub pid: Pid,
    /// The memory state of the process.
    pub mm_struct: MmStruct<EagerPager>,
    /// The file state of the process.
    pub file_struct: FileStruct,
    children: BTreeSet<Pid>,
    status: ExitStatus,
    kernel: Arc<UserKernel>,
    state: State,
}

impl Process {
    /// Assembles a process from a loaded address space.
    pub fn new(
        pid: Pid,
        mm_struct: MmStruct<EagerPager>,
        file_struct: FileStruct,
        status: ExitStatus,
        kernel: Arc<UserKernel>,
    ) -> Self {
        Self {
            pid,
            mm_struct,
            file_struct,
            children: BTreeSet::new(),
            status,
            kernel,
            state: State::Created,
        }
    }

    /// The kernel the process runs on.
    pub fn kernel(&self) -> &Arc<UserKernel> {
        &self.kernel
    }

    /// The children that have not been joined yet.
    pub fn children(&self) -> &BTreeSet<Pid> {
        &self.children
    }

    /// Runs the process from `regs` until it exits.
    pub fn start(mut self, mut regs: Registers) {
        self.state = State::Running;
        let machine = self.kernel.machine().clone();
        machine.processor().run(&machine, &mut regs, &mut self);
        self.exit(None)
    }

    /// Stops the machine.
    ///
    /// # Syscall API
    /// ```c
    /// void halt(void);
    /// ```
    /// Only the root process may halt the machine, in which case the call
    /// does not return. For any other process the call does nothing and
    /// returns 0.
    pub fn halt(&mut self) -> Result<usize, KernelError> {
        if self.pid != ROOT_PID {
            log::debug!("process {}: halt ignored", self.pid.0);
            return Ok(0);
        }
        let (closed, released) = self.release_resources();
        log::info!(
            "process {}: halt, {} files closed, {} frames released",
            self.pid.0,
            closed,
            released
        );
        self.state = State::Exited;
        self.kernel.machine().halt();
        Current::exit(0)
    }

    /// Closes every descriptor and gives every frame back to the frame
    /// allocator. Returns the number of files closed and frames released.
    fn release_resources(&mut self) -> (usize, usize) {
        (self.file_struct.close_all(), self.mm_struct.release())
    }

    /// Terminates the current process.
    ///
    /// # Syscall API
    /// ```c
    /// void exit(int status);
    /// ```
    /// Every descriptor is closed and every frame goes back to the frame
    /// allocator before the status is published. Children that were never
    /// joined are reaped. `status` is `None` when the process is killed by
    /// the kernel.
    pub fn exit(&mut self, status: Option<i32>) -> ! {
        let (closed, released) = self.release_resources();
        self.status.store(status);
        self.kernel.disown(std::mem::take(&mut self.children));
        log::info!(
            "process {} exited ({:?}): {} files closed, {} frames released",
            self.pid.0,
            status,
            closed,
            released
        );
        self.state = State::Exited;
        self.kernel.process_exited();
        Current::exit(status.unwrap_or(-1))
    }

    /// Executes a program in a new child process.
    ///
    /// # Syscall API
    /// ```c
    /// int exec(char *name, int argc, char **argv);
    /// ```
    /// - `name`: NUL-terminated path of the executable.
    /// - `argc`: Number of arguments, not negative.
    /// - `argv`: Array of `argc` pointers to NUL-terminated arguments.
    ///
    /// Returns the PID of the child. Any invalid pointer, in the arguments
    /// or in `argv`, fails the call before the child is created.
    pub fn exec(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let max_len = self.kernel.machine().config().max_string_length;
        let mm = &mut self.mm_struct;

        let name = mm.check_user_ptr(abi.arg1)?;
        let argc = usize::try_from(abi.arg2).map_err(|_| KernelError::InvalidArgument)?;
        let argv = mm.check_user_ptr(abi.arg3)?;
        let name = UserCString::new(name.into_usize()).read(mm, max_len)?;

        let argv = argv.into_usize();
        let table = argc
            .checked_mul(PTR_SIZE)
            .and_then(|size| user_range(argv, size))
            .ok_or(KernelError::BadAddress)?;
        if !mm.access_ok(table, false) {
            return Err(KernelError::BadAddress);
        }
        let args = (0..argc)
            .map(|i| {
                let ptr = UserPtrRO::<i32>::new(argv + i * PTR_SIZE).get(mm)?;
                let va = mm.check_user_ptr(ptr)?;
                UserCString::new(va.into_usize()).read(mm, max_len)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pid = self.kernel.spawn(&name, &args)?;
        self.children.insert(pid);
        Ok(pid.0 as usize)
    }

    /// Waits for a child process to exit.
    ///
    /// # Syscall API
    /// ```c
    /// int join(int pid, int *status);
    /// ```
    /// - `pid`: A child of the caller that has not been joined yet.
    /// - `status`: Where to store the exit status of the child.
    ///
    /// Blocks until the child exits, then reaps it. Returns 1 if the child
    /// called `exit`, in which case its status is stored at `status`, and 0
    /// if it was killed. The child is reaped even if storing its status
    /// fails.
    pub fn join(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        let status_ptr = self.mm_struct.check_user_ptr(abi.arg2)?;
        let pid = Pid(abi.arg1);
        if !self.children.remove(&pid) {
            return Err(KernelError::NoChild);
        }
        let record = self.kernel.take_record(pid).ok_or(KernelError::NoChild)?;
        record.handle.join();

        match record.status.load() {
            None => Ok(0),
            Some(status) => {
                UserPtrWO::<i32>::new(status_ptr.into_usize()).put(&mut self.mm_struct, status)?;
                Ok(1)
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // A running process is dropped without exiting when the machine was
        // powered off under it, or when the kernel panicked on its thread.
        if self.state == State::Running && !self.kernel.machine().power().is_off() {
            log::error!("process {}: kernel thread died", self.pid.0);
            self.kernel.machine().halt();
        }
    }
}
