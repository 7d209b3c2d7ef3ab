//! # The user program kernel
//!
//! [`UserKernel`] owns the state shared by every process of the machine:
//! - the [`FrameAllocator`],
//! - the PID counter,
//! - the process table, which maps the PID of every live or unreaped
//!   process to its thread and exit status,
//! - the scratch buffers of the `read` and `write` system calls.
//!
//! PIDs are handed out in increasing order starting at [`ROOT_PID`], and only
//! to processes whose program loaded successfully. They are never reused.
//!
//! A process is reaped when its parent joins it, or when its parent exits
//! without joining it. In the latter case the child keeps running, but its
//! status is no longer observable.
//!
//! The machine is powered off when the root process halts or when the last
//! live process exits.

use crate::{
    eager_pager::EagerPager,
    file_struct::FileStruct,
    frame_alloc::FrameAllocator,
    loader::LoadContext,
    mm_struct::MmStruct,
    process::{ExitStatus, Pid, Process},
};
use crossbeam_utils::atomic::AtomicCell;
use machine::{
    KernelError, Machine,
    addressing::PAGE_SIZE,
    sync::{Mutex, SpinLock},
    thread::{JoinHandle, ThreadBuilder},
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicI32, AtomicUsize, Ordering},
    },
};

/// The PID of the first process.
pub const ROOT_PID: Pid = Pid(1);

/// What the kernel keeps about a process until it is reaped.
pub struct ProcessRecord {
    /// The thread running the process.
    pub handle: JoinHandle,
    /// The exit status, set when the process exits.
    pub status: ExitStatus,
}

/// The user program kernel.
pub struct UserKernel {
    machine: Arc<Machine>,
    frames: Arc<FrameAllocator>,
    next_pid: AtomicI32,
    live: AtomicUsize,
    processes: SpinLock<BTreeMap<Pid, ProcessRecord>>,
    read_buffer: Mutex<Box<[u8]>>,
    write_buffer: Mutex<Box<[u8]>>,
}

impl UserKernel {
    /// Boots a kernel on `machine`. Every physical frame starts free.
    pub fn new(machine: Arc<Machine>) -> Arc<Self> {
        let frames = Arc::new(FrameAllocator::new(machine.memory().num_frames()));
        Arc::new(Self {
            machine,
            frames,
            next_pid: AtomicI32::new(ROOT_PID.0),
            live: AtomicUsize::new(0),
            processes: SpinLock::new(BTreeMap::new()),
            read_buffer: Mutex::new(vec![0; PAGE_SIZE].into_boxed_slice()),
            write_buffer: Mutex::new(vec![0; PAGE_SIZE].into_boxed_slice()),
        })
    }

    /// The machine the kernel runs on.
    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// The frame allocator shared by all processes.
    pub fn frames(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    /// The scratch buffer of the `read` system call.
    pub fn read_buffer(&self) -> &Mutex<Box<[u8]>> {
        &self.read_buffer
    }

    /// The scratch buffer of the `write` system call.
    pub fn write_buffer(&self) -> &Mutex<Box<[u8]>> {
        &self.write_buffer
    }

    /// The number of processes that have not exited yet.
    pub fn live_processes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Loads the program `name` and starts it as a new process.
    ///
    /// The PID is assigned only once the program is loaded, so a failed
    /// load consumes neither a PID nor any frame.
    pub fn spawn(self: &Arc<Self>, name: &str, args: &[String]) -> Result<Pid, KernelError> {
        let pager = EagerPager::new(self.machine.clone(), self.frames.clone());
        let LoadContext { mm_struct, regs } =
            LoadContext::new(MmStruct::new(self.machine.clone(), pager))
                .load(name, args)
                .map_err(|e| {
                    log::info!("exec {}: {}", name, e);
                    KernelError::from(e)
                })?;

        let pid = Pid(self.next_pid.fetch_add(1, Ordering::SeqCst));
        let status = ExitStatus::new(AtomicCell::new(None));
        let pages = mm_struct.num_pages();
        let max_open_files = self.machine.config().max_open_files;
        let file_struct = FileStruct::new(self.machine.console(), max_open_files);
        let process = Process::new(pid, mm_struct, file_struct, status.clone(), self.clone());

        self.live.fetch_add(1, Ordering::SeqCst);
        let handle = ThreadBuilder::new(format!("{}[{}]", name, pid.0))
            .spawn(move || process.start(regs))
            .inspect_err(|_| {
                self.live.fetch_sub(1, Ordering::SeqCst);
            })?;
        let mut processes = self.processes.lock();
        processes.insert(pid, ProcessRecord { handle, status });
        processes.unlock();

        log::info!("process {} started: {} ({} pages)", pid.0, name, pages);
        Ok(pid)
    }

    /// Removes the record of `pid` from the process table.
    pub fn take_record(&self, pid: Pid) -> Option<ProcessRecord> {
        let mut processes = self.processes.lock();
        let record = processes.remove(&pid);
        processes.unlock();
        record
    }

    /// Reaps `children` without waiting for them.
    ///
    /// Their threads are detached and their exit status is discarded.
    pub fn disown(&self, children: impl IntoIterator<Item = Pid>) {
        let mut processes = self.processes.lock();
        let orphans: Vec<_> = children
            .into_iter()
            .filter_map(|pid| processes.remove(&pid))
            .collect();
        processes.unlock();
        for orphan in orphans {
            log::debug!("reaping orphan {}", orphan.handle.name);
        }
    }

    /// Accounts for a process that finished exiting.
    pub(crate) fn process_exited(&self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
            log::info!("last process exited");
            self.machine.halt();
        }
    }

    /// Runs the program `name` as the root process, and waits until the
    /// machine powers off.
    pub fn run(self: &Arc<Self>, name: &str, args: &[String]) -> Result<Pid, KernelError> {
        let pid = self.spawn(name, args)?;
        self.machine.power().wait();
        Ok(pid)
    }
}
