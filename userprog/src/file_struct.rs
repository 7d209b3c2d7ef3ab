//! # File state of a process
//!
//! Each process keeps its open files in a [`FileStruct`], a fixed-capacity
//! table indexed by [`FileDescriptor`]. Descriptors 0 and 1 are bound to the
//! console when the process is created: 0 reads the keyboard and 1 writes
//! the screen. Every other descriptor comes from a FIFO pool of free
//! indices; a descriptor is in the pool iff its slot is empty. Closing 0 or
//! 1 empties the slot but never hands the index out again.
//!
//! ## System calls
//!
//! | No. | Call                                    | Returns            |
//! |-----|-----------------------------------------|--------------------|
//! | 4   | `int creat(char *name)`                 | descriptor         |
//! | 5   | `int open(char *name)`                  | descriptor         |
//! | 6   | `int read(int fd, void *buf, int size)` | bytes read         |
//! | 7   | `int write(int fd, void *buf, int size)`| bytes written      |
//! | 8   | `int close(int fd)`                     | 0                  |
//! | 9   | `int unlink(char *name)`                | 0                  |
//!
//! All of them return -1 on failure. Before touching memory, every handler
//! checks its pointer argument with [`MmStruct::check_user_ptr`], then its
//! descriptor, then its size.
//!
//! `read` and `write` move data in page-sized chunks through one of the two
//! scratch buffers of the [`UserKernel`], so the kernel memory they use is
//! bounded whatever the requested size. Processes issuing concurrent
//! transfers serialize on these buffers.

use crate::{
    kernel::UserKernel,
    mm_struct::MmStruct,
    pager::Pager,
    syscall::SyscallAbi,
    uaccess::{UserCString, UserU8SliceWO, user_range},
};
use machine::{
    KernelError, addressing::PAGE_SIZE, addressing::Va, fs::OpenFile, teletype::Console,
};
use std::{collections::VecDeque, sync::Arc};

/// Represents an index into a process’s file descriptor table.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct FileDescriptor(pub i32);

impl FileDescriptor {
    /// The console input.
    pub const STDIN: FileDescriptor = FileDescriptor(0);
    /// The console output.
    pub const STDOUT: FileDescriptor = FileDescriptor(1);
}

/// The [`FileStruct`] represents the filesystem state for a specific
/// process, which corresponds to the Linux kernel's `struct files_struct`.
pub struct FileStruct {
    files: Vec<Option<Box<dyn OpenFile>>>,
    free: VecDeque<FileDescriptor>,
}

impl FileStruct {
    /// Creates a table of `capacity` slots, with descriptors 0 and 1 bound to
    /// `console`.
    pub fn new(console: &Arc<Console>, capacity: usize) -> Self {
        let capacity = capacity.max(2);
        let mut files: Vec<Option<Box<dyn OpenFile>>> = Vec::with_capacity(capacity);
        files.push(Some(console.open_input()));
        files.push(Some(console.open_output()));
        files.resize_with(capacity, || None);
        Self {
            files,
            free: (2..capacity as i32).map(FileDescriptor).collect(),
        }
    }

    /// The capacity of the table.
    pub fn capacity(&self) -> usize {
        self.files.len()
    }

    /// The number of descriptors currently open.
    pub fn open_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_some()).count()
    }

    /// Installs `file` at the oldest free descriptor.
    ///
    /// # Errors
    /// - [`KernelError::TooManyOpenFile`] if no descriptor is free. The file
    ///   is closed in that case.
    pub fn install_file(
        &mut self,
        mut file: Box<dyn OpenFile>,
    ) -> Result<FileDescriptor, KernelError> {
        match self.free.pop_front() {
            Some(fd) => {
                self.files[fd.0 as usize] = Some(file);
                Ok(fd)
            }
            None => {
                file.close();
                Err(KernelError::TooManyOpenFile)
            }
        }
    }

    /// Looks up the open file of `fd`.
    pub fn get(&mut self, fd: FileDescriptor) -> Result<&mut Box<dyn OpenFile>, KernelError> {
        usize::try_from(fd.0)
            .ok()
            .and_then(|index| self.files.get_mut(index))
            .and_then(Option::as_mut)
            .ok_or(KernelError::BadFileDescriptor)
    }

    /// Closes `fd` and returns it to the pool.
    pub fn close_fd(&mut self, fd: FileDescriptor) -> Result<(), KernelError> {
        let mut file = usize::try_from(fd.0)
            .ok()
            .and_then(|index| self.files.get_mut(index))
            .and_then(Option::take)
            .ok_or(KernelError::BadFileDescriptor)?;
        file.close();
        if fd.0 >= 2 {
            self.free.push_back(fd);
        }
        Ok(())
    }

    /// Closes every open descriptor.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for fd in 0..self.files.len() as i32 {
            if self.close_fd(FileDescriptor(fd)).is_ok() {
                closed += 1;
            }
        }
        closed
    }

    fn read_name<P: Pager>(
        mm: &mut MmStruct<P>,
        kernel: &UserKernel,
        ptr: i32,
    ) -> Result<String, KernelError> {
        let va = mm.check_user_ptr(ptr)?;
        let max_len = kernel.machine().config().max_string_length;
        UserCString::new(va.into_usize()).read(mm, max_len)
    }

    fn open_file<P: Pager>(
        &mut self,
        mm: &mut MmStruct<P>,
        kernel: &UserKernel,
        abi: &SyscallAbi,
        create: bool,
    ) -> Result<usize, KernelError> {
        let name = Self::read_name(mm, kernel, abi.arg1)?;
        let file = kernel
            .machine()
            .file_system()
            .open(&name, create)
            .ok_or(KernelError::NoSuchEntry)?;
        self.install_file(file).map(|fd| fd.0 as usize)
    }

    /// Creates a file, or opens it if it already exists.
    ///
    /// # Syscall API
    /// ```c
    /// int creat(const char *name);
    /// ```
    /// - `name`: NUL-terminated path, at most 256 bytes long.
    ///
    /// Returns the new descriptor.
    pub fn create<P: Pager>(
        &mut self,
        mm: &mut MmStruct<P>,
        kernel: &UserKernel,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        self.open_file(mm, kernel, abi, true)
    }

    /// Opens an existing file.
    ///
    /// # Syscall API
    /// ```c
    /// int open(const char *name);
    /// ```
    /// - `name`: NUL-terminated path, at most 256 bytes long.
    ///
    /// Returns the new descriptor.
    pub fn open<P: Pager>(
        &mut self,
        mm: &mut MmStruct<P>,
        kernel: &UserKernel,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        self.open_file(mm, kernel, abi, false)
    }

    /// Reads from a file.
    ///
    /// # Syscall API
    /// ```c
    /// int read(int fd, void *buf, int size);
    /// ```
    /// - `fd`: Descriptor to read from.
    /// - `buf`: Destination buffer in user memory.
    /// - `size`: Number of bytes to read.
    ///
    /// Returns the number of bytes read, which is smaller than `size` when
    /// the file has no more data. The transfer stops at the first chunk the
    /// file fills only partially. If the data cannot be stored in `buf` the
    /// call fails.
    pub fn read<P: Pager>(
        &mut self,
        mm: &mut MmStruct<P>,
        kernel: &UserKernel,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        let buf = mm.check_user_ptr(abi.arg2)?;
        let file = self.get(FileDescriptor(abi.arg1))?;
        let size = usize::try_from(abi.arg3).map_err(|_| KernelError::InvalidArgument)?;

        let mut scratch = kernel.read_buffer().lock();
        let result = Self::read_chunks(&mut **file, mm, buf, size, &mut scratch[..]);
        scratch.unlock();
        result
    }

    fn read_chunks<P: Pager>(
        file: &mut dyn OpenFile,
        mm: &mut MmStruct<P>,
        buf: Va,
        size: usize,
        scratch: &mut [u8],
    ) -> Result<usize, KernelError> {
        let mut done = 0;
        while done < size {
            let chunk = (size - done).min(PAGE_SIZE);
            let read = file.read(&mut scratch[..chunk])?;
            UserU8SliceWO::new(buf.into_usize() + done, read).put(mm, &scratch[..read])?;
            done += read;
            if read < chunk {
                break;
            }
        }
        Ok(done)
    }

    /// Writes to a file.
    ///
    /// # Syscall API
    /// ```c
    /// int write(int fd, const void *buf, int size);
    /// ```
    /// - `fd`: Descriptor to write to.
    /// - `buf`: Source buffer in user memory.
    /// - `size`: Number of bytes to write.
    ///
    /// Returns `size`. Writing fewer bytes than requested is a failure. If
    /// any byte of `buf` is not readable, nothing is written.
    pub fn write<P: Pager>(
        &mut self,
        mm: &mut MmStruct<P>,
        kernel: &UserKernel,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        let buf = mm.check_user_ptr(abi.arg2)?;
        let file = self.get(FileDescriptor(abi.arg1))?;
        let size = usize::try_from(abi.arg3).map_err(|_| KernelError::InvalidArgument)?;
        match user_range(buf.into_usize(), size) {
            Some(range) if mm.access_ok(range.clone(), false) => (),
            _ => return Err(KernelError::BadAddress),
        }

        let mut scratch = kernel.write_buffer().lock();
        let result = Self::write_chunks(&mut **file, mm, buf, size, &mut scratch[..]);
        scratch.unlock();
        result
    }

    fn write_chunks<P: Pager>(
        file: &mut dyn OpenFile,
        mm: &mut MmStruct<P>,
        buf: Va,
        size: usize,
        scratch: &mut [u8],
    ) -> Result<usize, KernelError> {
        let mut done = 0;
        while done < size {
            let chunk = (size - done).min(PAGE_SIZE);
            if mm.read_memory(buf.into_usize() + done, &mut scratch[..chunk]) != chunk {
                return Err(KernelError::BadAddress);
            }
            if file.write(&scratch[..chunk])? != chunk {
                return Err(KernelError::IOError);
            }
            done += chunk;
        }
        Ok(done)
    }

    /// Closes a descriptor.
    ///
    /// # Syscall API
    /// ```c
    /// int close(int fd);
    /// ```
    pub fn close(&mut self, abi: &SyscallAbi) -> Result<usize, KernelError> {
        self.close_fd(FileDescriptor(abi.arg1)).map(|_| 0)
    }

    /// Removes a file from the file system.
    ///
    /// # Syscall API
    /// ```c
    /// int unlink(const char *name);
    /// ```
    /// Descriptors already open on the file keep working.
    pub fn unlink<P: Pager>(
        &mut self,
        mm: &mut MmStruct<P>,
        kernel: &UserKernel,
        abi: &SyscallAbi,
    ) -> Result<usize, KernelError> {
        let name = Self::read_name(mm, kernel, abi.arg1)?;
        if kernel.machine().file_system().remove(&name) {
            Ok(0)
        } else {
            Err(KernelError::NoSuchEntry)
        }
    }
}
