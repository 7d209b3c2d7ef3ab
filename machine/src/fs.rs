//! File system contracts and an in-memory file system.
//!
//! The kernel reaches files through two traits:
//! - [`FileSystem`]: looks files up by name, creating or removing them.
//! - [`OpenFile`]: a handle on an open file, with its own file pointer.
//!
//! [`MemFileSystem`] keeps every file in host memory. Removing a file only
//! unlinks its name; handles that are already open keep working on the
//! contents. It also counts the handles that were opened but not closed yet,
//! which lets tests check that the kernel closes every file it opens.

use crate::{KernelError, sync::SpinLock};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// A handle on an open file.
///
/// `read` and `write` start at the handle's file pointer and advance it by
/// the number of bytes transferred. A transfer shorter than requested is not
/// an error (e.g. reading at the end of the file).
pub trait OpenFile: Send {
    /// The name the file was opened with.
    fn name(&self) -> &str;

    /// Reads up to `buf.len()` bytes at the file pointer.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError>;

    /// Writes up to `buf.len()` bytes at the file pointer.
    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError>;

    /// Reads up to `buf.len()` bytes at `position` without moving the file
    /// pointer.
    fn read_at(&mut self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

    /// The length of the file, in bytes.
    fn length(&self) -> usize;

    /// Closes the handle. Further operations on a closed handle fail with
    /// [`KernelError::BadFileDescriptor`].
    fn close(&mut self);
}

/// A file system.
pub trait FileSystem: Send + Sync {
    /// Opens the file `name`.
    ///
    /// If the file does not exist, it is created when `create` is true.
    /// Returns `None` if the file does not exist and was not created.
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn OpenFile>>;

    /// Removes the file `name`. Returns true on success.
    fn remove(&self, name: &str) -> bool;
}

type Contents = Arc<SpinLock<Vec<u8>>>;

/// A file system whose files live in host memory.
#[derive(Default)]
pub struct MemFileSystem {
    files: SpinLock<BTreeMap<String, Contents>>,
    open_handles: Arc<AtomicUsize>,
}

impl MemFileSystem {
    /// Creates an empty file system.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or replaces) the file `name` with `data`.
    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>) {
        let mut files = self.files.lock();
        files.insert(name.to_string(), Arc::new(SpinLock::new(data.into())));
        files.unlock();
    }

    /// Returns a copy of the contents of the file `name`.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock();
        let file = files.get(name).cloned();
        files.unlock();
        file.map(|contents| {
            let guard = contents.lock();
            let data = guard.clone();
            guard.unlock();
            data
        })
    }

    /// Returns true if the file `name` exists.
    pub fn exists(&self, name: &str) -> bool {
        let files = self.files.lock();
        let exists = files.contains_key(name);
        files.unlock();
        exists
    }

    /// The number of handles opened and not closed yet.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

impl FileSystem for MemFileSystem {
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn OpenFile>> {
        let mut files = self.files.lock();
        let contents = match files.get(name) {
            Some(contents) => Some(contents.clone()),
            None if create => {
                let contents = Contents::default();
                files.insert(name.to_string(), contents.clone());
                Some(contents)
            }
            None => None,
        };
        files.unlock();
        contents.map(|contents| {
            self.open_handles.fetch_add(1, Ordering::SeqCst);
            Box::new(MemFile {
                name: name.to_string(),
                contents: Some(contents),
                position: 0,
                open_handles: self.open_handles.clone(),
            }) as Box<dyn OpenFile>
        })
    }

    fn remove(&self, name: &str) -> bool {
        let mut files = self.files.lock();
        let removed = files.remove(name).is_some();
        files.unlock();
        removed
    }
}

/// An open file of a [`MemFileSystem`].
struct MemFile {
    name: String,
    contents: Option<Contents>,
    position: usize,
    open_handles: Arc<AtomicUsize>,
}

impl MemFile {
    fn contents(&self) -> Result<&Contents, KernelError> {
        self.contents.as_ref().ok_or(KernelError::BadFileDescriptor)
    }
}

impl OpenFile for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        let read = self.read_at(self.position, buf)?;
        self.position += read;
        Ok(read)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError> {
        let position = self.position;
        let mut data = self.contents()?.lock();
        if data.len() < position + buf.len() {
            data.resize(position + buf.len(), 0);
        }
        data[position..position + buf.len()].copy_from_slice(buf);
        data.unlock();
        self.position += buf.len();
        Ok(buf.len())
    }

    fn read_at(&mut self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.contents()?.lock();
        let size = data.len().saturating_sub(position).min(buf.len());
        if size > 0 {
            buf[..size].copy_from_slice(&data[position..position + size]);
        }
        data.unlock();
        Ok(size)
    }

    fn length(&self) -> usize {
        match self.contents() {
            Ok(contents) => {
                let data = contents.lock();
                let len = data.len();
                data.unlock();
                len
            }
            Err(_) => 0,
        }
    }

    fn close(&mut self) {
        if self.contents.take().is_some() {
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_read() {
        let fs = MemFileSystem::new();
        assert!(fs.open("a", false).is_none(), "Opening a missing file must fail.");
        let mut file = fs.open("a", true).expect("create failed");
        assert_eq!(file.write(b"hello"), Ok(5));
        assert_eq!(file.length(), 5);

        let mut other = fs.open("a", false).expect("open failed");
        let mut buf = [0u8; 8];
        assert_eq!(other.read(&mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(other.read(&mut buf), Ok(0), "Reading at EOF returns 0.");
    }

    #[test]
    fn remove_keeps_open_handles() {
        let fs = MemFileSystem::new();
        fs.insert("b", b"data".to_vec());
        let mut file = fs.open("b", false).unwrap();
        assert!(fs.remove("b"));
        assert!(!fs.remove("b"), "A file can be removed only once.");
        assert!(!fs.exists("b"));
        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(0, &mut buf), Ok(4));
    }

    #[test]
    fn closed_handle() {
        let fs = MemFileSystem::new();
        let mut file = fs.open("c", true).unwrap();
        assert_eq!(fs.open_handles(), 1);
        file.close();
        assert_eq!(file.write(b"x"), Err(KernelError::BadFileDescriptor));
        file.close();
        assert_eq!(fs.open_handles(), 0, "Closing twice counts once.");
    }
}
