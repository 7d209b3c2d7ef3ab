//! A teletype (TTY) console for character-based I/O.
//!
//! The console has an input queue, filled by whoever plays the keyboard
//! (usually a test), and an output buffer that collects everything user
//! programs print. Processes reach the console through two [`OpenFile`]
//! handles: one for reading ([`Console::open_input`]) and one for writing
//! ([`Console::open_output`]).
//!
//! Reading an empty console returns 0 bytes instead of waiting for input.

use crate::{KernelError, fs::OpenFile, sync::SpinLock};
use std::{collections::VecDeque, sync::Arc};

/// The console device.
#[derive(Default)]
pub struct Console {
    input: SpinLock<VecDeque<u8>>,
    output: SpinLock<Vec<u8>>,
}

impl Console {
    /// Creates a console with no pending input and no output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Types `data` on the keyboard.
    pub fn feed(&self, data: &[u8]) {
        let mut input = self.input.lock();
        input.extend(data);
        input.unlock();
    }

    /// Everything written to the console so far.
    pub fn output(&self) -> Vec<u8> {
        let output = self.output.lock();
        let data = output.clone();
        output.unlock();
        data
    }

    /// Everything written to the console so far, as text.
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output()).into_owned()
    }

    /// Opens the console for reading.
    pub fn open_input(self: &Arc<Self>) -> Box<dyn OpenFile> {
        Box::new(ConsoleFile {
            console: Some(self.clone()),
            writable: false,
        })
    }

    /// Opens the console for writing.
    pub fn open_output(self: &Arc<Self>) -> Box<dyn OpenFile> {
        Box::new(ConsoleFile {
            console: Some(self.clone()),
            writable: true,
        })
    }
}

/// A handle on the console.
struct ConsoleFile {
    console: Option<Arc<Console>>,
    writable: bool,
}

impl ConsoleFile {
    fn console(&self) -> Result<&Console, KernelError> {
        self.console.as_deref().ok_or(KernelError::BadFileDescriptor)
    }
}

impl OpenFile for ConsoleFile {
    fn name(&self) -> &str {
        if self.writable { "stdout" } else { "stdin" }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        if self.writable {
            return Err(KernelError::BadFileDescriptor);
        }
        let mut input = self.console()?.input.lock();
        let size = buf.len().min(input.len());
        for (dst, src) in buf.iter_mut().zip(input.drain(..size)) {
            *dst = src;
        }
        input.unlock();
        Ok(size)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError> {
        if !self.writable {
            return Err(KernelError::BadFileDescriptor);
        }
        let mut output = self.console()?.output.lock();
        output.extend_from_slice(buf);
        output.unlock();
        Ok(buf.len())
    }

    fn read_at(&mut self, _position: usize, _buf: &mut [u8]) -> Result<usize, KernelError> {
        Err(KernelError::InvalidArgument)
    }

    fn length(&self) -> usize {
        0
    }

    fn close(&mut self) {
        self.console = None;
    }
}
