//! Machine configuration.
//!
//! A [`MachineConfig`] is assembled with a [`MachineConfigBuilder`] before
//! the machine boots, either programmatically or from a `nachos.conf`-style
//! text:
//!
//! ```text
//! # Keys are case sensitive.
//! Processor.numPhysPages = 64
//! Process.stackPages = 8
//! Process.maxOpenFiles = 16
//! Process.maxStringLength = 256
//! ```

use crate::KernelError;

/// System-wide parameters of the machine and of its processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Number of physical frames of the machine.
    pub num_phys_pages: usize,
    /// Number of stack pages given to each process.
    pub stack_pages: usize,
    /// Capacity of each process's file descriptor table.
    pub max_open_files: usize,
    /// Longest string, excluding its terminator, a system call accepts from
    /// user memory.
    pub max_string_length: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            num_phys_pages: 64,
            stack_pages: 8,
            max_open_files: 16,
            max_string_length: 256,
        }
    }
}

impl MachineConfig {
    /// Starts a builder from the default configuration.
    pub fn builder() -> MachineConfigBuilder {
        MachineConfigBuilder {
            config: MachineConfig::default(),
        }
    }

    /// Parses a configuration text.
    ///
    /// Each non-empty line holds a `Key = value` pair; `#` starts a comment.
    /// Keys this machine does not know are ignored.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if a line has no `=`, or if a known
    ///   key has a value that is not a non-negative integer.
    pub fn from_conf(text: &str) -> Result<Self, KernelError> {
        let mut builder = Self::builder();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or(KernelError::InvalidArgument)?;
            let (key, value) = (key.trim(), value.trim());
            let parse = || value.parse::<usize>().map_err(|_| KernelError::InvalidArgument);
            builder = match key {
                "Processor.numPhysPages" => builder.num_phys_pages(parse()?),
                "Process.stackPages" => builder.stack_pages(parse()?),
                "Process.maxOpenFiles" => builder.max_open_files(parse()?),
                "Process.maxStringLength" => builder.max_string_length(parse()?),
                _ => {
                    log::debug!("config: ignoring unknown key {}", key);
                    builder
                }
            };
        }
        Ok(builder.build())
    }
}

/// The [`MachineConfigBuilder`] struct provides an interface for configuring
/// the machine before it boots.
pub struct MachineConfigBuilder {
    config: MachineConfig,
}

impl MachineConfigBuilder {
    /// Sets the number of physical frames.
    pub fn num_phys_pages(mut self, pages: usize) -> Self {
        self.config.num_phys_pages = pages;
        self
    }

    /// Sets the number of stack pages of each process.
    pub fn stack_pages(mut self, pages: usize) -> Self {
        self.config.stack_pages = pages;
        self
    }

    /// Sets the capacity of each file descriptor table.
    ///
    /// Values below 2 are raised to 2, since descriptors 0 and 1 are always
    /// bound to the console.
    pub fn max_open_files(mut self, files: usize) -> Self {
        self.config.max_open_files = files.max(2);
        self
    }

    /// Sets the longest string accepted from user memory.
    pub fn max_string_length(mut self, len: usize) -> Self {
        self.config.max_string_length = len;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> MachineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = MachineConfig::builder().num_phys_pages(8).build();
        assert_eq!(config.num_phys_pages, 8);
        assert_eq!(config.stack_pages, 8);
        assert_eq!(config.max_open_files, 16);
        assert_eq!(config.max_string_length, 256);
    }

    #[test]
    fn parse_conf() {
        let config = MachineConfig::from_conf(
            "# comment\n\
             Processor.numPhysPages = 128\n\
             Kernel.kernel = nachos.userprog.UserKernel\n\
             Process.stackPages=4 # trailing\n",
        )
        .unwrap();
        assert_eq!(config.num_phys_pages, 128);
        assert_eq!(config.stack_pages, 4);

        assert_eq!(
            MachineConfig::from_conf("Process.stackPages = many"),
            Err(KernelError::InvalidArgument)
        );
        assert_eq!(MachineConfig::from_conf("garbage"), Err(KernelError::InvalidArgument));
    }
}
