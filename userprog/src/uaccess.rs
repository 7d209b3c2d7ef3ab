//! Typed access to user memory.
//!
//! System call handlers never touch user memory directly. They wrap the raw
//! addresses found in the argument registers into one of the accessors of
//! this module and consume it against the caller's [`MmStruct`]. Each accessor
//! is used once: `get`/`put`/`read` take `self`, so a checked pointer cannot
//! be reused after the memory behind it may have changed.
//!
//! Every accessor either transfers all of its bytes or fails with
//! [`KernelError::BadAddress`]. The whole range is checked with
//! [`MmStruct::access_ok`] before the first byte moves, so a failed `put`
//! leaves user memory untouched.

use crate::{mm_struct::MmStruct, pager::Pager};
use machine::{KernelError, addressing::Va};
use std::{marker::PhantomData, ops::Range};

/// The user addresses `addr..addr + len`, if the machine can represent them.
pub fn user_range(addr: usize, len: usize) -> Option<Range<Va>> {
    Some(Va::new(addr)?..Va::new(addr.checked_add(len)?)?)
}

fn check_range<P: Pager>(
    mm: &MmStruct<P>,
    addr: usize,
    len: usize,
    is_write: bool,
) -> Result<(), KernelError> {
    match user_range(addr, len) {
        Some(range) if mm.access_ok(range.clone(), is_write) => Ok(()),
        _ => Err(KernelError::BadAddress),
    }
}

/// A value that lives in user memory as little-endian bytes.
pub trait UserWord: Copy {
    /// Size of the value in user memory.
    const SIZE: usize;

    /// Decodes the value from `SIZE` little-endian bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Encodes the value into `SIZE` little-endian bytes.
    fn to_le_vec(self) -> Vec<u8>;
}

macro_rules! impl_user_word {
    ($($t:ty),*) => {
        $(
            impl UserWord for $t {
                const SIZE: usize = core::mem::size_of::<$t>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; core::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_le_bytes(raw)
                }

                fn to_le_vec(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_user_word!(i32, u32);

/// A one-time, read-only pointer to a user-space object of type `T`.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserPtrRO<T: UserWord> {
    addr: usize,
    _ty: PhantomData<T>,
}

impl<T: UserWord> UserPtrRO<T> {
    /// Creates a new `UserPtrRO` instance with the given user-space address.
    pub fn new(addr: usize) -> Self {
        Self {
            addr,
            _ty: PhantomData,
        }
    }

    /// Reads a value of type `T` from the user-space address.
    ///
    /// Returns `Ok(T)` if successful, otherwise
    /// `Err(KernelError::BadAddress)`.
    pub fn get<P: Pager>(self, mm: &mut MmStruct<P>) -> Result<T, KernelError> {
        let bytes = UserU8SliceRO::new(self.addr, T::SIZE).get(mm)?;
        Ok(T::from_le_slice(&bytes))
    }
}

/// A one-time, write-only pointer to a user-space object of type `T`.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserPtrWO<T: UserWord> {
    addr: usize,
    _ty: PhantomData<T>,
}

impl<T: UserWord> UserPtrWO<T> {
    /// Creates a new `UserPtrWO` instance with the given user-space address.
    pub fn new(addr: usize) -> Self {
        Self {
            addr,
            _ty: PhantomData,
        }
    }

    /// Writes a value of type `T` to the user-space address.
    ///
    /// Returns `Ok(usize)` indicating the number of bytes written, or
    /// `Err(KernelError::BadAddress)` on failure.
    pub fn put<P: Pager>(self, mm: &mut MmStruct<P>, value: T) -> Result<usize, KernelError> {
        UserU8SliceWO::new(self.addr, T::SIZE).put(mm, &value.to_le_vec())
    }
}

/// A one-time, read-only pointer to a slice of `u8` in user-space.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserU8SliceRO {
    addr: usize,
    len: usize,
}

impl UserU8SliceRO {
    /// Creates a new `UserU8SliceRO` instance with the given user-space address
    /// and length.
    pub fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    /// Reads data from the user-space buffer into a `Vec<u8>`.
    ///
    /// Returns `Ok(Vec<u8>)` containing the data if successful, otherwise
    /// `Err(KernelError::BadAddress)`.
    pub fn get<P: Pager>(self, mm: &mut MmStruct<P>) -> Result<Vec<u8>, KernelError> {
        check_range(mm, self.addr, self.len, false)?;
        let mut buf = vec![0u8; self.len];
        if mm.read_memory(self.addr, &mut buf) == self.len {
            Ok(buf)
        } else {
            Err(KernelError::BadAddress)
        }
    }
}

/// A one-time, write-only pointer to a slice of `u8` in user-space.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserU8SliceWO {
    addr: usize,
    len: usize,
}

impl UserU8SliceWO {
    /// Creates a new `UserU8SliceWO` instance with the given user-space address
    /// and length.
    pub fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    /// Writes data from a slice to the user-space buffer.
    ///
    /// At most `len` bytes of `other` are written. Returns `Ok(usize)`
    /// indicating the number of bytes written, or
    /// `Err(KernelError::BadAddress)` if they could not all be written.
    pub fn put<P: Pager>(self, mm: &mut MmStruct<P>, other: &[u8]) -> Result<usize, KernelError> {
        let size = self.len.min(other.len());
        check_range(mm, self.addr, size, true)?;
        if mm.write_memory(self.addr, &other[..size]) == size {
            Ok(size)
        } else {
            Err(KernelError::BadAddress)
        }
    }
}

/// A one-time pointer to a NUL-terminated string in user-space.
#[derive(PartialEq, PartialOrd, Eq, Ord, Debug)]
pub struct UserCString {
    addr: usize,
}

impl UserCString {
    /// Creates a new `UserCString` instance with the given user-space
    /// address.
    pub fn new(addr: usize) -> Self {
        Self { addr }
    }

    /// Reads the string, which must hold at most `max_len` bytes before its
    /// terminator.
    ///
    /// # Errors
    /// - [`KernelError::NameTooLong`] if no terminator is found within
    ///   `max_len + 1` bytes.
    /// - [`KernelError::BadAddress`] if the string runs into memory the
    ///   process cannot read.
    /// - [`KernelError::InvalidArgument`] if the string is not valid UTF-8.
    pub fn read<P: Pager>(
        self,
        mm: &mut MmStruct<P>,
        max_len: usize,
    ) -> Result<String, KernelError> {
        let mut buf = vec![0u8; max_len + 1];
        let read = mm.read_memory(self.addr, &mut buf);
        match buf[..read].iter().position(|b| *b == 0) {
            Some(len) => {
                buf.truncate(len);
                String::from_utf8(buf).map_err(|_| KernelError::InvalidArgument)
            }
            None if read == buf.len() => Err(KernelError::NameTooLong),
            None => Err(KernelError::BadAddress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{eager_pager::EagerPager, frame_alloc::FrameAllocator, pager::Region};
    use machine::{
        Machine, MachineConfig, addressing::PAGE_SIZE, fs::MemFileSystem,
        processor::ScriptedProcessor,
    };
    use std::sync::Arc;

    fn mm() -> MmStruct<EagerPager> {
        let machine = Machine::new(
            MachineConfig::builder().num_phys_pages(4).build(),
            Arc::new(ScriptedProcessor::new()),
            Arc::new(MemFileSystem::new()),
        );
        let frames = Arc::new(FrameAllocator::new(4));
        let mut mm = MmStruct::new(machine.clone(), EagerPager::new(machine, frames));
        mm.do_map(&[
            Region {
                pages: 1,
                read_only: true,
            },
            Region {
                pages: 1,
                read_only: false,
            },
        ])
        .unwrap();
        mm
    }

    #[test]
    fn words() {
        let mut mm = mm();
        assert_eq!(UserPtrWO::<i32>::new(PAGE_SIZE).put(&mut mm, -42), Ok(4));
        assert_eq!(
            UserU8SliceRO::new(PAGE_SIZE, 4).get(&mut mm),
            Ok((-42i32).to_le_bytes().to_vec()),
            "Words are stored little-endian."
        );
        assert_eq!(UserPtrRO::<i32>::new(PAGE_SIZE).get(&mut mm), Ok(-42));
        assert_eq!(
            UserPtrRO::<u32>::new(2 * PAGE_SIZE - 2).get(&mut mm),
            Err(KernelError::BadAddress)
        );
        assert_eq!(
            UserPtrWO::<u32>::new(8).put(&mut mm, 1),
            Err(KernelError::BadAddress),
            "Writing to a read-only page must fail."
        );
    }

    #[test]
    fn strings() {
        let mut mm = mm();
        UserU8SliceWO::new(PAGE_SIZE, 16)
            .put(&mut mm, b"hello\0world")
            .unwrap();
        assert_eq!(
            UserCString::new(PAGE_SIZE).read(&mut mm, 5),
            Ok("hello".to_string())
        );
        assert_eq!(
            UserCString::new(PAGE_SIZE).read(&mut mm, 4),
            Err(KernelError::NameTooLong)
        );
        assert_eq!(
            UserCString::new(PAGE_SIZE + 6).read(&mut mm, 256),
            Ok("world".to_string())
        );
        assert_eq!(
            UserCString::new(PAGE_SIZE + 12).read(&mut mm, 256),
            Ok(String::new()),
            "The rest of a fresh page is zero-filled."
        );

        UserU8SliceWO::new(2 * PAGE_SIZE - 3, 3)
            .put(&mut mm, b"abc")
            .unwrap();
        assert_eq!(
            UserCString::new(2 * PAGE_SIZE - 3).read(&mut mm, 256),
            Err(KernelError::BadAddress)
        );
    }

    #[test]
    fn failed_puts_leave_memory_untouched() {
        let mut mm = mm();
        let end = 2 * PAGE_SIZE;
        assert_eq!(
            UserU8SliceWO::new(end - 2, 4).put(&mut mm, b"abcd"),
            Err(KernelError::BadAddress)
        );
        assert_eq!(UserU8SliceRO::new(end - 2, 2).get(&mut mm), Ok(vec![0, 0]));
        assert_eq!(
            UserU8SliceWO::new(usize::MAX - 1, 4).put(&mut mm, b"abcd"),
            Err(KernelError::BadAddress)
        );

        assert!(user_range(PAGE_SIZE, 4).is_some());
        assert!(user_range(usize::MAX, 1).is_none());
    }
}
