//! Executable images in the COFF format.
//!
//! A user program is stored as a little-endian COFF image:
//!
//! ```text
//! +----------------------+  offset 0
//! | file header          |  magic: u16, nsections: u16, entry: u32
//! +----------------------+  offset 8
//! | section header 0     |  name: [u8; 8], vaddr: u32, size: u32,
//! | ...                  |  offset: u32, kind: u32
//! +----------------------+
//! | section contents     |
//! +----------------------+
//! ```
//!
//! Every section starts on a page boundary of the virtual address space and
//! spans [`CoffSection::num_pages`] pages. `.text` and `.rdata` sections are
//! read-only; `.bss` sections have no contents in the file and are
//! zero-filled when loaded.
//!
//! [`CoffBuilder`] writes images in this format.

use crate::{
    KernelError,
    addressing::{PAGE_MASK, PAGE_SIZE},
    fs::OpenFile,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The magic number of a COFF image for the machine.
pub const COFF_MAGIC: u16 = 0x0162;

const FILE_HEADER_SIZE: usize = 8;
const SECTION_HEADER_SIZE: usize = 24;
const SECTION_NAME_SIZE: usize = 8;

/// The kind of a section, stored in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum SectionKind {
    /// Executable code.
    Text = 0x20,
    /// Initialized, writable data.
    Data = 0x40,
    /// Uninitialized, writable data.
    Bss = 0x80,
    /// Initialized, read-only data.
    RData = 0x100,
}

impl SectionKind {
    /// Returns true if pages of this section must not be written.
    pub fn is_read_only(self) -> bool {
        matches!(self, SectionKind::Text | SectionKind::RData)
    }

    /// Returns true if the section has contents in the file.
    pub fn is_initialized(self) -> bool {
        self != SectionKind::Bss
    }
}

/// Errors raised while parsing a COFF image.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoffError {
    /// The file is shorter than its headers claim.
    #[error("truncated image")]
    Truncated,
    /// The file does not start with [`COFF_MAGIC`].
    #[error("bad magic {0:#06x}")]
    BadMagic(u16),
    /// A section header has an unknown kind.
    #[error("section {0}: unknown kind {1:#x}")]
    UnknownSectionKind(String, u32),
    /// A section does not start on a page boundary.
    #[error("section {0}: not page aligned")]
    Unaligned(String),
    /// The file could not be read.
    #[error("read failed: {0}")]
    Io(#[from] KernelError),
}

/// A section of a COFF image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffSection {
    name: String,
    vaddr: u32,
    size: u32,
    offset: u32,
    kind: SectionKind,
}

impl CoffSection {
    /// The name of the section (e.g. `.text`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind of the section.
    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// The virtual page the section starts at.
    pub fn first_vpn(&self) -> usize {
        self.vaddr as usize / PAGE_SIZE
    }

    /// The number of pages the section spans.
    pub fn num_pages(&self) -> usize {
        (self.size as usize).div_ceil(PAGE_SIZE)
    }

    /// Returns true if pages of this section must not be written.
    pub fn is_read_only(&self) -> bool {
        self.kind.is_read_only()
    }
}

/// A parsed COFF image.
pub struct Coff {
    file: Option<Box<dyn OpenFile>>,
    entry: u32,
    sections: Vec<CoffSection>,
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_exact_at(
    file: &mut dyn OpenFile,
    position: usize,
    buf: &mut [u8],
) -> Result<(), CoffError> {
    if file.read_at(position, buf)? == buf.len() {
        Ok(())
    } else {
        Err(CoffError::Truncated)
    }
}

impl Coff {
    /// Parses the headers of the image stored in `file`.
    ///
    /// The image keeps `file` open until [`Coff::close`], so that pages can
    /// be loaded lazily with [`Coff::load_page`]. If the headers cannot be
    /// parsed, `file` is closed before the error is returned.
    pub fn load(mut file: Box<dyn OpenFile>) -> Result<Self, CoffError> {
        match Self::parse(file.as_mut()) {
            Ok((entry, sections)) => Ok(Self {
                file: Some(file),
                entry,
                sections,
            }),
            Err(e) => {
                file.close();
                Err(e)
            }
        }
    }

    fn parse(file: &mut dyn OpenFile) -> Result<(u32, Vec<CoffSection>), CoffError> {
        let mut header = [0u8; FILE_HEADER_SIZE];
        read_exact_at(file, 0, &mut header)?;
        let magic = u16_at(&header, 0);
        if magic != COFF_MAGIC {
            return Err(CoffError::BadMagic(magic));
        }
        let nsections = u16_at(&header, 2) as usize;
        let entry = u32_at(&header, 4);

        let mut table = vec![0u8; nsections * SECTION_HEADER_SIZE];
        read_exact_at(file, FILE_HEADER_SIZE, &mut table)?;
        let length = file.length();
        let sections = table
            .chunks_exact(SECTION_HEADER_SIZE)
            .map(|raw| {
                let name_len = raw[..SECTION_NAME_SIZE]
                    .iter()
                    .position(|b| *b == 0)
                    .unwrap_or(SECTION_NAME_SIZE);
                let name = String::from_utf8_lossy(&raw[..name_len]).into_owned();
                let raw_kind = u32_at(raw, 20);
                let kind = SectionKind::try_from(raw_kind)
                    .map_err(|_| CoffError::UnknownSectionKind(name.clone(), raw_kind))?;
                let section = CoffSection {
                    vaddr: u32_at(raw, 8),
                    size: u32_at(raw, 12),
                    offset: u32_at(raw, 16),
                    kind,
                    name,
                };
                if section.vaddr as usize & PAGE_MASK != 0 {
                    return Err(CoffError::Unaligned(section.name));
                }
                if kind.is_initialized()
                    && section.offset as usize + section.size as usize > length
                {
                    return Err(CoffError::Truncated);
                }
                log::debug!(
                    "coff {}: section {} at {:#x}, {} pages",
                    file.name(),
                    section.name,
                    section.vaddr,
                    section.num_pages()
                );
                Ok(section)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((entry, sections))
    }

    /// The address of the first instruction.
    pub fn entry_point(&self) -> u32 {
        self.entry
    }

    /// The number of sections of the image.
    pub fn num_sections(&self) -> usize {
        self.sections.len()
    }

    /// The sections of the image, in header order.
    pub fn sections(&self) -> &[CoffSection] {
        &self.sections
    }

    /// Loads page `spn` of section `section` into `frame`.
    ///
    /// The part of the page not covered by the section's contents is
    /// zero-filled.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] if the page does not belong to the
    ///   section.
    /// - [`KernelError::BadFileDescriptor`] if the image is closed.
    /// - [`KernelError::IOError`] if the file is shorter than expected.
    pub fn load_page(
        &mut self,
        section: usize,
        spn: usize,
        frame: &mut [u8],
    ) -> Result<(), KernelError> {
        let section = self
            .sections
            .get(section)
            .filter(|s| spn < s.num_pages())
            .ok_or(KernelError::InvalidArgument)?;
        let file = self.file.as_mut().ok_or(KernelError::BadFileDescriptor)?;
        let frame = &mut frame[..PAGE_SIZE];

        let start = spn * PAGE_SIZE;
        let filled = if section.kind.is_initialized() {
            let size = (section.size as usize - start).min(PAGE_SIZE);
            if file.read_at(section.offset as usize + start, &mut frame[..size])? != size {
                return Err(KernelError::IOError);
            }
            size
        } else {
            0
        };
        frame[filled..].fill(0);
        Ok(())
    }

    /// Closes the underlying file.
    pub fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            file.close();
        }
    }
}

struct PendingSection {
    name: String,
    kind: SectionKind,
    vaddr: u32,
    size: u32,
    data: Vec<u8>,
}

/// Writes COFF images.
///
/// Sections are placed in the order they are added. Unless an explicit
/// address is given with [`CoffBuilder::section_at`], a section starts at
/// the first page after the previous one.
///
/// ```
/// use machine::coff::{CoffBuilder, SectionKind};
///
/// let image = CoffBuilder::new(0x10)
///     .section(".text", SectionKind::Text, vec![0; 100])
///     .bss(".bss", 0x2000)
///     .build();
/// assert_eq!(&image[..2], &[0x62, 0x01]);
/// ```
pub struct CoffBuilder {
    entry: u32,
    next_vaddr: u32,
    sections: Vec<PendingSection>,
}

impl CoffBuilder {
    /// Starts an image whose program starts at `entry`.
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            next_vaddr: 0,
            sections: Vec::new(),
        }
    }

    /// Appends an initialized section after the previous one.
    pub fn section(self, name: &str, kind: SectionKind, data: impl Into<Vec<u8>>) -> Self {
        let vaddr = self.next_vaddr;
        self.section_at(name, kind, vaddr, data)
    }

    /// Appends an uninitialized section of `size` bytes after the previous
    /// one.
    pub fn bss(mut self, name: &str, size: u32) -> Self {
        let vaddr = self.next_vaddr;
        self.push(name, SectionKind::Bss, vaddr, size, Vec::new());
        self
    }

    /// Appends an initialized section at `vaddr`.
    pub fn section_at(
        mut self,
        name: &str,
        kind: SectionKind,
        vaddr: u32,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        let data = data.into();
        let size = data.len() as u32;
        let data = if kind.is_initialized() { data } else { Vec::new() };
        self.push(name, kind, vaddr, size, data);
        self
    }

    fn push(&mut self, name: &str, kind: SectionKind, vaddr: u32, size: u32, data: Vec<u8>) {
        self.next_vaddr = (vaddr + size).next_multiple_of(PAGE_SIZE as u32);
        self.sections.push(PendingSection {
            name: name.to_string(),
            kind,
            vaddr,
            size,
            data,
        });
    }

    /// Serializes the image.
    pub fn build(self) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(&COFF_MAGIC.to_le_bytes());
        image.extend_from_slice(&(self.sections.len() as u16).to_le_bytes());
        image.extend_from_slice(&self.entry.to_le_bytes());

        let mut offset = FILE_HEADER_SIZE + self.sections.len() * SECTION_HEADER_SIZE;
        for section in &self.sections {
            let mut name = [0u8; SECTION_NAME_SIZE];
            let len = section.name.len().min(SECTION_NAME_SIZE);
            name[..len].copy_from_slice(&section.name.as_bytes()[..len]);
            image.extend_from_slice(&name);
            image.extend_from_slice(&section.vaddr.to_le_bytes());
            image.extend_from_slice(&section.size.to_le_bytes());
            image.extend_from_slice(&(offset as u32).to_le_bytes());
            image.extend_from_slice(&u32::from(section.kind).to_le_bytes());
            offset += section.data.len();
        }
        for section in self.sections {
            image.extend_from_slice(&section.data);
        }
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, MemFileSystem};

    fn open(image: Vec<u8>) -> Box<dyn OpenFile> {
        let fs = MemFileSystem::new();
        fs.insert("prog", image);
        fs.open("prog", false).unwrap()
    }

    #[test]
    fn parse_layout() {
        let image = CoffBuilder::new(0x40)
            .section(".text", SectionKind::Text, vec![0xaa; PAGE_SIZE + 1])
            .section(".data", SectionKind::Data, vec![0xbb; 16])
            .bss(".bss", 1)
            .build();
        let coff = Coff::load(open(image)).expect("parse failed");
        assert_eq!(coff.entry_point(), 0x40);
        assert_eq!(coff.num_sections(), 3);

        let layout: Vec<_> = coff
            .sections()
            .iter()
            .map(|s| (s.name().to_string(), s.first_vpn(), s.num_pages(), s.is_read_only()))
            .collect();
        assert_eq!(
            layout,
            vec![
                (".text".to_string(), 0, 2, true),
                (".data".to_string(), 2, 1, false),
                (".bss".to_string(), 3, 1, false),
            ]
        );
    }

    #[test]
    fn load_pages_zero_fill() {
        let image = CoffBuilder::new(0)
            .section(".text", SectionKind::Text, vec![0xaa; PAGE_SIZE + 1])
            .bss(".bss", 10)
            .build();
        let mut coff = Coff::load(open(image)).unwrap();
        let mut frame = vec![0xffu8; PAGE_SIZE];

        coff.load_page(0, 1, &mut frame).unwrap();
        assert_eq!(frame[0], 0xaa);
        assert!(frame[1..].iter().all(|b| *b == 0), "Tail of the page must be zeroed.");

        frame.fill(0xff);
        coff.load_page(1, 0, &mut frame).unwrap();
        assert!(frame.iter().all(|b| *b == 0), "bss must be zeroed.");

        assert_eq!(coff.load_page(0, 2, &mut frame), Err(KernelError::InvalidArgument));
        coff.close();
        assert_eq!(coff.load_page(0, 0, &mut frame), Err(KernelError::BadFileDescriptor));
    }

    #[test]
    fn malformed() {
        assert_eq!(Coff::load(open(vec![1, 2, 3])).err(), Some(CoffError::Truncated));
        assert_eq!(
            Coff::load(open(vec![0x7f, b'E', b'L', b'F', 0, 0, 0, 0])).err(),
            Some(CoffError::BadMagic(0x457f))
        );
        let unaligned = CoffBuilder::new(0)
            .section_at(".text", SectionKind::Text, 0x10, vec![0; 4])
            .build();
        assert_eq!(
            Coff::load(open(unaligned)).err(),
            Some(CoffError::Unaligned(".text".to_string()))
        );

        let mut truncated = CoffBuilder::new(0)
            .section(".text", SectionKind::Text, vec![0; 64])
            .build();
        truncated.truncate(truncated.len() - 1);
        assert_eq!(Coff::load(open(truncated)).err(), Some(CoffError::Truncated));
    }

    #[test]
    fn close_on_parse_error() {
        let fs = MemFileSystem::new();
        fs.insert("garbage", b"not an executable".to_vec());
        fs.insert("prog", CoffBuilder::new(0).bss(".bss", 1).build());

        let file = fs.open("garbage", false).unwrap();
        assert!(Coff::load(file).is_err());
        assert_eq!(fs.open_handles(), 0, "A rejected image must be closed.");

        let mut coff = Coff::load(fs.open("prog", false).unwrap()).unwrap();
        assert_eq!(fs.open_handles(), 1);
        coff.close();
        assert_eq!(fs.open_handles(), 0);
    }
}
