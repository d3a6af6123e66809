// ELF64 program headers
// Segment records and permission decoding

use static_assertions::const_assert_eq;

use crate::address_space::{Permissions, VirtAddr, VirtRange};
use crate::bytes::ByteReader;
use crate::error::LoadError;
use crate::header::ElfHeader;

/// Program header types
pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_PHDR: u32 = 6;
pub const PT_TLS: u32 = 7;
pub const PT_GNU_STACK: u32 = 0x6474_e551;

/// Program header flags
pub const PF_X: u32 = 1;       // Executable
pub const PF_W: u32 = 2;       // Writable
pub const PF_R: u32 = 4;       // Readable

/// Size of one ELF64 program header record
pub const PHDR_SIZE: u64 = 56;

mod offset {
    pub const TYPE: u64 = 0;
    pub const FLAGS: u64 = 4;
    pub const OFFSET: u64 = 8;
    pub const VADDR: u64 = 16;
    pub const PADDR: u64 = 24;
    pub const FILESZ: u64 = 32;
    pub const MEMSZ: u64 = 40;
    pub const ALIGN: u64 = 48;
}

const_assert_eq!(offset::ALIGN + 8, PHDR_SIZE);

/// ELF64 Program Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment file offset
    pub p_offset: u64,
    /// Segment virtual address
    pub p_vaddr: u64,
    /// Segment physical address (unused)
    pub p_paddr: u64,
    /// Segment size in file
    pub p_filesz: u64,
    /// Segment size in memory
    pub p_memsz: u64,
    /// Segment alignment
    pub p_align: u64,
}

impl ProgramHeader {
    /// Read the record at file offset `at`.
    pub fn read(reader: &ByteReader<'_>, at: u64) -> Result<Self, LoadError> {
        let field = |rel: u64| at.checked_add(rel).ok_or(LoadError::TruncatedImage);
        Ok(Self {
            p_type: reader.read_u32(field(offset::TYPE)?)?,
            p_flags: reader.read_u32(field(offset::FLAGS)?)?,
            p_offset: reader.read_u64(field(offset::OFFSET)?)?,
            p_vaddr: reader.read_u64(field(offset::VADDR)?)?,
            p_paddr: reader.read_u64(field(offset::PADDR)?)?,
            p_filesz: reader.read_u64(field(offset::FILESZ)?)?,
            p_memsz: reader.read_u64(field(offset::MEMSZ)?)?,
            p_align: reader.read_u64(field(offset::ALIGN)?)?,
        })
    }

    /// Is this a loadable segment?
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    /// Is this segment readable?
    pub fn is_readable(&self) -> bool {
        (self.p_flags & PF_R) != 0
    }

    /// Is this segment writable?
    pub fn is_writable(&self) -> bool {
        (self.p_flags & PF_W) != 0
    }

    /// Is this segment executable?
    pub fn is_executable(&self) -> bool {
        (self.p_flags & PF_X) != 0
    }

    /// Mapping permissions requested by the segment flags
    pub fn permissions(&self) -> Permissions {
        let mut perms = Permissions::empty();
        perms.set(Permissions::READ, self.is_readable());
        perms.set(Permissions::WRITE, self.is_writable());
        perms.set(Permissions::EXECUTE, self.is_executable());
        perms
    }

    /// In-memory range `[vaddr, vaddr + memsz)`, `None` on overflow
    pub fn memory_range(&self) -> Option<VirtRange> {
        VirtRange::from_len(VirtAddr(self.p_vaddr), self.p_memsz)
    }

    /// Check the per-segment format rules: memsz covers filesz, alignment is
    /// a power of two, and vaddr agrees with offset modulo the alignment.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.p_memsz < self.p_filesz {
            return Err(LoadError::InvalidSegment);
        }

        // 0 and 1 both mean no alignment constraint
        if self.p_align > 1 {
            if !self.p_align.is_power_of_two() {
                return Err(LoadError::InvalidSegment);
            }
            if self.p_vaddr % self.p_align != self.p_offset % self.p_align {
                return Err(LoadError::InvalidSegment);
            }
        }

        if self.memory_range().is_none() {
            return Err(LoadError::InvalidSegment);
        }
        Ok(())
    }
}

/// Iterator over the program header table of an image
pub struct ProgramHeaders<'a> {
    reader: ByteReader<'a>,
    header: ElfHeader,
    current: u16,
}

impl<'a> ProgramHeaders<'a> {
    pub(crate) fn new(reader: ByteReader<'a>, header: ElfHeader) -> Self {
        Self { reader, header, current: 0 }
    }
}

impl Iterator for ProgramHeaders<'_> {
    type Item = Result<ProgramHeader, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.header.phnum {
            return None;
        }

        let offset = self.header.program_header_offset(self.current);
        self.current += 1;

        Some(ProgramHeader::read(&self.reader, offset))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::from(self.header.phnum - self.current);
        (left, Some(left))
    }
}
