// ELF64 file header
// Field offsets and validation against the kernel target

use static_assertions::const_assert_eq;

use crate::bytes::{ByteOrder, ByteReader};
use crate::error::LoadError;
use crate::layout::LoaderConfig;
use crate::program::PHDR_SIZE;
use crate::section::SHDR_SIZE;

// ============================================================================
// ELF Constants
// ============================================================================

/// ELF Magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF Class
pub const ELFCLASS32: u8 = 1;
pub const ELFCLASS64: u8 = 2;

/// Current ident/file version
pub const EV_CURRENT: u8 = 1;

/// ELF Type
pub const ET_NONE: u16 = 0;
pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;    // Executable
pub const ET_DYN: u16 = 3;     // Shared object (PIE)

/// ELF Machine
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

/// Size of the ELF64 file header
pub const EHDR_SIZE: u64 = 64;

// ============================================================================
// Field offsets
// ============================================================================

mod offset {
    pub const CLASS: u64 = 4;
    pub const DATA: u64 = 5;
    pub const IDENT_VERSION: u64 = 6;
    pub const OSABI: u64 = 7;
    pub const ABI_VERSION: u64 = 8;
    pub const TYPE: u64 = 16;
    pub const MACHINE: u64 = 18;
    pub const VERSION: u64 = 20;
    pub const ENTRY: u64 = 24;
    pub const PHOFF: u64 = 32;
    pub const SHOFF: u64 = 40;
    pub const FLAGS: u64 = 48;
    pub const EHSIZE: u64 = 52;
    pub const PHENTSIZE: u64 = 54;
    pub const PHNUM: u64 = 56;
    pub const SHENTSIZE: u64 = 58;
    pub const SHNUM: u64 = 60;
    pub const SHSTRNDX: u64 = 62;
}

const_assert_eq!(offset::SHSTRNDX + 2, EHDR_SIZE);

// ============================================================================
// ELF Header
// ============================================================================

/// Parsed ELF64 file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfHeader {
    /// `EI_CLASS`
    pub class: u8,
    /// `EI_DATA`, already decoded
    pub byte_order: ByteOrder,
    /// `EI_VERSION`
    pub ident_version: u8,
    /// `EI_OSABI`
    pub os_abi: u8,
    /// `EI_ABIVERSION`
    pub abi_version: u8,
    /// Object file type
    pub kind: u16,
    /// Target machine
    pub machine: u16,
    /// Object file version
    pub version: u32,
    /// Entry point virtual address
    pub entry: u64,
    /// Program header table file offset
    pub phoff: u64,
    /// Section header table file offset
    pub shoff: u64,
    /// Processor-specific flags
    pub flags: u32,
    /// ELF header size
    pub ehsize: u16,
    /// Program header table entry size
    pub phentsize: u16,
    /// Program header table entry count
    pub phnum: u16,
    /// Section header table entry size
    pub shentsize: u16,
    /// Section header table entry count
    pub shnum: u16,
    /// Section name string table index
    pub shstrndx: u16,
}

impl ElfHeader {
    /// Parse and validate the file header of `data` against `config`.
    ///
    /// Checks run in a fixed order: magic, class, byte order, machine, image
    /// type, then the bounds of the header itself and of both header tables.
    pub fn parse(data: &[u8], config: &LoaderConfig) -> Result<Self, LoadError> {
        if data.get(..ELF_MAGIC.len()) != Some(&ELF_MAGIC[..]) {
            return Err(LoadError::BadMagic);
        }

        // Single bytes decode the same in either order
        let ident = ByteReader::new(data, ByteOrder::Little);
        if ident.read_u8(offset::CLASS)? != ELFCLASS64 {
            return Err(LoadError::UnsupportedArch);
        }

        let byte_order = ByteOrder::from_ident(ident.read_u8(offset::DATA)?)
            .filter(|order| *order == config.byte_order)
            .ok_or(LoadError::UnsupportedByteOrder)?;

        let reader = ByteReader::new(data, byte_order);
        let machine = reader.read_u16(offset::MACHINE)?;
        if machine != config.machine {
            return Err(LoadError::UnsupportedMachine);
        }

        let kind = reader.read_u16(offset::TYPE)?;
        if kind != ET_EXEC {
            return Err(LoadError::UnsupportedImageType);
        }

        let header = Self {
            class: ELFCLASS64,
            byte_order,
            ident_version: reader.read_u8(offset::IDENT_VERSION)?,
            os_abi: reader.read_u8(offset::OSABI)?,
            abi_version: reader.read_u8(offset::ABI_VERSION)?,
            kind,
            machine,
            version: reader.read_u32(offset::VERSION)?,
            entry: reader.read_u64(offset::ENTRY)?,
            phoff: reader.read_u64(offset::PHOFF)?,
            shoff: reader.read_u64(offset::SHOFF)?,
            flags: reader.read_u32(offset::FLAGS)?,
            ehsize: reader.read_u16(offset::EHSIZE)?,
            phentsize: reader.read_u16(offset::PHENTSIZE)?,
            phnum: reader.read_u16(offset::PHNUM)?,
            shentsize: reader.read_u16(offset::SHENTSIZE)?,
            shnum: reader.read_u16(offset::SHNUM)?,
            shstrndx: reader.read_u16(offset::SHSTRNDX)?,
        };

        Self::check_table(&reader, header.phoff, header.phnum, header.phentsize, PHDR_SIZE)?;
        Self::check_table(&reader, header.shoff, header.shnum, header.shentsize, SHDR_SIZE)?;

        Ok(header)
    }

    /// Validate that `count` entries of `entsize` bytes at `offset` fit the
    /// buffer and that each entry can hold a `record_size` record.
    fn check_table(
        reader: &ByteReader<'_>,
        offset: u64,
        count: u16,
        entsize: u16,
        record_size: u64,
    ) -> Result<(), LoadError> {
        if count == 0 {
            return Ok(());
        }
        if u64::from(entsize) < record_size {
            return Err(LoadError::TruncatedImage);
        }

        let table_len = u64::from(count) * u64::from(entsize);
        if !reader.contains(offset, table_len) {
            return Err(LoadError::TruncatedImage);
        }
        Ok(())
    }

    /// Whether the image has a section header table
    pub fn has_section_headers(&self) -> bool {
        self.shnum > 0
    }

    /// File offset of program header `index`
    pub fn program_header_offset(&self, index: u16) -> u64 {
        self.phoff + u64::from(index) * u64::from(self.phentsize)
    }

    /// File offset of section header `index`
    pub fn section_header_offset(&self, index: u16) -> u64 {
        self.shoff + u64::from(index) * u64::from(self.shentsize)
    }
}
