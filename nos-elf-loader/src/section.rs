// ELF64 section headers
// Section records, string tables and name lookup

use static_assertions::const_assert_eq;

use crate::bytes::ByteReader;
use crate::error::LoadError;
use crate::header::ElfHeader;

/// ELF Section Header Types
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOTE: u32 = 7;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;

/// ELF Section Header Flags
pub const SHF_WRITE: u64 = 0x1;
pub const SHF_ALLOC: u64 = 0x2;
pub const SHF_EXECINSTR: u64 = 0x4;

/// Undefined section index
pub const SHN_UNDEF: u16 = 0;

/// Size of one ELF64 section header record
pub const SHDR_SIZE: u64 = 64;

mod offset {
    pub const NAME: u64 = 0;
    pub const TYPE: u64 = 4;
    pub const FLAGS: u64 = 8;
    pub const ADDR: u64 = 16;
    pub const OFFSET: u64 = 24;
    pub const SIZE: u64 = 32;
    pub const LINK: u64 = 40;
    pub const INFO: u64 = 44;
    pub const ADDRALIGN: u64 = 48;
    pub const ENTSIZE: u64 = 56;
}

const_assert_eq!(offset::ENTSIZE + 8, SHDR_SIZE);

/// ELF64 Section Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section name (string table offset)
    pub sh_name: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub sh_flags: u64,
    /// Section virtual address
    pub sh_addr: u64,
    /// Section file offset
    pub sh_offset: u64,
    /// Section size
    pub sh_size: u64,
    /// Link to another section
    pub sh_link: u32,
    /// Additional section info
    pub sh_info: u32,
    /// Section alignment
    pub sh_addralign: u64,
    /// Entry size for fixed-size entries
    pub sh_entsize: u64,
}

impl SectionHeader {
    /// Read the record at file offset `at`.
    pub fn read(reader: &ByteReader<'_>, at: u64) -> Result<Self, LoadError> {
        let field = |rel: u64| at.checked_add(rel).ok_or(LoadError::TruncatedImage);
        Ok(Self {
            sh_name: reader.read_u32(field(offset::NAME)?)?,
            sh_type: reader.read_u32(field(offset::TYPE)?)?,
            sh_flags: reader.read_u64(field(offset::FLAGS)?)?,
            sh_addr: reader.read_u64(field(offset::ADDR)?)?,
            sh_offset: reader.read_u64(field(offset::OFFSET)?)?,
            sh_size: reader.read_u64(field(offset::SIZE)?)?,
            sh_link: reader.read_u32(field(offset::LINK)?)?,
            sh_info: reader.read_u32(field(offset::INFO)?)?,
            sh_addralign: reader.read_u64(field(offset::ADDRALIGN)?)?,
            sh_entsize: reader.read_u64(field(offset::ENTSIZE)?)?,
        })
    }

    /// Whether the section occupies no bytes in the file
    pub fn is_nobits(&self) -> bool {
        self.sh_type == SHT_NOBITS
    }

    /// File contents of the section; empty for `SHT_NOBITS`.
    pub fn data<'a>(&self, reader: &ByteReader<'a>) -> Result<&'a [u8], LoadError> {
        if self.is_nobits() {
            return Ok(&[]);
        }
        Ok(reader.bytes(self.sh_offset, self.sh_size)?)
    }
}

/// Iterator over the section header table of an image
pub struct SectionHeaders<'a> {
    reader: ByteReader<'a>,
    header: ElfHeader,
    current: u16,
}

impl<'a> SectionHeaders<'a> {
    pub(crate) fn new(reader: ByteReader<'a>, header: ElfHeader) -> Self {
        Self { reader, header, current: 0 }
    }
}

impl Iterator for SectionHeaders<'_> {
    type Item = Result<SectionHeader, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.header.shnum {
            return None;
        }

        let offset = self.header.section_header_offset(self.current);
        self.current += 1;

        Some(SectionHeader::read(&self.reader, offset))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::from(self.header.shnum - self.current);
        (left, Some(left))
    }
}

/// A string table section: NUL-terminated names addressed by byte offset
#[derive(Debug, Clone, Copy)]
pub struct StringTable<'a> {
    reader: ByteReader<'a>,
    start: u64,
    end: u64,
}

impl<'a> StringTable<'a> {
    /// Wrap the contents of `section`, which must lie inside the image.
    pub fn new(reader: ByteReader<'a>, section: &SectionHeader) -> Result<Self, LoadError> {
        if section.is_nobits() || !reader.contains(section.sh_offset, section.sh_size) {
            return Err(LoadError::TruncatedImage);
        }
        Ok(Self {
            reader,
            start: section.sh_offset,
            end: section.sh_offset + section.sh_size,
        })
    }

    /// Name at byte offset `name` within the table, without its terminator.
    pub fn get(&self, name: u32) -> Result<&'a [u8], LoadError> {
        let at = self.start + u64::from(name);
        if at >= self.end {
            return Err(LoadError::TruncatedImage);
        }
        Ok(self.reader.c_str(at, self.end)?)
    }
}
