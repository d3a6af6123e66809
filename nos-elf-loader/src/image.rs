//! Validated view over an ELF64 image
//!
//! [`ElfImage`] borrows the caller's buffer. Every query re-reads fields
//! through the byte accessor; nothing is copied out except the small parsed
//! records handed back to the caller.

use crate::bytes::ByteReader;
use crate::error::LoadError;
use crate::header::ElfHeader;
use crate::layout::LoaderConfig;
use crate::program::ProgramHeaders;
use crate::section::{SectionHeader, SectionHeaders, StringTable, SHN_UNDEF};

/// A validated ELF64 image
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    reader: ByteReader<'a>,
    header: ElfHeader,
}

impl<'a> ElfImage<'a> {
    /// Validate the file header of `data` against `config`.
    pub fn parse(data: &'a [u8], config: &LoaderConfig) -> Result<Self, LoadError> {
        let header = ElfHeader::parse(data, config)?;
        Ok(Self {
            reader: ByteReader::new(data, header.byte_order),
            header,
        })
    }

    /// Get the ELF header
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Accessor over the whole image
    pub fn reader(&self) -> ByteReader<'a> {
        self.reader
    }

    /// Get entry point
    pub fn entry(&self) -> u64 {
        self.header.entry
    }

    /// Iterate over program headers
    pub fn program_headers(&self) -> ProgramHeaders<'a> {
        ProgramHeaders::new(self.reader, self.header)
    }

    /// Iterate over section headers in table order
    pub fn section_headers(&self) -> SectionHeaders<'a> {
        SectionHeaders::new(self.reader, self.header)
    }

    /// Section header at `index`
    pub fn section_header(&self, index: u16) -> Result<SectionHeader, LoadError> {
        if index >= self.header.shnum {
            return Err(LoadError::TruncatedImage);
        }
        SectionHeader::read(&self.reader, self.header.section_header_offset(index))
    }

    /// Contents of `section`
    pub fn section_data(&self, section: &SectionHeader) -> Result<&'a [u8], LoadError> {
        section.data(&self.reader)
    }

    /// The section-name string table, `None` when the image has none.
    pub fn section_names(&self) -> Result<Option<StringTable<'a>>, LoadError> {
        if !self.header.has_section_headers() || self.header.shstrndx == SHN_UNDEF {
            return Ok(None);
        }
        let table = self.section_header(self.header.shstrndx)?;
        StringTable::new(self.reader, &table).map(Some)
    }

    /// Name of `section`, `None` when the image has no section-name table.
    pub fn section_name(&self, section: &SectionHeader) -> Result<Option<&'a [u8]>, LoadError> {
        match self.section_names()? {
            Some(names) => names.get(section.sh_name).map(Some),
            None => Ok(None),
        }
    }

    /// First section (in table order) whose name equals `name` byte for byte
    pub fn section_by_name(&self, name: &str) -> Result<Option<SectionHeader>, LoadError> {
        let Some(names) = self.section_names()? else {
            return Ok(None);
        };

        for section in self.section_headers() {
            let section = section?;
            if names.get(section.sh_name)? == name.as_bytes() {
                return Ok(Some(section));
            }
        }
        Ok(None)
    }
}
