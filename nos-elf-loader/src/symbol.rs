// ELF64 symbol table lookup
// `.symtab` entries by name or by containing address, for debugging and
// symbolization. Not part of the load sequence.

use static_assertions::const_assert_eq;

use crate::bytes::ByteReader;
use crate::error::LoadError;
use crate::image::ElfImage;
use crate::section::{SectionHeader, StringTable, SHN_UNDEF, SHT_SYMTAB};

/// Symbol types
pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;
pub const STT_SECTION: u8 = 3;
pub const STT_FILE: u8 = 4;

/// Symbol bindings
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

/// Size of one ELF64 symbol record
pub const SYM_SIZE: u64 = 24;

mod offset {
    pub const NAME: u64 = 0;
    pub const INFO: u64 = 4;
    pub const OTHER: u64 = 5;
    pub const SHNDX: u64 = 6;
    pub const VALUE: u64 = 8;
    pub const SIZE: u64 = 16;
}

const_assert_eq!(offset::SIZE + 8, SYM_SIZE);

/// ELF64 symbol table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    /// Symbol name (string table offset)
    pub st_name: u32,
    /// Type and binding
    pub st_info: u8,
    /// Visibility
    pub st_other: u8,
    /// Index of the section the symbol is defined in
    pub st_shndx: u16,
    /// Symbol value (an address for defined symbols in executables)
    pub st_value: u64,
    /// Size of the object or function
    pub st_size: u64,
}

impl Symbol {
    /// Read the record at file offset `at`.
    pub fn read(reader: &ByteReader<'_>, at: u64) -> Result<Self, LoadError> {
        let field = |rel: u64| at.checked_add(rel).ok_or(LoadError::TruncatedImage);
        Ok(Self {
            st_name: reader.read_u32(field(offset::NAME)?)?,
            st_info: reader.read_u8(field(offset::INFO)?)?,
            st_other: reader.read_u8(field(offset::OTHER)?)?,
            st_shndx: reader.read_u16(field(offset::SHNDX)?)?,
            st_value: reader.read_u64(field(offset::VALUE)?)?,
            st_size: reader.read_u64(field(offset::SIZE)?)?,
        })
    }

    /// `STT_*` type
    pub fn kind(&self) -> u8 {
        self.st_info & 0xf
    }

    /// `STB_*` binding
    pub fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    /// Whether the symbol is defined in some section of this image
    pub fn is_defined(&self) -> bool {
        self.st_shndx != SHN_UNDEF
    }

    /// Whether `addr` falls inside the object or function
    pub fn contains(&self, addr: u64) -> bool {
        if self.st_size == 0 {
            return addr == self.st_value;
        }
        addr >= self.st_value && addr - self.st_value < self.st_size
    }
}

/// A symbol table section with its linked string table
#[derive(Debug, Clone, Copy)]
pub struct SymbolTable<'a> {
    reader: ByteReader<'a>,
    offset: u64,
    count: u64,
    entsize: u64,
    strings: StringTable<'a>,
}

impl<'a> SymbolTable<'a> {
    fn new(image: &ElfImage<'a>, section: &SectionHeader) -> Result<Self, LoadError> {
        let reader = image.reader();
        let entsize = if section.sh_entsize == 0 { SYM_SIZE } else { section.sh_entsize };
        if entsize < SYM_SIZE || !reader.contains(section.sh_offset, section.sh_size) {
            return Err(LoadError::TruncatedImage);
        }

        let link = u16::try_from(section.sh_link).map_err(|_| LoadError::TruncatedImage)?;
        let strings = StringTable::new(reader, &image.section_header(link)?)?;

        Ok(Self {
            reader,
            offset: section.sh_offset,
            count: section.sh_size / entsize,
            entsize,
            strings,
        })
    }

    /// Number of entries, including the reserved null symbol
    pub fn len(&self) -> u64 {
        self.count
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate over all entries in table order
    pub fn iter(&self) -> impl Iterator<Item = Result<Symbol, LoadError>> + 'a {
        let Self { reader, offset, entsize, .. } = *self;
        (0..self.count).map(move |i| Symbol::read(&reader, offset + i * entsize))
    }

    /// Name of `symbol`
    pub fn name(&self, symbol: &Symbol) -> Result<&'a [u8], LoadError> {
        self.strings.get(symbol.st_name)
    }

    /// First defined symbol named `name`
    pub fn by_name(&self, name: &str) -> Result<Option<Symbol>, LoadError> {
        for symbol in self.iter() {
            let symbol = symbol?;
            if symbol.is_defined() && self.name(&symbol)? == name.as_bytes() {
                return Ok(Some(symbol));
            }
        }
        Ok(None)
    }

    /// First defined function or object symbol covering `addr`
    pub fn containing(&self, addr: u64) -> Result<Option<Symbol>, LoadError> {
        for symbol in self.iter() {
            let symbol = symbol?;
            let kind = symbol.kind();
            if symbol.is_defined()
                && (kind == STT_FUNC || kind == STT_OBJECT)
                && symbol.contains(addr)
            {
                return Ok(Some(symbol));
            }
        }
        Ok(None)
    }
}

impl<'a> ElfImage<'a> {
    /// The first `SHT_SYMTAB` section, `None` for stripped images.
    pub fn symbol_table(&self) -> Result<Option<SymbolTable<'a>>, LoadError> {
        for section in self.section_headers() {
            let section = section?;
            if section.sh_type == SHT_SYMTAB {
                return SymbolTable::new(self, &section).map(Some);
            }
        }
        Ok(None)
    }

    /// Defined symbol named `name`
    pub fn symbol_by_name(&self, name: &str) -> Result<Option<Symbol>, LoadError> {
        match self.symbol_table()? {
            Some(table) => table.by_name(name),
            None => Ok(None),
        }
    }

    /// Function or object symbol covering `addr`
    pub fn symbol_containing(&self, addr: u64) -> Result<Option<Symbol>, LoadError> {
        match self.symbol_table()? {
            Some(table) => table.containing(addr),
            None => Ok(None),
        }
    }
}
