//! Common test utilities
//!
//! An in-memory address space and an ELF64 image builder shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use nos_elf_loader::header::{ELF_MAGIC, ELFCLASS64, ET_EXEC, EV_CURRENT};
use nos_elf_loader::program::{PF_R, PF_W, PF_X, PT_LOAD};
use nos_elf_loader::section::{SHT_STRTAB, SHT_SYMTAB};
use nos_elf_loader::symbol::{STB_GLOBAL, STT_FUNC, STT_OBJECT};
use nos_elf_loader::{AddressSpace, ByteOrder, LoaderConfig, MapError, Permissions, VirtAddr, VirtRange};

/// Byte newly mapped frames are filled with, standing in for stale memory
pub const STALE: u8 = 0xCC;

/// One mapped page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Permissions of the page
    pub permissions: Permissions,
    /// Page contents
    pub bytes: Vec<u8>,
}

/// Page-granular address space backed by host memory
#[derive(Debug, Clone)]
pub struct InMemorySpace {
    page_size: u64,
    pages: BTreeMap<u64, Page>,
    map_calls: usize,
    fail_map_at: Option<usize>,
}

impl InMemorySpace {
    /// Create an empty space with 4KB pages
    pub fn new() -> Self {
        Self {
            page_size: nos_elf_loader::PAGE_SIZE,
            pages: BTreeMap::new(),
            map_calls: 0,
            fail_map_at: None,
        }
    }

    /// Make the `n`th `map` request (0-based) fail with `OutOfMemory`
    pub fn fail_map_at(mut self, n: usize) -> Self {
        self.fail_map_at = Some(n);
        self
    }

    /// Mapped pages by base address
    pub fn pages(&self) -> &BTreeMap<u64, Page> {
        &self.pages
    }

    /// Number of `map` requests seen so far
    pub fn map_calls(&self) -> usize {
        self.map_calls
    }

    /// Permissions of the page holding `vaddr`
    pub fn permissions_at(&self, vaddr: u64) -> Option<Permissions> {
        self.pages.get(&(vaddr & !(self.page_size - 1))).map(|page| page.permissions)
    }

    /// Copy `len` bytes out of the space, `None` if any byte is unmapped
    pub fn read(&self, vaddr: u64, len: u64) -> Option<Vec<u8>> {
        (vaddr..vaddr + len)
            .map(|addr| {
                let base = addr & !(self.page_size - 1);
                self.pages.get(&base).map(|page| page.bytes[(addr - base) as usize])
            })
            .collect()
    }

    fn page_bases(&self, range: &VirtRange) -> Result<Vec<u64>, MapError> {
        let (start, end) = (range.start.as_u64(), range.end.as_u64());
        if start % self.page_size != 0 || end % self.page_size != 0 || start >= end {
            return Err(MapError::InvalidRange);
        }
        Ok((start..end).step_by(self.page_size as usize).collect())
    }

    fn bytes_mut(&mut self, vaddr: VirtAddr, len: u64) -> Result<Vec<&mut u8>, MapError> {
        let start = vaddr.as_u64();
        let end = start.checked_add(len).ok_or(MapError::InvalidRange)?;
        let first = start & !(self.page_size - 1);
        if (first..end).step_by(self.page_size as usize).any(|base| !self.pages.contains_key(&base)) {
            return Err(MapError::NotMapped);
        }

        let mut out = Vec::with_capacity(len as usize);
        for (base, page) in self.pages.range_mut(first..end) {
            for (i, byte) in page.bytes.iter_mut().enumerate() {
                let addr = base + i as u64;
                if addr >= start && addr < end {
                    out.push(byte);
                }
            }
        }
        Ok(out)
    }
}

impl Default for InMemorySpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace for InMemorySpace {
    fn map(&mut self, range: VirtRange, permissions: Permissions) -> Result<(), MapError> {
        let call = self.map_calls;
        self.map_calls += 1;
        if self.fail_map_at == Some(call) {
            return Err(MapError::OutOfMemory);
        }

        let bases = self.page_bases(&range)?;
        if bases.iter().any(|base| self.pages.contains_key(base)) {
            return Err(MapError::AlreadyMapped);
        }
        for base in bases {
            let bytes = vec![STALE; self.page_size as usize];
            self.pages.insert(base, Page { permissions, bytes });
        }
        Ok(())
    }

    fn unmap(&mut self, range: VirtRange) -> Result<(), MapError> {
        let bases = self.page_bases(&range)?;
        if bases.iter().any(|base| !self.pages.contains_key(base)) {
            return Err(MapError::NotMapped);
        }
        for base in bases {
            self.pages.remove(&base);
        }
        Ok(())
    }

    fn write_bytes(&mut self, vaddr: VirtAddr, bytes: &[u8]) -> Result<(), MapError> {
        let targets = self.bytes_mut(vaddr, bytes.len() as u64)?;
        for (target, byte) in targets.into_iter().zip(bytes) {
            *target = *byte;
        }
        Ok(())
    }

    fn zero_bytes(&mut self, vaddr: VirtAddr, len: u64) -> Result<(), MapError> {
        for target in self.bytes_mut(vaddr, len)? {
            *target = 0;
        }
        Ok(())
    }
}

/// A program header to emit; the file offset is chosen by the builder
#[derive(Debug, Clone)]
pub struct SegmentDef {
    /// `p_type`
    pub kind: u32,
    /// `p_flags`
    pub flags: u32,
    /// `p_vaddr`
    pub vaddr: u64,
    /// File contents; `p_filesz` is its length
    pub data: Vec<u8>,
    /// `p_memsz`
    pub memsz: u64,
    /// `p_align`
    pub align: u64,
}

impl SegmentDef {
    /// A page-aligned `PT_LOAD` segment
    pub fn load(flags: u32, vaddr: u64, data: &[u8], memsz: u64) -> Self {
        Self {
            kind: PT_LOAD,
            flags,
            vaddr,
            data: data.to_vec(),
            memsz,
            align: 0x1000,
        }
    }
}

struct SectionDef {
    name: String,
    kind: u32,
    data: Vec<u8>,
    link: u32,
    entsize: u64,
}

struct SymbolDef {
    name: String,
    info: u8,
    shndx: u16,
    value: u64,
    size: u64,
}

/// Builds ELF64 executables byte by byte
pub struct ImageBuilder {
    order: ByteOrder,
    machine: u16,
    kind: u16,
    entry: u64,
    segments: Vec<SegmentDef>,
    sections: Vec<SectionDef>,
    symbols: Vec<SymbolDef>,
}

impl ImageBuilder {
    /// Executable for the target described by `config`
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            order: config.byte_order,
            machine: config.machine,
            kind: ET_EXEC,
            entry: 0,
            segments: Vec::new(),
            sections: Vec::new(),
            symbols: Vec::new(),
        }
    }

    /// Set `e_entry`
    pub fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    /// Set `e_type`
    pub fn kind(mut self, kind: u16) -> Self {
        self.kind = kind;
        self
    }

    /// Set `e_machine`
    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    /// Add a program header
    pub fn segment(mut self, segment: SegmentDef) -> Self {
        self.segments.push(segment);
        self
    }

    /// Add a read/execute code segment
    pub fn code(self, vaddr: u64, data: &[u8], memsz: u64) -> Self {
        self.segment(SegmentDef::load(PF_R | PF_X, vaddr, data, memsz))
    }

    /// Add a read/write data segment
    pub fn data(self, vaddr: u64, data: &[u8], memsz: u64) -> Self {
        self.segment(SegmentDef::load(PF_R | PF_W, vaddr, data, memsz))
    }

    /// Add a section; index 0 is the null section, so the first call gets 1
    pub fn section(mut self, name: &str, kind: u32, data: &[u8]) -> Self {
        self.sections.push(SectionDef {
            name: name.to_string(),
            kind,
            data: data.to_vec(),
            link: 0,
            entsize: 0,
        });
        self
    }

    /// Add a global function symbol defined in section 1
    pub fn function(self, name: &str, value: u64, size: u64) -> Self {
        self.symbol(name, (STB_GLOBAL << 4) | STT_FUNC, 1, value, size)
    }

    /// Add a global object symbol defined in section 1
    pub fn object(self, name: &str, value: u64, size: u64) -> Self {
        self.symbol(name, (STB_GLOBAL << 4) | STT_OBJECT, 1, value, size)
    }

    /// Add a symbol
    pub fn symbol(mut self, name: &str, info: u8, shndx: u16, value: u64, size: u64) -> Self {
        self.symbols.push(SymbolDef {
            name: name.to_string(),
            info,
            shndx,
            value,
            size,
        });
        self
    }

    /// Produce the image
    pub fn build(mut self) -> Vec<u8> {
        let phnum = self.segments.len();
        let mut out = vec![0u8; 64 + phnum * 56];

        // Segment contents, placed so that offset and vaddr agree modulo align
        let mut offsets = Vec::with_capacity(phnum);
        for segment in &self.segments {
            let mut offset = out.len() as u64;
            if segment.align > 1 {
                let want = segment.vaddr % segment.align;
                let have = offset % segment.align;
                offset += (want + segment.align - have) % segment.align;
            }
            out.resize(offset as usize, 0);
            out.extend_from_slice(&segment.data);
            offsets.push(offset);
        }

        for (i, (segment, offset)) in self.segments.iter().zip(&offsets).enumerate() {
            let at = 64 + i * 56;
            self.put32(&mut out, at, segment.kind);
            self.put32(&mut out, at + 4, segment.flags);
            self.put64(&mut out, at + 8, *offset);
            self.put64(&mut out, at + 16, segment.vaddr);
            self.put64(&mut out, at + 24, segment.vaddr);
            self.put64(&mut out, at + 32, segment.data.len() as u64);
            self.put64(&mut out, at + 40, segment.memsz);
            self.put64(&mut out, at + 48, segment.align);
        }

        let (shoff, shnum, shstrndx) = self.emit_sections(&mut out);

        out[0..4].copy_from_slice(&ELF_MAGIC);
        out[4] = ELFCLASS64;
        out[5] = self.order.to_ident();
        out[6] = EV_CURRENT;
        self.put16(&mut out, 16, self.kind);
        self.put16(&mut out, 18, self.machine);
        self.put32(&mut out, 20, 1);
        self.put64(&mut out, 24, self.entry);
        self.put64(&mut out, 32, if phnum > 0 { 64 } else { 0 });
        self.put64(&mut out, 40, shoff);
        self.put16(&mut out, 52, 64);
        self.put16(&mut out, 54, 56);
        self.put16(&mut out, 56, phnum as u16);
        self.put16(&mut out, 58, 64);
        self.put16(&mut out, 60, shnum);
        self.put16(&mut out, 62, shstrndx);
        out
    }

    // Appends section contents and the section header table
    fn emit_sections(&mut self, out: &mut Vec<u8>) -> (u64, u16, u16) {
        if self.sections.is_empty() && self.symbols.is_empty() {
            return (0, 0, 0);
        }

        if !self.symbols.is_empty() {
            let mut strtab = vec![0u8];
            let mut symtab = vec![0u8; 24];
            for symbol in &self.symbols {
                let name = strtab.len() as u32;
                strtab.extend_from_slice(symbol.name.as_bytes());
                strtab.push(0);

                let mut record = vec![0u8; 24];
                self.put32(&mut record, 0, name);
                record[4] = symbol.info;
                self.put16(&mut record, 6, symbol.shndx);
                self.put64(&mut record, 8, symbol.value);
                self.put64(&mut record, 16, symbol.size);
                symtab.extend_from_slice(&record);
            }

            // .symtab links to the .strtab that follows it
            let strtab_index = self.sections.len() as u32 + 2;
            self.sections.push(SectionDef {
                name: ".symtab".to_string(),
                kind: SHT_SYMTAB,
                data: symtab,
                link: strtab_index,
                entsize: 24,
            });
            self.sections.push(SectionDef {
                name: ".strtab".to_string(),
                kind: SHT_STRTAB,
                data: strtab,
                link: 0,
                entsize: 0,
            });
        }

        let mut names = vec![0u8];
        let mut name_offsets = Vec::new();
        for section in &self.sections {
            name_offsets.push(names.len() as u32);
            names.extend_from_slice(section.name.as_bytes());
            names.push(0);
        }
        let shstrtab_name = names.len() as u32;
        names.extend_from_slice(b".shstrtab\0");
        name_offsets.push(shstrtab_name);
        self.sections.push(SectionDef {
            name: ".shstrtab".to_string(),
            kind: SHT_STRTAB,
            data: names,
            link: 0,
            entsize: 0,
        });

        let mut data_offsets = Vec::new();
        for section in &self.sections {
            align_to(out, 8);
            data_offsets.push(out.len() as u64);
            out.extend_from_slice(&section.data);
        }

        align_to(out, 8);
        let shoff = out.len() as u64;
        let shnum = self.sections.len() + 1;
        out.resize(out.len() + shnum * 64, 0);

        for (i, section) in self.sections.iter().enumerate() {
            let at = shoff as usize + (i + 1) * 64;
            self.put32(out, at, name_offsets[i]);
            self.put32(out, at + 4, section.kind);
            self.put64(out, at + 24, data_offsets[i]);
            self.put64(out, at + 32, section.data.len() as u64);
            self.put32(out, at + 40, section.link);
            self.put64(out, at + 48, 1);
            self.put64(out, at + 56, section.entsize);
        }

        (shoff, shnum as u16, (shnum - 1) as u16)
    }

    fn put16(&self, out: &mut [u8], at: usize, value: u16) {
        let bytes = match self.order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        out[at..at + 2].copy_from_slice(&bytes);
    }

    fn put32(&self, out: &mut [u8], at: usize, value: u32) {
        let bytes = match self.order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        out[at..at + 4].copy_from_slice(&bytes);
    }

    fn put64(&self, out: &mut [u8], at: usize, value: u64) {
        let bytes = match self.order {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        };
        out[at..at + 8].copy_from_slice(&bytes);
    }
}

fn align_to(out: &mut Vec<u8>, align: usize) {
    let len = out.len().div_ceil(align) * align;
    out.resize(len, 0);
}

/// Test payload of `len` bytes that never contains zero
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) | 1).collect()
}
