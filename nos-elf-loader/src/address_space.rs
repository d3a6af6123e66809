//! Address-space context interface
//!
//! The loader never touches page tables itself. It drives the process's
//! address space through [`AddressSpace`], which the VM subsystem implements.

use core::fmt;

use bitflags::bitflags;

/// A virtual address in the target address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub u64);

impl VirtAddr {
    /// Creates a new virtual address from a raw value.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the address as a raw value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the offset within a page of `page_size` bytes.
    pub const fn page_offset(self, page_size: u64) -> u64 {
        self.0 & (page_size - 1)
    }

    /// Rounds down to a `page_size` boundary.
    pub const fn page_round_down(self, page_size: u64) -> Self {
        Self(self.0 & !(page_size - 1))
    }

    /// Rounds up to a `page_size` boundary, `None` on overflow.
    pub const fn page_round_up(self, page_size: u64) -> Option<Self> {
        match self.0.checked_add(page_size - 1) {
            Some(addr) => Some(Self(addr & !(page_size - 1))),
            None => None,
        }
    }

    /// Adds a byte offset, `None` on overflow.
    pub const fn checked_add(self, offset: u64) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl From<u64> for VirtAddr {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

impl From<VirtAddr> for u64 {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Half-open virtual range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtRange {
    /// First address in the range
    pub start: VirtAddr,
    /// First address past the range
    pub end: VirtAddr,
}

impl VirtRange {
    /// Creates `[start, end)`.
    pub const fn new(start: VirtAddr, end: VirtAddr) -> Self {
        Self { start, end }
    }

    /// Creates `[start, start + len)`, `None` on overflow.
    pub const fn from_len(start: VirtAddr, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    /// Length in bytes
    pub const fn len(&self) -> u64 {
        self.end.0.saturating_sub(self.start.0)
    }

    /// Whether the range covers no bytes
    pub const fn is_empty(&self) -> bool {
        self.end.0 <= self.start.0
    }

    /// Whether `addr` lies inside the range
    pub const fn contains(&self, addr: VirtAddr) -> bool {
        self.start.0 <= addr.0 && addr.0 < self.end.0
    }

    /// Whether the two ranges share at least one byte
    pub const fn overlaps(&self, other: &VirtRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start.0 < other.end.0 && other.start.0 < self.end.0
    }
}

impl fmt::Display for VirtRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start.0, self.end.0)
    }
}

bitflags! {
    /// Access permissions of a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u32 {
        /// Readable
        const READ    = 0b001;
        /// Writable
        const WRITE   = 0b010;
        /// Executable
        const EXECUTE = 0b100;
    }
}

/// Errors reported by the address-space context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// No physical frames left to back the mapping
    OutOfMemory,
    /// Part of the range is already mapped
    AlreadyMapped,
    /// Part of the range is not mapped
    NotMapped,
    /// The range is malformed or outside the context
    InvalidRange,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::AlreadyMapped => write!(f, "Range already mapped"),
            Self::NotMapped => write!(f, "Range not mapped"),
            Self::InvalidRange => write!(f, "Invalid range"),
        }
    }
}

/// A process's virtual address space as seen by the loader
///
/// Ranges passed to `map`/`unmap` are page aligned. `write_bytes` and
/// `zero_bytes` only target addresses inside ranges the loader mapped during
/// the same call, and must succeed regardless of the mapping's permissions.
/// The caller holds exclusive access for the whole load.
#[cfg_attr(test, mockall::automock)]
pub trait AddressSpace {
    /// Creates a mapping for `range` with `permissions`.
    fn map(&mut self, range: VirtRange, permissions: Permissions) -> Result<(), MapError>;

    /// Removes the mapping for `range`.
    fn unmap(&mut self, range: VirtRange) -> Result<(), MapError>;

    /// Copies `bytes` to `vaddr`.
    fn write_bytes(&mut self, vaddr: VirtAddr, bytes: &[u8]) -> Result<(), MapError>;

    /// Fills `len` bytes at `vaddr` with zeroes.
    fn zero_bytes(&mut self, vaddr: VirtAddr, len: u64) -> Result<(), MapError>;
}

impl<A: AddressSpace + ?Sized> AddressSpace for &mut A {
    fn map(&mut self, range: VirtRange, permissions: Permissions) -> Result<(), MapError> {
        (**self).map(range, permissions)
    }

    fn unmap(&mut self, range: VirtRange) -> Result<(), MapError> {
        (**self).unmap(range)
    }

    fn write_bytes(&mut self, vaddr: VirtAddr, bytes: &[u8]) -> Result<(), MapError> {
        (**self).write_bytes(vaddr, bytes)
    }

    fn zero_bytes(&mut self, vaddr: VirtAddr, len: u64) -> Result<(), MapError> {
        (**self).zero_bytes(vaddr, len)
    }
}
