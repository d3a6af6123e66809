//! Bounds-checked field access over an image buffer
//!
//! Every multi-byte field of an ELF image is read through [`ByteReader`],
//! which knows the byte order the image declares. Nothing in this crate
//! reinterprets the raw buffer as a native structure.

use core::fmt;

/// Byte order of an image (the ELF `EI_DATA` field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `ELFDATA2LSB`
    Little,
    /// `ELFDATA2MSB`
    Big,
}

impl ByteOrder {
    /// Byte order of the machine this crate was built for.
    pub const fn native() -> Self {
        #[cfg(target_endian = "big")]
        {
            ByteOrder::Big
        }
        #[cfg(target_endian = "little")]
        {
            ByteOrder::Little
        }
    }

    /// Decodes an `EI_DATA` byte.
    pub const fn from_ident(data: u8) -> Option<Self> {
        match data {
            1 => Some(ByteOrder::Little),
            2 => Some(ByteOrder::Big),
            _ => None,
        }
    }

    /// Encodes as an `EI_DATA` byte.
    pub const fn to_ident(self) -> u8 {
        match self {
            ByteOrder::Little => 1,
            ByteOrder::Big => 2,
        }
    }
}

/// A read fell outside the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds {
    /// Requested offset
    pub offset: u64,
    /// Requested width in bytes
    pub len: u64,
}

impl fmt::Display for OutOfBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read of {} bytes at offset {:#x} is out of bounds", self.len, self.offset)
    }
}

/// Endianness-aware reader over a borrowed image buffer
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> ByteReader<'a> {
    /// Creates a reader decoding fields in `order`.
    pub const fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, order }
    }

    /// Length of the underlying buffer
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the underlying buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte order fields are decoded in
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Whether `[offset, offset + len)` lies inside the buffer.
    pub fn contains(&self, offset: u64, len: u64) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.len())
    }

    /// Returns `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: u64, len: u64) -> Result<&'a [u8], OutOfBounds> {
        let oob = OutOfBounds { offset, len };
        if !self.contains(offset, len) {
            return Err(oob);
        }
        let start = usize::try_from(offset).map_err(|_| oob)?;
        let len = usize::try_from(len).map_err(|_| oob)?;
        Ok(&self.data[start..start + len])
    }

    fn array<const N: usize>(&self, offset: u64) -> Result<[u8; N], OutOfBounds> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N as u64)?);
        Ok(out)
    }

    /// Reads a byte.
    pub fn read_u8(&self, offset: u64) -> Result<u8, OutOfBounds> {
        Ok(self.array::<1>(offset)?[0])
    }

    /// Reads a 16-bit field.
    pub fn read_u16(&self, offset: u64) -> Result<u16, OutOfBounds> {
        let raw = self.array(offset)?;
        Ok(match self.order {
            ByteOrder::Little => u16::from_le_bytes(raw),
            ByteOrder::Big => u16::from_be_bytes(raw),
        })
    }

    /// Reads a 32-bit field.
    pub fn read_u32(&self, offset: u64) -> Result<u32, OutOfBounds> {
        let raw = self.array(offset)?;
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        })
    }

    /// Reads a 64-bit field.
    pub fn read_u64(&self, offset: u64) -> Result<u64, OutOfBounds> {
        let raw = self.array(offset)?;
        Ok(match self.order {
            ByteOrder::Little => u64::from_le_bytes(raw),
            ByteOrder::Big => u64::from_be_bytes(raw),
        })
    }

    /// Returns the NUL-terminated string starting at `offset`, without the
    /// terminator. The terminator must appear before `limit`.
    pub fn c_str(&self, offset: u64, limit: u64) -> Result<&'a [u8], OutOfBounds> {
        let window = self.bytes(offset, limit.saturating_sub(offset))?;
        match window.iter().position(|&b| b == 0) {
            Some(end) => Ok(&window[..end]),
            None => Err(OutOfBounds { offset, len: window.len() as u64 + 1 }),
        }
    }
}
