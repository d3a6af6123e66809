//! Loader error types

use core::fmt;

use crate::address_space::MapError;
use crate::bytes::OutOfBounds;

/// Reasons a load (or a section/symbol query) fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The buffer does not start with the ELF signature
    BadMagic,
    /// Not a 64-bit image
    UnsupportedArch,
    /// Byte order differs from the kernel's
    UnsupportedByteOrder,
    /// Machine identifier differs from the kernel target
    UnsupportedMachine,
    /// Image is not a static executable
    UnsupportedImageType,
    /// A header, table or segment reaches past the end of the buffer
    TruncatedImage,
    /// A loadable segment violates the format or the user address window
    InvalidSegment,
    /// Two loadable segments cover the same pages
    OverlappingSegments,
    /// No room left for the initial stack
    NoStackSpace,
    /// Entry address is outside every executable segment
    InvalidEntrypoint,
    /// The address-space context refused a request
    MappingFailed(MapError),
    /// The loader configuration failed verification
    InvalidConfig(&'static str),
}

impl LoadError {
    /// Short human-readable description
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadError::BadMagic => "Invalid ELF magic number",
            LoadError::UnsupportedArch => "Not an ELF64 image",
            LoadError::UnsupportedByteOrder => "Image byte order does not match the kernel",
            LoadError::UnsupportedMachine => "Image built for another machine",
            LoadError::UnsupportedImageType => "Image is not a static executable",
            LoadError::TruncatedImage => "Image is truncated or a table exceeds its bounds",
            LoadError::InvalidSegment => "Invalid loadable segment",
            LoadError::OverlappingSegments => "Segments overlap in memory",
            LoadError::NoStackSpace => "No free region for the initial stack",
            LoadError::InvalidEntrypoint => "Entry point is not inside an executable segment",
            LoadError::MappingFailed(_) => "Address space mapping failed",
            LoadError::InvalidConfig(_) => "Invalid loader configuration",
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::MappingFailed(err) => write!(f, "{}: {}", self.as_str(), err),
            LoadError::InvalidConfig(reason) => write!(f, "{}: {}", self.as_str(), reason),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl From<OutOfBounds> for LoadError {
    fn from(_: OutOfBounds) -> Self {
        LoadError::TruncatedImage
    }
}

impl From<MapError> for LoadError {
    fn from(err: MapError) -> Self {
        LoadError::MappingFailed(err)
    }
}
