//! NOS ELF Loader
//!
//! This crate loads statically linked ELF64 executables into a user address
//! space. It validates the image, maps every loadable segment with the
//! permissions it asks for, places the initial stack and hands back the
//! entry point and stack pointer. It also resolves sections and symbols by
//! name for the rest of the kernel.
//!
//! The address space itself is reached only through the [`AddressSpace`]
//! trait, so the loader is independent of the paging implementation.
//!
//! # Example
//!
//! ```ignore
//! use nos_elf_loader::{ElfLoader, LoaderConfig};
//!
//! let mut loader = ElfLoader::new(LoaderConfig::x86_64());
//! let result = loader.load(&image, &mut process.address_space)?;
//! thread.start_user(result.entrypoint, result.stack_pointer);
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// Image parsing
pub mod bytes;
pub mod header;
pub mod program;
pub mod section;
pub mod symbol;
pub mod image;

// Loading
pub mod address_space;
pub mod layout;
pub mod mapper;
pub mod stack;
pub mod loader;

pub mod error;

// Re-export commonly used types
pub use address_space::{AddressSpace, MapError, Permissions, VirtAddr, VirtRange};
pub use bytes::{ByteOrder, ByteReader};
pub use error::LoadError;
pub use header::ElfHeader;
pub use image::ElfImage;
pub use layout::{LoaderConfig, PAGE_SIZE};
pub use loader::{ElfLoader, LoadResult, LoadState};
pub use mapper::{MappedRegion, RegionKind};
pub use program::ProgramHeader;
pub use section::SectionHeader;
pub use symbol::Symbol;

/// Load `image` into `space` using the configuration of the build target.
///
/// On success the entry point and initial stack pointer are in the returned
/// [`LoadResult`]. On failure `space` holds no mapping made by this call.
pub fn load_elf<A: AddressSpace + ?Sized>(image: &[u8], space: &mut A) -> Result<LoadResult, LoadError> {
    ElfLoader::default().load(image, space)
}

/// Find the first section of `image` named `name`.
///
/// A missing section is `Ok(None)`; malformed section or string tables are
/// `Err(LoadError::TruncatedImage)`.
pub fn section_by_name(name: &str, image: &[u8]) -> Result<Option<SectionHeader>, LoadError> {
    ElfImage::parse(image, &LoaderConfig::default())?.section_by_name(name)
}
