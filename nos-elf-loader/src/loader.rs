//! ELF executable loader
//!
//! [`ElfLoader`] drives one load from raw bytes to a ready-to-run address
//! space:
//!
//! ```text
//! Idle -> Validating -> Mapping(i) -> PlacingStack -> Done
//!                            \              /
//!                             -> Aborting -> Failed
//! ```
//!
//! Every failure after the first `map` request unwinds all mappings made by
//! the call before the error is returned.

use alloc::vec::Vec;

use crate::address_space::{AddressSpace, Permissions, VirtAddr, VirtRange};
use crate::error::LoadError;
use crate::image::ElfImage;
use crate::layout::LoaderConfig;
use crate::mapper::{MappedRegion, MappingLedger, SegmentMapper};
use crate::stack;

/// Progress of the current (or last) load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No load started yet
    Idle,
    /// Checking the file header and tables
    Validating,
    /// Mapping program header `i`
    Mapping(u16),
    /// Choosing and mapping the initial stack
    PlacingStack,
    /// Load finished successfully
    Done,
    /// Unwinding mappings after a failure
    Aborting,
    /// Load failed; the address space is back to its prior state
    Failed,
}

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    /// Address of the first user instruction
    pub entrypoint: VirtAddr,
    /// Initial stack pointer (top of the stack region)
    pub stack_pointer: VirtAddr,
    /// Mapped stack region
    pub stack: VirtRange,
    /// First page after the highest mapped segment
    pub program_break: VirtAddr,
    /// Every region mapped by the load, in mapping order
    pub regions: Vec<MappedRegion>,
}

/// ELF executable loader for one target configuration
#[derive(Debug, Clone)]
pub struct ElfLoader {
    config: LoaderConfig,
    state: LoadState,
}

impl ElfLoader {
    /// Create a loader for `config`
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            state: LoadState::Idle,
        }
    }

    /// Target configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> LoadState {
        self.state
    }

    fn transition(&mut self, next: LoadState) {
        log::trace!("ELF loader: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Load `image` into `space`.
    ///
    /// The configuration is verified first; a bad one is refused before
    /// `space` is touched. On failure no mapping made by this call remains
    /// in `space`.
    pub fn load<A: AddressSpace + ?Sized>(
        &mut self,
        image: &[u8],
        space: &mut A,
    ) -> Result<LoadResult, LoadError> {
        if let Err(reason) = self.config.verify() {
            log::error!("Refusing to load with a bad configuration: {}", reason);
            self.transition(LoadState::Failed);
            return Err(LoadError::InvalidConfig(reason));
        }

        self.transition(LoadState::Validating);
        let image = match ElfImage::parse(image, &self.config) {
            Ok(image) => image,
            Err(err) => {
                log::debug!("Rejected ELF image: {}", err);
                self.transition(LoadState::Failed);
                return Err(err);
            }
        };

        let mut ledger = MappingLedger::new();
        match self.map_image(&image, space, &mut ledger) {
            Ok((stack, program_break)) => {
                self.transition(LoadState::Done);
                let result = LoadResult {
                    entrypoint: VirtAddr(image.entry()),
                    stack_pointer: stack.end,
                    stack,
                    program_break,
                    regions: ledger.into_regions(),
                };
                log::debug!(
                    "Loaded ELF image: entry={:#x}, stack={}, brk={:#x}, {} regions",
                    result.entrypoint,
                    result.stack,
                    result.program_break,
                    result.regions.len()
                );
                Ok(result)
            }
            Err(err) => {
                self.transition(LoadState::Aborting);
                log::warn!(
                    "ELF load failed: {}, rolling back {} mappings",
                    err,
                    ledger.regions().len()
                );
                ledger.rollback(space);
                self.transition(LoadState::Failed);
                Err(err)
            }
        }
    }

    /// Map every loadable segment and the stack; returns the stack region and
    /// the program break.
    fn map_image<A: AddressSpace + ?Sized>(
        &mut self,
        image: &ElfImage<'_>,
        space: &mut A,
        ledger: &mut MappingLedger,
    ) -> Result<(VirtRange, VirtAddr), LoadError> {
        let config = self.config;
        let mapper = SegmentMapper::new(image.reader(), &config);
        let entry = VirtAddr(image.entry());
        let mut entry_mapped = false;

        for (index, ph) in (0u16..).zip(image.program_headers()) {
            let ph = ph?;
            if !ph.is_load() {
                continue;
            }

            self.transition(LoadState::Mapping(index));
            if let Some((range, permissions)) = mapper.map_segment(&ph, space, ledger)? {
                if range.contains(entry) && permissions.contains(Permissions::EXECUTE) {
                    entry_mapped = true;
                }
            }
        }

        if !entry_mapped {
            log::debug!("Entry point {:#x} is not in an executable segment", entry);
            return Err(LoadError::InvalidEntrypoint);
        }
        let program_break = ledger.highest_segment_end().ok_or(LoadError::InvalidEntrypoint)?;

        self.transition(LoadState::PlacingStack);
        let stack = stack::map_stack(&config, space, ledger)?;

        Ok((stack, program_break))
    }
}

impl Default for ElfLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}
