//! Loadable segment mapping
//!
//! [`SegmentMapper`] turns one `PT_LOAD` program header into a page-aligned
//! mapping in the target address space. Every range it maps is recorded in a
//! [`MappingLedger`] so a failed load can be unwound in reverse order.

use alloc::vec::Vec;

use crate::address_space::{AddressSpace, Permissions, VirtAddr, VirtRange};
use crate::bytes::ByteReader;
use crate::error::LoadError;
use crate::layout::LoaderConfig;
use crate::program::ProgramHeader;

/// What a mapped region holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// A loadable segment of the image
    Segment,
    /// The initial user stack
    Stack,
}

/// A page-aligned range mapped by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRegion {
    /// Mapped pages
    pub range: VirtRange,
    /// Permissions the range was mapped with
    pub permissions: Permissions,
    /// Contents of the range
    pub kind: RegionKind,
}

/// Ranges mapped so far by one load, in mapping order
#[derive(Debug, Default)]
pub struct MappingLedger {
    regions: Vec<MappedRegion>,
}

impl MappingLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self { regions: Vec::new() }
    }

    /// Record a successful `map` request
    pub fn record(&mut self, region: MappedRegion) {
        log::trace!("Recorded {:?} region {}", region.kind, region.range);
        self.regions.push(region);
    }

    /// Whether `range` shares a byte with any recorded region
    pub fn overlaps(&self, range: &VirtRange) -> bool {
        self.regions.iter().any(|region| region.range.overlaps(range))
    }

    /// Recorded regions in mapping order
    pub fn regions(&self) -> &[MappedRegion] {
        &self.regions
    }

    /// Lowest address covered by a recorded segment
    pub fn lowest_segment(&self) -> Option<VirtAddr> {
        self.segments().map(|region| region.range.start).min()
    }

    /// First address past the highest recorded segment
    pub fn highest_segment_end(&self) -> Option<VirtAddr> {
        self.segments().map(|region| region.range.end).max()
    }

    fn segments(&self) -> impl Iterator<Item = &MappedRegion> {
        self.regions.iter().filter(|region| region.kind == RegionKind::Segment)
    }

    /// Unmap every recorded region, newest first.
    ///
    /// An `unmap` failure is logged and the walk continues so the remaining
    /// regions are still released.
    pub fn rollback<A: AddressSpace + ?Sized>(&mut self, space: &mut A) {
        while let Some(region) = self.regions.pop() {
            log::trace!("Rolling back {:?} region {}", region.kind, region.range);
            if let Err(err) = space.unmap(region.range) {
                log::error!("Failed to unmap {} during rollback: {}", region.range, err);
            }
        }
    }

    /// Consume the ledger, keeping the recorded regions
    pub fn into_regions(self) -> Vec<MappedRegion> {
        self.regions
    }
}

/// Maps the loadable segments of one image
pub struct SegmentMapper<'a, 'c> {
    reader: ByteReader<'a>,
    config: &'c LoaderConfig,
}

impl<'a, 'c> SegmentMapper<'a, 'c> {
    /// Create a mapper reading segment contents through `reader`
    pub fn new(reader: ByteReader<'a>, config: &'c LoaderConfig) -> Self {
        Self { reader, config }
    }

    /// Map `ph` into `space` and copy its contents.
    ///
    /// Returns the exact in-memory range `[vaddr, vaddr + memsz)` together
    /// with the permissions it was mapped with, or `None` for an empty
    /// segment. The mapping is recorded in `ledger` as soon as `map`
    /// succeeds, so later copy failures are covered by rollback.
    pub fn map_segment<A: AddressSpace + ?Sized>(
        &self,
        ph: &ProgramHeader,
        space: &mut A,
        ledger: &mut MappingLedger,
    ) -> Result<Option<(VirtRange, Permissions)>, LoadError> {
        ph.validate()?;

        if ph.p_memsz == 0 {
            log::trace!("Skipping empty segment at {:#x}", ph.p_vaddr);
            return Ok(None);
        }

        let range = ph.memory_range().ok_or(LoadError::InvalidSegment)?;
        let span = self.config.page_span(&range).ok_or(LoadError::InvalidSegment)?;
        if !self.config.is_user_range(&span) {
            return Err(LoadError::InvalidSegment);
        }

        let contents = self.reader.bytes(ph.p_offset, ph.p_filesz)?;

        if ledger.overlaps(&span) {
            return Err(LoadError::OverlappingSegments);
        }

        let permissions = self.effective_permissions(ph, &range);
        log::trace!(
            "Mapping segment {} as {} ({:?}), file {:#x}+{:#x}",
            range,
            span,
            permissions,
            ph.p_offset,
            ph.p_filesz
        );

        space.map(span, permissions)?;
        ledger.record(MappedRegion {
            range: span,
            permissions,
            kind: RegionKind::Segment,
        });

        // Page slack before vaddr
        let head = range.start.as_u64() - span.start.as_u64();
        if head > 0 {
            space.zero_bytes(span.start, head)?;
        }

        if !contents.is_empty() {
            space.write_bytes(range.start, contents)?;
        }

        // BSS plus the page slack after vaddr + memsz
        let file_end = range.start.as_u64() + ph.p_filesz;
        let tail = span.end.as_u64() - file_end;
        if tail > 0 {
            space.zero_bytes(VirtAddr(file_end), tail)?;
        }

        Ok(Some((range, permissions)))
    }

    fn effective_permissions(&self, ph: &ProgramHeader, range: &VirtRange) -> Permissions {
        let mut permissions = ph.permissions();
        if self.config.enforce_wx && permissions.contains(Permissions::WRITE | Permissions::EXECUTE) {
            log::warn!("Segment {} is writable and executable, dropping write permission", range);
            permissions.remove(Permissions::WRITE);
        }
        permissions
    }
}
