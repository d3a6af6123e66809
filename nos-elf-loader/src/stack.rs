// Initial user stack placement
// Picks a page-aligned region that keeps a guard gap to every mapped range

use crate::address_space::{AddressSpace, Permissions, VirtAddr, VirtRange};
use crate::error::LoadError;
use crate::layout::LoaderConfig;
use crate::mapper::{MappedRegion, MappingLedger, RegionKind};

/// Choose the stack region for the ranges recorded in `ledger`.
///
/// The configured `stack_top` is tried first, then the space directly below
/// the lowest mapped segment. A candidate is accepted when the region plus a
/// guard gap on both sides lies inside the user window and clears every
/// recorded range.
pub fn place(config: &LoaderConfig, ledger: &MappingLedger) -> Result<VirtRange, LoadError> {
    let guard = VirtAddr(config.stack_guard_size)
        .page_round_up(config.page_size)
        .ok_or(LoadError::NoStackSpace)?
        .as_u64();

    let below_image = ledger
        .lowest_segment()
        .and_then(|lowest| lowest.as_u64().checked_sub(guard));

    let candidates = [Some(config.stack_top), below_image];
    for top in candidates.into_iter().flatten() {
        let top = VirtAddr(top).page_round_down(config.page_size);
        if let Some(stack) = fits(config, ledger, top, guard) {
            log::trace!("Stack placed at {} (top {:#x})", stack, top);
            return Ok(stack);
        }
        log::trace!("Stack candidate with top {:#x} rejected", top);
    }

    Err(LoadError::NoStackSpace)
}

fn fits(config: &LoaderConfig, ledger: &MappingLedger, top: VirtAddr, guard: u64) -> Option<VirtRange> {
    let bottom = top.as_u64().checked_sub(config.stack_size)?;
    let footprint = VirtRange::new(
        VirtAddr(bottom.checked_sub(guard)?),
        top.checked_add(guard)?,
    );

    if config.stack_size == 0 || !config.is_user_range(&footprint) || ledger.overlaps(&footprint) {
        return None;
    }
    Some(VirtRange::new(VirtAddr(bottom), top))
}

/// Place, map and zero the initial stack, recording it in `ledger`.
pub fn map_stack<A: AddressSpace + ?Sized>(
    config: &LoaderConfig,
    space: &mut A,
    ledger: &mut MappingLedger,
) -> Result<VirtRange, LoadError> {
    let stack = place(config, ledger)?;
    let permissions = Permissions::READ | Permissions::WRITE;

    space.map(stack, permissions)?;
    ledger.record(MappedRegion {
        range: stack,
        permissions,
        kind: RegionKind::Stack,
    });
    space.zero_bytes(stack.start, stack.len())?;

    Ok(stack)
}
