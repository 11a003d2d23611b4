// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 page-table walker with lazy allocation of intermediate levels.
//!
//! Tables are addressed physically and reached through [`PhysMemory`], so the
//! same walker drives both the live tree and host-side simulations.

use super::{
    freemem::FrameAllocator, level_page_size, MapError, PageFlags, PhysMemory, Pte, LEAF_PERMS,
    PAGE_SHIFT, PAGE_SIZE, PT_ENTRIES, PT_INDEX_BITS, PT_LEVELS,
};
use crate::types::{PhysAddr, VirtAddr};

/// Index into the table at `level` (1 = leaf table, 3 = root) for `va`.
#[inline]
pub const fn pt_index(va: VirtAddr, level: usize) -> usize {
    (va.raw() >> (PAGE_SHIFT + PT_INDEX_BITS * (level - 1))) & (PT_ENTRIES - 1)
}

/// Result of walking the tree for one virtual address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Translation {
    /// Physical address the virtual address resolves to.
    pub pa: PhysAddr,
    /// Flags of the leaf entry.
    pub flags: PageFlags,
    /// Level the leaf was found at (1 = 4 KiB, 2 = megapage).
    pub level: usize,
}

/// Resolves `va` through the tree rooted at `root`.
pub fn translate<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    va: VirtAddr,
) -> Option<Translation> {
    let mut table = root;
    for level in (1..=PT_LEVELS).rev() {
        let entry = mem.frame(table)?.entry(pt_index(va, level));
        if !entry.is_valid() {
            return None;
        }
        if entry.is_leaf() {
            let span = level_page_size(level);
            let pa = entry.phys_addr().checked_add(va.raw() & (span - 1))?;
            return Some(Translation { pa, flags: entry.flags(), level });
        }
        if level == 1 {
            // Pointer entry in a leaf table: malformed.
            return None;
        }
        table = entry.phys_addr();
    }
    None
}

/// Installs a 4 KiB mapping, allocating missing intermediate tables from `frames`.
pub fn map_page<M, A>(
    mem: &mut M,
    root: PhysAddr,
    va: VirtAddr,
    pa: PhysAddr,
    flags: PageFlags,
    frames: &mut A,
) -> Result<(), MapError>
where
    M: PhysMemory + ?Sized,
    A: FrameAllocator + ?Sized,
{
    if !va.is_aligned(PAGE_SIZE) || !pa.is_aligned(PAGE_SIZE) {
        return Err(MapError::Unaligned);
    }
    debug_assert!(flags.intersects(LEAF_PERMS));

    let mut table = root;
    for level in (2..=PT_LEVELS).rev() {
        let index = pt_index(va, level);
        let entry = mem.frame(table).ok_or(MapError::Unreachable(table))?.entry(index);
        if entry.is_valid() {
            table = entry.child_table().ok_or(MapError::Overlap)?;
            continue;
        }
        let next = frames.alloc_frame().ok_or(MapError::OutOfMemory)?;
        mem.frame(next).ok_or(MapError::Unreachable(next))?.zero();
        mem.frame(table)
            .ok_or(MapError::Unreachable(table))?
            .set_entry(index, Pte::table(next));
        table = next;
    }

    let leaf = mem.frame(table).ok_or(MapError::Unreachable(table))?;
    let index = pt_index(va, 1);
    if leaf.entry(index).is_valid() {
        return Err(MapError::Overlap);
    }
    leaf.set_entry(index, Pte::leaf(pa, flags));
    Ok(())
}

/// Returns the raw entry for `va` at `level` without interpreting it, if the path exists.
#[cfg(test)]
pub fn entry_at<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    va: VirtAddr,
    level: usize,
) -> Option<Pte> {
    let mut table = root;
    for l in (level + 1..=PT_LEVELS).rev() {
        table = mem.frame(table)?.entry(pt_index(va, l)).child_table()?;
    }
    Some(mem.frame(table)?.entry(pt_index(va, level)))
}
