// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Region descriptors and the reserved-table linear mapper
//! OWNERS: @kernel-mm-team
//! PUBLIC API: RegionKind, Region::{new, in_window}, ReservedPair,
//!             map_with_reserved_tables, verify_region
//! DEPENDS_ON: mm::{pte, page_table::pt_index}
//! INVARIANTS: No dynamic allocation; one L2 and at most one L3 per region;
//!             never overwrites an entry it did not install
//!
//! Runs before the free-memory pool exists, so every table a region needs
//! comes from a static reservation. Wherever virtual and physical addresses
//! are both megapage aligned the region is mapped with 2 MiB leaves directly
//! in the reserved L2; everything else lands in the single reserved L3.

use core::fmt;

use super::{
    page_table::pt_index,
    MapError, PageFlags, PhysMemory, Pte, GIGAPAGE_SIZE, MEGAPAGE_SIZE, PAGE_SIZE,
};
use crate::types::{PhysAddr, VirtAddr};

/// The windows the boot sequence installs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    /// The runtime's own image.
    Runtime,
    /// The user image, reachable by the runtime.
    User,
    /// The free-memory pool.
    Free,
    /// The buffer shared with the untrusted host.
    Untrusted,
}

impl RegionKind {
    /// Leaf permissions for this class of region.
    pub const fn flags(self) -> PageFlags {
        let base = PageFlags::VALID
            .union(PageFlags::READ)
            .union(PageFlags::WRITE)
            .union(PageFlags::ACCESSED)
            .union(PageFlags::DIRTY);
        match self {
            RegionKind::Runtime => base.union(PageFlags::EXECUTE),
            RegionKind::User | RegionKind::Free | RegionKind::Untrusted => {
                base.union(PageFlags::USER)
            }
        }
    }

    /// Largest size accepted for this class.
    pub const fn max_size(self) -> usize {
        match self {
            RegionKind::Runtime | RegionKind::Untrusted => MEGAPAGE_SIZE,
            RegionKind::User | RegionKind::Free => GIGAPAGE_SIZE,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            RegionKind::Runtime => "runtime",
            RegionKind::User => "user",
            RegionKind::Free => "free",
            RegionKind::Untrusted => "untrusted",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors raised while describing the boot regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionError {
    /// A base or size is not page aligned.
    Unaligned(RegionKind),
    /// The region has no bytes.
    Empty(RegionKind),
    /// The region exceeds what its class may map.
    TooLarge { kind: RegionKind, size: usize, limit: usize },
    /// The 4 KiB-granular part would need more than the one reserved leaf table.
    Fragmented(RegionKind),
    /// The virtual range is not canonical or crosses a root-table slot.
    OutOfRange(RegionKind),
    /// Physical bases are not in the expected runtime < user < free order inside DRAM.
    Misordered,
    /// Two windows share a root-table slot.
    LayoutCollision(RegionKind, RegionKind),
}

/// A contiguous physical range and the virtual window it is mapped at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub pa: PhysAddr,
    pub size: usize,
    pub va: VirtAddr,
}

impl Region {
    pub fn new(
        kind: RegionKind,
        pa: PhysAddr,
        size: usize,
        va: VirtAddr,
    ) -> Result<Self, RegionError> {
        if !pa.is_aligned(PAGE_SIZE) || !va.is_aligned(PAGE_SIZE) || size % PAGE_SIZE != 0 {
            return Err(RegionError::Unaligned(kind));
        }
        if size == 0 {
            return Err(RegionError::Empty(kind));
        }
        if size > kind.max_size() {
            return Err(RegionError::TooLarge { kind, size, limit: kind.max_size() });
        }
        if pa.checked_add(size).is_none() || va.checked_add(size - 1).is_none() {
            return Err(RegionError::OutOfRange(kind));
        }
        if (va.raw() & (GIGAPAGE_SIZE - 1)) + size > GIGAPAGE_SIZE {
            return Err(RegionError::OutOfRange(kind));
        }
        let region = Self { kind, pa, size, va };
        if region.small_page_blocks() > 1 {
            return Err(RegionError::Fragmented(kind));
        }
        Ok(region)
    }

    /// Virtual base congruent with `pa` modulo a megapage inside the window at `window`.
    pub fn window_va(window: VirtAddr, pa: PhysAddr) -> Option<VirtAddr> {
        window.checked_add(pa.raw() & (MEGAPAGE_SIZE - 1))
    }

    /// Places `[pa, pa + size)` in the window starting at `window`.
    ///
    /// Prefers the megapage-congruent base; a region that would then need
    /// leaf tables in two blocks is retried at the window base itself.
    pub fn in_window(
        kind: RegionKind,
        window: VirtAddr,
        pa: PhysAddr,
        size: usize,
    ) -> Result<Self, RegionError> {
        let congruent = Self::window_va(window, pa).ok_or(RegionError::OutOfRange(kind))?;
        match Self::new(kind, pa, size, congruent) {
            Err(RegionError::Fragmented(_)) => Self::new(kind, pa, size, window),
            placed => placed,
        }
    }

    pub fn end_pa(&self) -> PhysAddr {
        PhysAddr::new(self.pa.raw() + self.size)
    }

    pub fn contains_pa(&self, pa: PhysAddr) -> bool {
        pa >= self.pa && pa < self.end_pa()
    }

    pub fn contains_va(&self, va: VirtAddr) -> bool {
        va.offset_from(self.va).is_some_and(|off| off < self.size)
    }

    /// Root-table index the region lives under.
    pub fn root_slot(&self) -> usize {
        pt_index(self.va, 3)
    }

    /// Virtual address of `pa`, if the region covers it.
    pub fn va_of(&self, pa: PhysAddr) -> Option<VirtAddr> {
        if !self.contains_pa(pa) {
            return None;
        }
        self.va.checked_add(pa.offset_from(self.pa)?)
    }

    /// Physical address behind `va`, if the region covers it.
    pub fn pa_of(&self, va: VirtAddr) -> Option<PhysAddr> {
        if !self.contains_va(va) {
            return None;
        }
        self.pa.checked_add(va.offset_from(self.va)?)
    }

    /// Number of megapage-sized virtual blocks that need 4 KiB leaves.
    ///
    /// Mirrors the placement decisions of [`map_with_reserved_tables`] one
    /// block at a time.
    fn small_page_blocks(&self) -> usize {
        let start = self.va.raw() & (GIGAPAGE_SIZE - 1);
        let mut blocks = 0;
        let mut offset = 0;
        while offset < self.size {
            let va = start + offset;
            let pa = self.pa.raw() + offset;
            let block_end = (va / MEGAPAGE_SIZE + 1) * MEGAPAGE_SIZE - start;
            if va % MEGAPAGE_SIZE != 0
                || pa % MEGAPAGE_SIZE != 0
                || self.size - offset < MEGAPAGE_SIZE
            {
                blocks += 1;
            }
            offset = core::cmp::min(block_end, self.size);
        }
        blocks
    }
}

/// Tables reserved statically for one region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservedPair {
    pub l2: PhysAddr,
    pub l3: PhysAddr,
}

/// Leaf counts installed for one region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MappedRegion {
    pub pages: usize,
    pub megapages: usize,
}

/// Links `table[index]` to `child`, accepting an existing identical link.
fn install_pointer<M: PhysMemory + ?Sized>(
    mem: &mut M,
    table: PhysAddr,
    index: usize,
    child: PhysAddr,
) -> Result<(), MapError> {
    let frame = mem.frame(table).ok_or(MapError::Unreachable(table))?;
    let entry = frame.entry(index);
    if entry.is_valid() {
        return if entry.child_table() == Some(child) { Ok(()) } else { Err(MapError::Overlap) };
    }
    frame.set_entry(index, Pte::table(child));
    Ok(())
}

/// Installs a linear mapping of `region` under `root` using only `tables`.
pub fn map_with_reserved_tables<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    region: &Region,
    tables: ReservedPair,
) -> Result<MappedRegion, MapError> {
    let flags = region.kind.flags();
    install_pointer(mem, root, region.root_slot(), tables.l2)?;

    let mut stats = MappedRegion::default();
    let mut leaf_block: Option<usize> = None;
    let mut offset = 0;
    while offset < region.size {
        let va = region.va.checked_add(offset).ok_or(MapError::OutOfRange)?;
        let pa = region.pa.checked_add(offset).ok_or(MapError::OutOfRange)?;
        let l2_index = pt_index(va, 2);

        if va.is_aligned(MEGAPAGE_SIZE)
            && pa.is_aligned(MEGAPAGE_SIZE)
            && region.size - offset >= MEGAPAGE_SIZE
        {
            let l2 = mem.frame(tables.l2).ok_or(MapError::Unreachable(tables.l2))?;
            if l2.entry(l2_index).is_valid() {
                return Err(MapError::Overlap);
            }
            l2.set_entry(l2_index, Pte::leaf(pa, flags));
            stats.megapages += 1;
            offset += MEGAPAGE_SIZE;
            continue;
        }

        match leaf_block {
            None => {
                install_pointer(mem, tables.l2, l2_index, tables.l3)?;
                leaf_block = Some(l2_index);
            }
            Some(block) if block == l2_index => {}
            Some(_) => return Err(MapError::ReservedExhausted),
        }
        let l3 = mem.frame(tables.l3).ok_or(MapError::Unreachable(tables.l3))?;
        let index = pt_index(va, 1);
        if l3.entry(index).is_valid() {
            return Err(MapError::Overlap);
        }
        l3.set_entry(index, Pte::leaf(pa, flags));
        stats.pages += 1;
        offset += PAGE_SIZE;
    }

    log_debug!(
        target: "mm",
        "mapped {} pa=0x{:x} va=0x{:x} size=0x{:x} ({} pages, {} megapages)",
        region.kind,
        region.pa,
        region.va,
        region.size,
        stats.pages,
        stats.megapages
    );
    Ok(stats)
}

/// Walks every page of `region` and returns the first virtual address that
/// does not translate to the expected frame with the class flags.
#[cfg(any(test, feature = "debug_pt_verify"))]
pub fn verify_region<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    region: &Region,
) -> Result<(), VirtAddr> {
    use super::page_table::translate;

    let mut offset = 0;
    while offset < region.size {
        let va = region.va.checked_add(offset).ok_or(region.va)?;
        let expected = region.pa.checked_add(offset).ok_or(va)?;
        match translate(mem, root, va) {
            Some(hit) if hit.pa == expected && hit.flags == region.kind.flags() => {}
            _ => return Err(va),
        }
        offset += PAGE_SIZE;
    }
    Ok(())
}
