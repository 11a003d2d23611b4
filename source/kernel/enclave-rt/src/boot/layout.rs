// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot parameters and the four windows derived from them.

use crate::config::{FREEMEM_WINDOW_VA, RUNTIME_WINDOW_VA, UNTRUSTED_WINDOW_VA, USER_WINDOW_VA};
use crate::edge::SharedBuffer;
use crate::mm::remap::SlotMask;
use crate::mm::reserved::{Region, RegionError, RegionKind, ReservedPair};
use crate::mm::PAGE_SIZE;
use crate::types::{OffsetTable, PhysAddr, VirtAddr};

/// What the loader tells the runtime about enclave memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootParams {
    pub dram_base: PhysAddr,
    pub dram_size: usize,
    pub runtime_pa: PhysAddr,
    pub user_pa: PhysAddr,
    pub free_pa: PhysAddr,
    pub untrusted_pa: PhysAddr,
    pub untrusted_size: usize,
    /// Address the runtime image is linked at.
    pub runtime_va: VirtAddr,
}

impl BootParams {
    /// Parameters with the runtime at its default link address.
    pub const fn new(
        dram_base: usize,
        dram_size: usize,
        runtime_pa: usize,
        user_pa: usize,
        free_pa: usize,
        untrusted_pa: usize,
        untrusted_size: usize,
    ) -> Self {
        Self {
            dram_base: PhysAddr::new(dram_base),
            dram_size,
            runtime_pa: PhysAddr::new(runtime_pa),
            user_pa: PhysAddr::new(user_pa),
            free_pa: PhysAddr::new(free_pa),
            untrusted_pa: PhysAddr::new(untrusted_pa),
            untrusted_size,
            runtime_va: RUNTIME_WINDOW_VA,
        }
    }
}

/// The windows installed by one boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Regions {
    pub runtime: Region,
    pub user: Region,
    pub free: Region,
    pub untrusted: Region,
}

impl Regions {
    /// Validates `params` and places each region in its window.
    pub fn from_params(params: &BootParams) -> Result<Self, RegionError> {
        let dram_end =
            params.dram_base.checked_add(params.dram_size).ok_or(RegionError::Misordered)?;
        let ordered = params.dram_base <= params.runtime_pa
            && params.runtime_pa < params.user_pa
            && params.user_pa < params.free_pa
            && params.free_pa <= dram_end;
        if !ordered {
            return Err(RegionError::Misordered);
        }
        if !params.dram_base.is_aligned(PAGE_SIZE) || params.dram_size % PAGE_SIZE != 0 {
            return Err(RegionError::Misordered);
        }

        let runtime = Region::new(
            RegionKind::Runtime,
            params.runtime_pa,
            params.user_pa.raw() - params.runtime_pa.raw(),
            params.runtime_va,
        )?;
        let user = Region::in_window(
            RegionKind::User,
            USER_WINDOW_VA,
            params.user_pa,
            params.free_pa.raw() - params.user_pa.raw(),
        )?;
        let free = Region::in_window(
            RegionKind::Free,
            FREEMEM_WINDOW_VA,
            params.free_pa,
            dram_end.raw() - params.free_pa.raw(),
        )?;
        let untrusted = Region::in_window(
            RegionKind::Untrusted,
            UNTRUSTED_WINDOW_VA,
            params.untrusted_pa,
            params.untrusted_size,
        )?;

        let regions = Self { runtime, user, free, untrusted };
        let all = regions.all();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                if a.root_slot() == b.root_slot() {
                    return Err(RegionError::LayoutCollision(a.kind, b.kind));
                }
            }
        }
        Ok(regions)
    }

    /// Regions in installation order.
    pub fn all(&self) -> [Region; 4] {
        [self.runtime, self.user, self.free, self.untrusted]
    }

    /// Root slots owned by the runtime's own windows.
    pub fn window_slots(&self) -> SlotMask {
        self.all().iter().fold(SlotMask::EMPTY, |mask, r| mask.with(r.root_slot()))
    }

    pub fn shared_buffer(&self) -> SharedBuffer {
        SharedBuffer { pa: self.untrusted.pa, size: self.untrusted.size }
    }
}

impl OffsetTable for Regions {
    fn phys_to_virt(&self, pa: PhysAddr) -> Option<VirtAddr> {
        self.all().iter().find_map(|r| r.va_of(pa))
    }

    fn virt_to_phys(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.all().iter().find_map(|r| r.pa_of(va))
    }
}

/// Statically reserved table frames: the new root plus one L2/L3 pair per window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservedTables {
    pub root: PhysAddr,
    pub runtime: ReservedPair,
    pub user: ReservedPair,
    pub free: ReservedPair,
    pub untrusted: ReservedPair,
}

impl ReservedTables {
    pub const FRAMES: usize = 9;

    /// Nine consecutive frames starting at `base`.
    pub fn contiguous(base: PhysAddr) -> Self {
        let frame = |i: usize| PhysAddr::new(base.raw() + i * PAGE_SIZE);
        Self {
            root: frame(0),
            runtime: ReservedPair { l2: frame(1), l3: frame(2) },
            user: ReservedPair { l2: frame(3), l3: frame(4) },
            free: ReservedPair { l2: frame(5), l3: frame(6) },
            untrusted: ReservedPair { l2: frame(7), l3: frame(8) },
        }
    }

    pub fn pair(&self, kind: RegionKind) -> ReservedPair {
        match kind {
            RegionKind::Runtime => self.runtime,
            RegionKind::User => self.user,
            RegionKind::Free => self.free,
            RegionKind::Untrusted => self.untrusted,
        }
    }

    pub fn frames(&self) -> [PhysAddr; Self::FRAMES] {
        [
            self.root,
            self.runtime.l2,
            self.runtime.l3,
            self.user.l2,
            self.user.l3,
            self.free.l2,
            self.free.l3,
            self.untrusted.l2,
            self.untrusted.l3,
        ]
    }
}
