// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fork restore; retargets leaves of a cloned tree onto the child's pool
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! TEST_COVERAGE: mm::tests (edge cases, cycles) + mm::tests_prop (random trees)
//! PUBLIC API: RemapRange, SlotMask, RemapStats, remap_tree
//! DEPENDS_ON: mm::{pte, PhysMemory}
//! INVARIANTS: Only 4 KiB leaves inside the parent range change, and only their PPN;
//!             pointer entries are never written; recursion depth <= PT_LEVELS;
//!             pointers back to the root or their own table are not followed

use super::{PhysMemory, PAGE_SHIFT, PT_ENTRIES, PT_INDEX_BITS, PT_LEVELS};
use crate::types::PhysAddr;

/// Parent pool being replaced and where its contents now live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemapRange {
    pub parent_start: PhysAddr,
    pub parent_end: PhysAddr,
    pub child_base: PhysAddr,
}

impl RemapRange {
    /// New location of `pa`, or `None` if it lies outside the parent pool.
    pub fn translate(&self, pa: PhysAddr) -> Option<PhysAddr> {
        if pa < self.parent_start || pa >= self.parent_end {
            return None;
        }
        self.child_base.checked_add(pa.offset_from(self.parent_start)?)
    }
}

/// Set of root-table slots the walk leaves alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotMask([u64; PT_ENTRIES / 64]);

impl SlotMask {
    pub const EMPTY: Self = Self([0; PT_ENTRIES / 64]);

    #[must_use]
    pub const fn with(mut self, slot: usize) -> Self {
        self.0[slot / 64] |= 1 << (slot % 64);
        self
    }

    pub const fn contains(&self, slot: usize) -> bool {
        self.0[slot / 64] & (1 << (slot % 64)) != 0
    }
}

/// Counters reported by [`remap_tree`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemapStats {
    /// 4 KiB leaves visited.
    pub leaves_seen: usize,
    /// Leaves whose frame moved to the child pool.
    pub remapped: usize,
    /// Megapage or gigapage leaves left as they were.
    pub superpages: usize,
    /// Pointer entries leading back to the root or to their own table.
    pub loops: usize,
}

/// Virtual page number prefix after descending through `index` at `level`.
///
/// Root indices with the top bit set belong to the upper half of the
/// canonical space and are sign-extended.
pub(crate) const fn descend_vpn(prefix: usize, index: usize, level: usize) -> usize {
    if level == PT_LEVELS && index & (PT_ENTRIES >> 1) != 0 {
        (usize::MAX << PT_INDEX_BITS) | index
    } else {
        (prefix << PT_INDEX_BITS) | index
    }
}

/// Rewrites every leaf under `root` that points into the parent pool.
pub fn remap_tree<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    range: &RemapRange,
    skip: &SlotMask,
) -> RemapStats {
    let mut stats = RemapStats::default();
    let mut walk = Walk { root, range, skip, stats: &mut stats };
    walk.table(mem, root, PT_LEVELS, 0);
    log_debug!(
        target: "remap",
        "parent [0x{:x}, 0x{:x}) -> 0x{:x}: {} of {} leaves moved",
        range.parent_start,
        range.parent_end,
        range.child_base,
        stats.remapped,
        stats.leaves_seen
    );
    stats
}

struct Walk<'a> {
    root: PhysAddr,
    range: &'a RemapRange,
    skip: &'a SlotMask,
    stats: &'a mut RemapStats,
}

impl Walk<'_> {
    fn table<M: PhysMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        table: PhysAddr,
        level: usize,
        prefix: usize,
    ) {
        assert!((1..=PT_LEVELS).contains(&level), "page-table walk past depth {}", PT_LEVELS);

        for index in 0..PT_ENTRIES {
            if level == PT_LEVELS && self.skip.contains(index) {
                continue;
            }
            let Some(frame) = mem.frame(table) else {
                log_warn!(
                    target: "remap",
                    "table 0x{:x} (level {}) unreachable, skipped",
                    table,
                    level
                );
                return;
            };
            let entry = frame.entry(index);
            if !entry.is_valid() {
                continue;
            }
            let vpn = descend_vpn(prefix, index, level);

            if !entry.is_leaf() {
                if level == 1 {
                    log_warn!(
                        target: "remap",
                        "pointer entry in leaf table 0x{:x}[{}]",
                        table,
                        index
                    );
                    continue;
                }
                let child = entry.phys_addr();
                if child == self.root || child == table {
                    // Walking it again would read its entries at the wrong level.
                    self.stats.loops += 1;
                    log_warn!(
                        target: "remap",
                        "table 0x{:x}[{}] loops back to 0x{:x}, skipped",
                        table,
                        index,
                        child
                    );
                    continue;
                }
                self.table(mem, child, level - 1, vpn);
                continue;
            }

            if level > 1 {
                self.stats.superpages += 1;
                log_warn!(
                    target: "remap",
                    "superpage leaf at level {} va=0x{:x} left in place",
                    level,
                    vpn << (PAGE_SHIFT + PT_INDEX_BITS * (level - 1))
                );
                continue;
            }

            self.stats.leaves_seen += 1;
            if let Some(moved) = self.range.translate(entry.phys_addr()) {
                frame.set_entry(index, entry.with_phys_addr(moved));
                self.stats.remapped += 1;
                log_trace!(
                    target: "remap",
                    "va=0x{:x} 0x{:x} -> 0x{:x}",
                    vpn << PAGE_SHIFT,
                    entry.phys_addr(),
                    moved
                );
            }
        }
    }
}
