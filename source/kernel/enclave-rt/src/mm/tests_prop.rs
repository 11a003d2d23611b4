// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the remap walker and root merge
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no mm logic.
//!
//! TEST_SCOPE:
//!   - Remap moves exactly the leaves inside the parent range, by the same offset
//!   - Remap keeps every flag bit and every pointer entry
//!   - Merge is additive and idempotent
//!
//! TEST_SCENARIOS:
//!   - remap_moves_in_range_leaves_only(): random leaves vs random parent range
//!   - merge_is_additive_and_idempotent(): random loader/new root occupancy

use super::remap::{remap_tree, RemapRange, SlotMask};
use super::switch::merge_loader_root;
use super::{Frame, PhysMemory, Pte, PAGE_SIZE, PT_ENTRIES};
use crate::sim::SimMemory;
use crate::types::PhysAddr;
use proptest::prelude::*;

const ROOT: PhysAddr = PhysAddr::new(0x8000_0000);
const L2: PhysAddr = PhysAddr::new(0x8000_1000);
const L3: PhysAddr = PhysAddr::new(0x8000_2000);
const FRAMES: usize = 0x9000_0000;

fn arb_leaf() -> impl Strategy<Value = (usize, usize, usize)> {
    // (leaf-table index, target page, low flag bits incl. RSW)
    (0usize..PT_ENTRIES, 0usize..1024, 0usize..0x400)
        .prop_map(|(index, page, low)| (index, page, (low | 0b11) & !0b1000))
}

fn arb_slots() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..PT_ENTRIES, 0..24)
}

proptest! {
    #[test]
    fn remap_moves_in_range_leaves_only(
        leaves in prop::collection::vec(arb_leaf(), 1..48),
        start_page in 0usize..1024,
        span_pages in 0usize..512,
        child_page in 0usize..2048,
        slot in 0usize..PT_ENTRIES,
    ) {
        let mut mem = SimMemory::new(&[(0x8000_0000, 0x10_0000)]);
        mem.frame(ROOT).unwrap().set_entry(slot, Pte::table(L2));
        mem.frame(L2).unwrap().set_entry(7, Pte::table(L3));
        for &(index, page, low) in &leaves {
            let pa = PhysAddr::new(FRAMES + page * PAGE_SIZE);
            mem.frame(L3).unwrap().set_entry(index, Pte::from_bits((pa.ppn() << 10) | low));
        }
        let before = mem.frame(L3).unwrap().clone();
        let root_before = mem.frame(ROOT).unwrap().clone();
        let l2_before = mem.frame(L2).unwrap().clone();

        let range = RemapRange {
            parent_start: PhysAddr::new(FRAMES + start_page * PAGE_SIZE),
            parent_end: PhysAddr::new(FRAMES + (start_page + span_pages) * PAGE_SIZE),
            child_base: PhysAddr::new(0xa000_0000 + child_page * PAGE_SIZE),
        };
        let stats = remap_tree(&mut mem, ROOT, &range, &SlotMask::EMPTY);

        let after = mem.frame(L3).unwrap().clone();
        let mut expected_moves = 0;
        for ((_, old), (_, new)) in before.entries().zip(after.entries()) {
            if !old.is_valid() {
                prop_assert_eq!(new, old);
                continue;
            }
            prop_assert_eq!(new.bits() & 0x3ff, old.bits() & 0x3ff);
            let pa = old.phys_addr();
            if pa >= range.parent_start && pa < range.parent_end {
                expected_moves += 1;
                let offset = pa.raw() - range.parent_start.raw();
                prop_assert_eq!(new.phys_addr(), PhysAddr::new(range.child_base.raw() + offset));
            } else {
                prop_assert_eq!(new, old);
            }
        }
        prop_assert_eq!(stats.remapped, expected_moves);
        prop_assert!(root_before.entries().eq(mem.frame(ROOT).unwrap().entries()));
        prop_assert!(l2_before.entries().eq(mem.frame(L2).unwrap().entries()));
    }

    #[test]
    fn merge_is_additive_and_idempotent(loader_slots in arb_slots(), new_slots in arb_slots()) {
        let mut loader = Frame::zeroed();
        for &slot in &loader_slots {
            loader.set_entry(slot, Pte::table(PhysAddr::new(0x8100_0000 + slot * PAGE_SIZE)));
        }
        let mut new = Frame::zeroed();
        for &slot in &new_slots {
            new.set_entry(slot, Pte::table(PhysAddr::new(0x8200_0000 + slot * PAGE_SIZE)));
        }
        let original = new.clone();

        merge_loader_root(&mut new, &loader);
        for index in 0..PT_ENTRIES {
            if original.entry(index).is_valid() {
                prop_assert_eq!(new.entry(index), original.entry(index));
            } else {
                prop_assert_eq!(new.entry(index), loader.entry(index));
            }
        }

        let once = new.clone();
        prop_assert_eq!(merge_loader_root(&mut new, &loader), 0);
        prop_assert!(once.entries().eq(new.entries()));
    }
}
