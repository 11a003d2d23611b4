// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Free-memory page pool handed to the runtime after boot
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameAllocator, FreeMemory::{new, alloc_frame, alloc_pages, reserve_prefix}
//! DEPENDS_ON: mm::page_table::map_page
//! INVARIANTS: Frames are handed out once, in ascending order; never beyond `end`

use super::{page_table::map_page, PageFlags, PhysMemory, PAGE_SIZE};
use crate::types::{PhysAddr, VirtAddr};

/// Source of zero-initialised-on-use physical frames.
pub trait FrameAllocator {
    /// Returns the next free frame, or `None` when the pool is exhausted.
    fn alloc_frame(&mut self) -> Option<PhysAddr>;
}

/// Bump allocator over the enclave's free-memory region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreeMemory {
    base: PhysAddr,
    end: PhysAddr,
    cursor: PhysAddr,
    va_base: VirtAddr,
}

impl FreeMemory {
    /// Initialises the pool over `[base, base + size)`, reachable at `va_base`.
    pub fn new(base: PhysAddr, size: usize, va_base: VirtAddr) -> Self {
        let base = PhysAddr::new(base.raw().next_multiple_of(PAGE_SIZE));
        let end = base
            .checked_add(size)
            .unwrap_or(PhysAddr::new(usize::MAX))
            .align_down(PAGE_SIZE);
        Self { base, end, cursor: base, va_base }
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }

    pub fn end(&self) -> PhysAddr {
        self.end
    }

    pub fn size(&self) -> usize {
        self.end.raw() - self.base.raw()
    }

    pub fn va_base(&self) -> VirtAddr {
        self.va_base
    }

    /// Next frame that would be handed out.
    pub fn cursor(&self) -> PhysAddr {
        self.cursor
    }

    pub fn allocated_pages(&self) -> usize {
        (self.cursor.raw() - self.base.raw()) / PAGE_SIZE
    }

    /// Marks the first `len` bytes of the pool as in use.
    ///
    /// Used after a fork restore, where the parent's pages now live at the
    /// start of this pool. Returns `false` if the pool is smaller than `len`
    /// or frames were already handed out past it.
    pub fn reserve_prefix(&mut self, len: usize) -> bool {
        let Some(target) = self.base.checked_add(len.next_multiple_of(PAGE_SIZE)) else {
            return false;
        };
        if target > self.end {
            return false;
        }
        if target > self.cursor {
            self.cursor = target;
        }
        true
    }

    /// Backs `count` pages starting at `va` with fresh zeroed frames.
    ///
    /// Returns how many pages were mapped; mapping stops at the first
    /// failure so callers compare against `count`.
    pub fn alloc_pages<M: PhysMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        root: PhysAddr,
        va: VirtAddr,
        count: usize,
        flags: PageFlags,
    ) -> usize {
        for i in 0..count {
            let Some(page_va) = va.checked_add(i * PAGE_SIZE) else { return i };
            let Some(frame) = self.alloc_frame() else { return i };
            match mem.frame(frame) {
                Some(f) => f.zero(),
                None => return i,
            }
            if let Err(err) = map_page(mem, root, page_va, frame, flags, self) {
                log_warn!(
                    target: "freemem",
                    "alloc_pages: map va=0x{:x} failed: {:?}",
                    page_va,
                    err
                );
                return i;
            }
        }
        count
    }
}

impl FrameAllocator for FreeMemory {
    fn alloc_frame(&mut self) -> Option<PhysAddr> {
        let next = self.cursor.checked_add(PAGE_SIZE)?;
        if next > self.end {
            return None;
        }
        let frame = self.cursor;
        self.cursor = next;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::translate;
    use crate::sim::SimMemory;

    fn pool(size: usize) -> FreeMemory {
        let va = VirtAddr::canonical(0xffff_ffff_4000_0000);
        FreeMemory::new(PhysAddr::new(0x8020_0000), size, va)
    }

    #[test]
    fn hands_out_ascending_frames_until_exhausted() {
        let mut pool = pool(3 * PAGE_SIZE);
        assert_eq!(pool.alloc_frame(), Some(PhysAddr::new(0x8020_0000)));
        assert_eq!(pool.alloc_frame(), Some(PhysAddr::new(0x8020_1000)));
        assert_eq!(pool.alloc_frame(), Some(PhysAddr::new(0x8020_2000)));
        assert_eq!(pool.alloc_frame(), None);
        assert_eq!(pool.allocated_pages(), 3);
    }

    #[test]
    fn partial_trailing_page_is_not_handed_out() {
        let mut pool = pool(PAGE_SIZE + 100);
        assert_eq!(pool.size(), PAGE_SIZE);
        assert!(pool.alloc_frame().is_some());
        assert_eq!(pool.alloc_frame(), None);
    }

    #[test]
    fn reserve_prefix_moves_cursor_forward_only() {
        let mut pool = pool(16 * PAGE_SIZE);
        assert!(pool.reserve_prefix(2 * PAGE_SIZE + 1));
        assert_eq!(pool.cursor(), PhysAddr::new(0x8020_3000));
        assert!(pool.reserve_prefix(PAGE_SIZE));
        assert_eq!(pool.cursor(), PhysAddr::new(0x8020_3000));
        assert!(!pool.reserve_prefix(17 * PAGE_SIZE));
    }

    #[test]
    fn alloc_pages_maps_zeroed_frames() {
        let mut mem = SimMemory::new(&[(0x8000_0000, 0x40_0000)]);
        let root = PhysAddr::new(0x8000_0000);
        // Dirty the frame the first data page will land on.
        mem.write_word(PhysAddr::new(0x8020_0000), 0xdead_beef);

        let mut pool = pool(16 * PAGE_SIZE);
        let va = VirtAddr::canonical(0x3ffe_0000);
        let flags = PageFlags::READ | PageFlags::WRITE | PageFlags::USER;
        assert_eq!(pool.alloc_pages(&mut mem, root, va, 4, flags), 4);

        let first = translate(&mut mem, root, va).expect("mapped");
        assert_eq!(first.pa, PhysAddr::new(0x8020_0000));
        assert_eq!(mem.read_word(first.pa), Some(0));
        assert!(translate(&mut mem, root, va.checked_add(3 * PAGE_SIZE).unwrap()).is_some());
    }

    #[test]
    fn alloc_pages_reports_shortfall() {
        let mut mem = SimMemory::new(&[(0x8000_0000, 0x40_0000)]);
        let root = PhysAddr::new(0x8000_0000);
        let mut pool = pool(4 * PAGE_SIZE);
        let flags = PageFlags::READ | PageFlags::WRITE;
        // Two frames go to intermediate tables, two to data pages.
        assert_eq!(pool.alloc_pages(&mut mem, root, VirtAddr::canonical(0x1000), 8, flags), 2);
    }
}
