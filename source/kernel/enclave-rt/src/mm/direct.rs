// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical memory reached through the runtime's linear windows.
//!
//! Addresses no window covers are assumed identity mapped by the loader
//! (its root and tables live there), but only inside enclave DRAM. Anything
//! else is unreachable.

use super::{Frame, PhysMemory, PAGE_SIZE};
use crate::types::{OffsetTable, PhysAddr};

pub struct DirectMap<T: OffsetTable> {
    windows: T,
    dram_base: PhysAddr,
    dram_end: PhysAddr,
}

impl<T: OffsetTable> DirectMap<T> {
    pub fn new(windows: T, dram_base: PhysAddr, dram_size: usize) -> Self {
        let dram_end = dram_base.checked_add(dram_size).unwrap_or(dram_base);
        Self { windows, dram_base, dram_end }
    }

    /// Virtual address the frame holding `pa` is reachable at.
    fn locate(&self, pa: PhysAddr) -> Option<usize> {
        let page = pa.align_down(PAGE_SIZE);
        if let Some(va) = page.to_virtual(&self.windows) {
            return Some(va.raw());
        }
        (page >= self.dram_base && page < self.dram_end).then(|| page.raw())
    }
}

impl<T: OffsetTable> PhysMemory for DirectMap<T> {
    fn frame(&mut self, pa: PhysAddr) -> Option<&mut Frame> {
        let va = self.locate(pa)?;
        // SAFETY: every window and the loader's identity range over DRAM map
        // whole, page-aligned frames; boot runs single-threaded with
        // exclusive ownership of the frames it touches.
        unsafe { (va as *mut Frame).as_mut() }
    }
}
