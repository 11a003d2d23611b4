// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 paging primitives used by the boot sequence.

pub mod freemem;
pub mod page_table;
pub mod pte;
pub mod remap;
pub mod reserved;
pub mod switch;

pub use freemem::{FrameAllocator, FreeMemory};
pub use page_table::{pt_index, translate, Translation};
pub use pte::{LEAF_PERMS, PageFlags, Pte};

use static_assertions::const_assert_eq;

use crate::types::PhysAddr;

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: usize = 12;
/// Number of entries per Sv39 page table.
pub const PT_ENTRIES: usize = 512;
pub const PT_INDEX_BITS: usize = 9;
/// Levels in the Sv39 tree. Level 1 holds 4 KiB leaves, level 3 is the root.
pub const PT_LEVELS: usize = 3;
/// Bytes mapped by one level-2 entry.
pub const MEGAPAGE_SIZE: usize = level_page_size(2);
/// Bytes mapped by one root entry.
pub const GIGAPAGE_SIZE: usize = level_page_size(3);

const_assert_eq!(PAGE_SIZE, 1 << PAGE_SHIFT);
const_assert_eq!(PT_ENTRIES, 1 << PT_INDEX_BITS);
const_assert_eq!(core::mem::size_of::<Frame>(), PAGE_SIZE);
const_assert_eq!(usize::BITS, 64);

/// Bytes covered by a single entry of a table at `level` (1 = leaf level).
pub const fn level_page_size(level: usize) -> usize {
    PAGE_SIZE << (PT_INDEX_BITS * (level - 1))
}

/// Error returned by page-table construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// Virtual or physical address was not page aligned.
    Unaligned,
    /// Mapping leaves the canonical Sv39 range or the tables reserved for it.
    OutOfRange,
    /// Mapping collides with an existing entry.
    Overlap,
    /// The single reserved leaf table cannot cover the 4 KiB part of the region.
    ReservedExhausted,
    /// A table frame could not be reached through physical memory access.
    Unreachable(PhysAddr),
    /// The free-memory pool ran out of frames.
    OutOfMemory,
}

/// One physical page viewed either as a page table or as raw words.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct Frame {
    words: [usize; PT_ENTRIES],
}

impl Frame {
    pub const fn zeroed() -> Self {
        Self { words: [0; PT_ENTRIES] }
    }

    #[inline]
    pub fn entry(&self, index: usize) -> Pte {
        Pte::from_bits(self.words[index])
    }

    #[inline]
    pub fn set_entry(&mut self, index: usize, pte: Pte) {
        self.words[index] = pte.bits();
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, Pte)> + '_ {
        self.words.iter().enumerate().map(|(i, w)| (i, Pte::from_bits(*w)))
    }

    pub fn zero(&mut self) {
        self.words = [0; PT_ENTRIES];
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the frame is exactly PAGE_SIZE initialised bytes and u8 has no alignment needs.
        unsafe { core::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), PAGE_SIZE) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; every byte pattern is a valid usize.
        unsafe { core::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), PAGE_SIZE) }
    }
}

/// Access to physical frames by physical address.
///
/// The hardware implementation dereferences the runtime's linear windows;
/// host tests back it with a sparse frame map. Byte helpers split accesses
/// at page boundaries and report `false` as soon as a page is unreachable.
pub trait PhysMemory {
    /// Frame containing `pa`, or `None` if the runtime cannot reach it.
    fn frame(&mut self, pa: PhysAddr) -> Option<&mut Frame>;

    fn read(&mut self, pa: PhysAddr, out: &mut [u8]) -> bool {
        let mut done = 0;
        while done < out.len() {
            let Some(cur) = pa.checked_add(done) else { return false };
            let off = cur.page_offset();
            let n = core::cmp::min(PAGE_SIZE - off, out.len() - done);
            let Some(frame) = self.frame(cur) else { return false };
            out[done..done + n].copy_from_slice(&frame.as_bytes()[off..off + n]);
            done += n;
        }
        true
    }

    fn write(&mut self, pa: PhysAddr, data: &[u8]) -> bool {
        let mut done = 0;
        while done < data.len() {
            let Some(cur) = pa.checked_add(done) else { return false };
            let off = cur.page_offset();
            let n = core::cmp::min(PAGE_SIZE - off, data.len() - done);
            let Some(frame) = self.frame(cur) else { return false };
            frame.as_bytes_mut()[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        true
    }

    /// Copies `len` bytes between non-overlapping physical ranges.
    fn copy(&mut self, src: PhysAddr, dst: PhysAddr, len: usize) -> bool {
        let mut bounce = [0u8; 512];
        let mut done = 0;
        while done < len {
            let n = core::cmp::min(bounce.len(), len - done);
            let (Some(s), Some(d)) = (src.checked_add(done), dst.checked_add(done)) else {
                return false;
            };
            if !self.read(s, &mut bounce[..n]) || !self.write(d, &bounce[..n]) {
                return false;
            }
            done += n;
        }
        true
    }

    fn read_word(&mut self, pa: PhysAddr) -> Option<usize> {
        let mut raw = [0u8; 8];
        self.read(pa, &mut raw).then(|| usize::from_le_bytes(raw))
    }

    fn write_word(&mut self, pa: PhysAddr, value: usize) -> bool {
        self.write(pa, &value.to_le_bytes())
    }
}

#[cfg(any(test, all(target_arch = "riscv64", target_os = "none")))]
pub mod direct;

#[cfg(test)]
mod tests_prop;
