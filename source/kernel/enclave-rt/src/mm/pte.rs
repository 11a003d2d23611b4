// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 page-table entry encoding.

use bitflags::bitflags;

use crate::types::PhysAddr;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in Sv39 page-table entries.
    pub struct PageFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

/// Permission bits whose presence marks an entry as a leaf.
pub const LEAF_PERMS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);

/// Low bits carried verbatim when an entry is retargeted (flags plus the two RSW bits).
const FLAG_MASK: usize = 0x3ff;
const PPN_SHIFT: usize = 10;
const PPN_MASK: usize = (1 << 44) - 1;

/// A single Sv39 page-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(usize);

impl Pte {
    pub const INVALID: Self = Self(0);

    #[inline]
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(self) -> usize {
        self.0
    }

    /// Leaf entry mapping the page at `pa`.
    #[inline]
    pub fn leaf(pa: PhysAddr, flags: PageFlags) -> Self {
        debug_assert!(flags.intersects(LEAF_PERMS), "leaf without R/W/X");
        Self((pa.ppn() << PPN_SHIFT) | (flags | PageFlags::VALID).bits())
    }

    /// Pointer entry referencing the next-level table at `table`.
    #[inline]
    pub fn table(table: PhysAddr) -> Self {
        Self((table.ppn() << PPN_SHIFT) | PageFlags::VALID.bits())
    }

    #[inline]
    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0)
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 & PageFlags::VALID.bits() != 0
    }

    /// Valid with at least one of R/W/X.
    #[inline]
    pub fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().intersects(LEAF_PERMS)
    }

    /// Physical address of the child table for pointer entries.
    #[inline]
    pub fn child_table(self) -> Option<PhysAddr> {
        (self.is_valid() && !self.is_leaf()).then(|| self.phys_addr())
    }

    #[inline]
    pub fn ppn(self) -> usize {
        (self.0 >> PPN_SHIFT) & PPN_MASK
    }

    /// Physical address named by the page-number field.
    #[inline]
    pub fn phys_addr(self) -> PhysAddr {
        PhysAddr::from_ppn(self.ppn())
    }

    /// Same entry pointing at `pa`, every low flag bit preserved.
    #[inline]
    pub fn with_phys_addr(self, pa: PhysAddr) -> Self {
        Self((pa.ppn() << PPN_SHIFT) | (self.0 & FLAG_MASK))
    }
}
