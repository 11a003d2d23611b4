// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address newtypes for the boot path
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PhysAddr, VirtAddr, OffsetTable
//! DEPENDS_ON: mm::PAGE_SIZE
//! INVARIANTS: VirtAddr is always canonical Sv39; no implicit usize -> address coercions
//!
//! Physical and virtual addresses never mix: conversion goes through an
//! [`OffsetTable`] describing which windows the runtime has mapped, and both
//! directions can fail.

use core::fmt;

use crate::mm::{PAGE_SHIFT, PAGE_SIZE};

/// Number of significant virtual-address bits under Sv39.
pub const VA_BITS: u32 = 39;

/// A physical address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Builds the address of the first byte of physical page `ppn`.
    #[inline]
    pub const fn from_ppn(ppn: usize) -> Self {
        Self(ppn << PAGE_SHIFT)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Physical page number containing this address.
    #[inline]
    pub const fn ppn(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 % align == 0
    }

    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        Self(self.0 & !(align - 1))
    }

    #[inline]
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Byte distance from `base` up to `self`, if `self` is not below `base`.
    #[inline]
    pub fn offset_from(self, base: PhysAddr) -> Option<usize> {
        self.0.checked_sub(base.0)
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// A canonical Sv39 virtual address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    #[inline]
    pub fn new(addr: usize) -> Option<Self> {
        if is_canonical_sv39(addr) {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Constant constructor for layout constants; non-canonical input fails const evaluation.
    pub const fn canonical(addr: usize) -> Self {
        assert!(is_canonical_sv39(addr), "non-canonical Sv39 address");
        Self(addr)
    }

    #[inline]
    pub fn page_aligned(addr: usize) -> Option<Self> {
        Self::new(addr).filter(|va| va.0 % PAGE_SIZE == 0)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 % align == 0
    }

    /// Virtual page number with the sign-extension bits stripped.
    #[inline]
    pub const fn vpn(self) -> usize {
        (self.0 >> PAGE_SHIFT) & ((1 << (VA_BITS as usize - PAGE_SHIFT)) - 1)
    }

    /// Adds `bytes`, failing on overflow or when the result leaves the canonical range.
    #[inline]
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).and_then(Self::new)
    }

    #[inline]
    pub fn checked_sub(self, bytes: usize) -> Option<Self> {
        self.0.checked_sub(bytes).and_then(Self::new)
    }

    #[inline]
    pub fn offset_from(self, base: VirtAddr) -> Option<usize> {
        self.0.checked_sub(base.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Returns true when bits 63..39 replicate bit 38.
pub const fn is_canonical_sv39(va: usize) -> bool {
    let sign = (va >> (VA_BITS - 1)) & 1;
    let upper = va >> VA_BITS;
    if sign == 0 {
        upper == 0
    } else {
        upper == usize::MAX >> VA_BITS
    }
}

/// Describes the linear windows through which the runtime reaches physical memory.
pub trait OffsetTable {
    /// Runtime virtual address of `pa`, if some window covers it.
    fn phys_to_virt(&self, pa: PhysAddr) -> Option<VirtAddr>;
    /// Physical address behind `va`, if some window covers it.
    fn virt_to_phys(&self, va: VirtAddr) -> Option<PhysAddr>;
}

impl PhysAddr {
    #[inline]
    pub fn to_virtual<T: OffsetTable + ?Sized>(self, table: &T) -> Option<VirtAddr> {
        table.phys_to_virt(self)
    }
}

impl VirtAddr {
    #[inline]
    pub fn to_physical<T: OffsetTable + ?Sized>(self, table: &T) -> Option<PhysAddr> {
        table.virt_to_phys(self)
    }
}
