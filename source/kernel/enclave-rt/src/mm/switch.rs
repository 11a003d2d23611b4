// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Root table switch and loader-root merge.
//!
//! The loader's root is captured by value before the switch so the merge
//! does not rely on the loader's mapping of its own root frame.

use super::{Frame, MapError, PhysMemory, PT_ENTRIES};
use crate::hal::Hart;
use crate::types::PhysAddr;

/// Copies every top-level entry valid in `loader` but empty in `new`.
///
/// Never overwrites; running it twice changes nothing the second time.
/// Returns how many entries were copied.
pub fn merge_loader_root(new: &mut Frame, loader: &Frame) -> usize {
    let mut copied = 0;
    for index in 0..PT_ENTRIES {
        let old = loader.entry(index);
        if old.is_valid() && !new.entry(index).is_valid() {
            new.set_entry(index, old);
            copied += 1;
        }
    }
    copied
}

/// Snapshot of the loader's root taken before switching away from it.
pub struct LoaderRoot {
    pub pa: PhysAddr,
    pub table: Frame,
}

/// Captures the active root, then activates `root`.
pub fn switch_root<M, H>(mem: &mut M, hart: &mut H, root: PhysAddr) -> Result<LoaderRoot, MapError>
where
    M: PhysMemory + ?Sized,
    H: Hart + ?Sized,
{
    let pa = hart.active_root();
    let table = mem.frame(pa).ok_or(MapError::Unreachable(pa))?.clone();
    hart.activate_root(root);
    log_debug!(target: "mm", "root switched 0x{:x} -> 0x{:x}", pa, root);
    Ok(LoaderRoot { pa, table })
}
