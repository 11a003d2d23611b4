// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Initial user stack and the argc/argv/envp/auxv block on top of it.

use static_assertions::const_assert;

use super::BootError;
use crate::config::{USER_STACK_END, USER_STACK_SIZE, USER_STACK_START};
use crate::mm::{translate, FreeMemory, PageFlags, PhysMemory, PAGE_SIZE};
use crate::types::{PhysAddr, VirtAddr};

/// End of the auxiliary vector.
pub const AT_NULL: usize = 0;
/// Auxiliary vector key carrying the page size.
pub const AT_PAGESZ: usize = 6;

/// Words pushed below the stack top, padded to a 16-byte multiple.
const ENV_BLOCK: [usize; 8] = [
    0, // argc
    0, // argv terminator
    0, // envp terminator
    AT_PAGESZ,
    PAGE_SIZE,
    AT_NULL,
    0,
    0,
];

const_assert!((ENV_BLOCK.len() * core::mem::size_of::<usize>()) % 16 == 0);

/// Backs the user stack with fresh pages from the pool.
pub fn map_user_stack<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    freemem: &mut FreeMemory,
) -> Result<(), BootError> {
    let wanted = USER_STACK_SIZE / PAGE_SIZE;
    let flags = PageFlags::READ
        | PageFlags::WRITE
        | PageFlags::ACCESSED
        | PageFlags::DIRTY
        | PageFlags::USER;
    let mapped = freemem.alloc_pages(mem, root, VirtAddr::canonical(USER_STACK_END), wanted, flags);
    if mapped != wanted {
        return Err(BootError::StackExhausted { mapped, wanted });
    }
    Ok(())
}

/// Writes the startup block below `top` and returns the resulting stack pointer.
pub fn push_env_block<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    top: VirtAddr,
) -> Result<usize, BootError> {
    let size = ENV_BLOCK.len() * core::mem::size_of::<usize>();
    let sp = top.checked_sub(size).ok_or(BootError::EnvUnwritable)?;
    let sp = VirtAddr::canonical(sp.raw() & !0xf);
    for (i, word) in ENV_BLOCK.iter().enumerate() {
        let va = sp.checked_add(i * core::mem::size_of::<usize>()).ok_or(BootError::EnvUnwritable)?;
        let hit = translate(mem, root, va).ok_or(BootError::EnvUnwritable)?;
        if !mem.write_word(hit.pa, *word) {
            return Err(BootError::EnvUnwritable);
        }
    }
    Ok(sp.raw())
}

/// Cold-boot user stack: map it, fill the startup block, return `sp`.
pub fn setup_user_stack<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    freemem: &mut FreeMemory,
) -> Result<usize, BootError> {
    map_user_stack(mem, root, freemem)?;
    let sp = push_env_block(mem, root, VirtAddr::canonical(USER_STACK_START))?;
    log_debug!(
        target: "boot",
        "user stack [0x{:x}, 0x{:x}) sp=0x{:x}",
        USER_STACK_END,
        USER_STACK_START,
        sp
    );
    Ok(sp)
}
