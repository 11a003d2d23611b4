// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Compile-time layout of the enclave address space.

use static_assertions::{const_assert, const_assert_eq};

use crate::mm::{pt_index, GIGAPAGE_SIZE, MEGAPAGE_SIZE, PAGE_SIZE};
use crate::types::VirtAddr;

/// Window through which the runtime reaches the user image.
pub const USER_WINDOW_VA: VirtAddr = VirtAddr::canonical(0xffff_ffff_0000_0000);
/// Window over the free-memory pool.
pub const FREEMEM_WINDOW_VA: VirtAddr = VirtAddr::canonical(0xffff_ffff_4000_0000);
/// Window over the buffer shared with the host.
pub const UNTRUSTED_WINDOW_VA: VirtAddr = VirtAddr::canonical(0xffff_ffff_8000_0000);
/// Default runtime link address, used when the image does not report its own.
pub const RUNTIME_WINDOW_VA: VirtAddr = VirtAddr::canonical(0xffff_ffff_c000_0000);

/// Top of the initial user stack; the stack grows down from here.
pub const USER_STACK_START: usize = 0x4000_0000;
pub const USER_STACK_SIZE: usize = 0x2_0000;
pub const USER_STACK_END: usize = USER_STACK_START - USER_STACK_SIZE;

/// Start of the anonymous-mapping area; the program break begins 1 GiB above it.
pub const ANON_REGION_START: usize = 0x20_0000_0000;
pub const PROGRAM_BREAK: usize = ANON_REGION_START + GIGAPAGE_SIZE;

/// Timer ticks until the first supervisor timer interrupt.
pub const TIMER_TICK: u64 = 10_000;

/// Bytes of the trapping `ecall` a forked child resumes after.
pub const ECALL_WIDTH: usize = 4;

const_assert!(USER_STACK_SIZE % PAGE_SIZE == 0);
const_assert!(USER_STACK_START % PAGE_SIZE == 0);
const_assert!(PROGRAM_BREAK < USER_WINDOW_VA.raw());
const_assert!(USER_STACK_START <= ANON_REGION_START);
const_assert!(USER_WINDOW_VA.raw() % GIGAPAGE_SIZE == 0);
const_assert!(FREEMEM_WINDOW_VA.raw() % GIGAPAGE_SIZE == 0);
const_assert!(UNTRUSTED_WINDOW_VA.raw() % GIGAPAGE_SIZE == 0);
const_assert!(RUNTIME_WINDOW_VA.raw() % MEGAPAGE_SIZE == 0);
const_assert_eq!(pt_index(USER_WINDOW_VA, 3), 508);
const_assert_eq!(pt_index(FREEMEM_WINDOW_VA, 3), 509);
const_assert_eq!(pt_index(UNTRUSTED_WINDOW_VA, 3), 510);
const_assert_eq!(pt_index(RUNTIME_WINDOW_VA, 3), 511);
