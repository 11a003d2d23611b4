// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Enclave runtime cold boot and address-space isolation
//! OWNERS: @kernel-team
//! PUBLIC API: boot::boot, fork::read_fork_request, mm::*, edge::*, hal::Hart
//! DEPENDS_ON: bitflags, spin, riscv, static_assertions, sbi-rt (enclave target)
//! INVARIANTS: Sv39 only; no heap; all table writes happen before user mode

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

#[macro_use]
pub mod diag;

pub mod boot;
pub mod config;
pub mod edge;
pub mod fork;
pub mod hal;
pub mod mm;
pub mod types;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod arch;
#[cfg(all(target_arch = "riscv64", target_os = "none", not(test)))]
mod entry;
#[cfg(all(target_arch = "riscv64", target_os = "none", not(test)))]
pub use entry::runtime_layout;

#[cfg(test)]
mod sim;
