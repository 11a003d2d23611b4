// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod virt;

use crate::types::PhysAddr;

/// Supervisor CSR state the boot sequence drives.
pub trait Hart {
    /// Physical address of the root table currently in `satp`.
    fn active_root(&self) -> PhysAddr;
    /// Points `satp` at `root` (Sv39, ASID 0) and fences the TLB.
    fn activate_root(&mut self, root: PhysAddr);
    /// Flushes the entire translation cache.
    fn flush_tlb(&mut self);
    /// PC the hart will return to in user mode (`sepc`).
    fn resume_pc(&self) -> usize;
    fn set_resume_pc(&mut self, pc: usize);
    /// Publishes the user stack pointer for the trap entry stub (`sscratch`).
    fn set_user_stack(&mut self, sp: usize);
    /// Installs the runtime trap handler in `stvec`.
    fn install_trap_vector(&mut self);
    /// Arms the supervisor timer `ticks` from now.
    fn arm_timer(&mut self, ticks: u64);
    /// Makes the FPU usable from user mode.
    fn enable_fpu(&mut self);
}
