// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! HAL implementation for the hart the enclave runs on.

use crate::arch::riscv;
use crate::types::PhysAddr;

use super::Hart;

extern "C" {
    /// Trap entry stub provided by the runtime's assembly.
    fn encl_trap_handler();
}

/// The executing hart, driven through its supervisor CSRs.
pub struct RiscvHart;

impl Hart for RiscvHart {
    fn active_root(&self) -> PhysAddr {
        PhysAddr::from_ppn(riscv::read_root_ppn())
    }

    fn activate_root(&mut self, root: PhysAddr) {
        riscv::write_root_ppn(root.ppn());
    }

    fn flush_tlb(&mut self) {
        riscv::sfence_all();
    }

    fn resume_pc(&self) -> usize {
        riscv::read_sepc()
    }

    fn set_resume_pc(&mut self, pc: usize) {
        riscv::write_sepc(pc);
    }

    fn set_user_stack(&mut self, sp: usize) {
        riscv::write_sscratch(sp);
    }

    fn install_trap_vector(&mut self) {
        riscv::configure_traps(encl_trap_handler as usize);
    }

    fn arm_timer(&mut self, ticks: u64) {
        riscv::set_timer(riscv::read_time().wrapping_add(ticks));
        riscv::enable_timer_interrupts();
    }

    fn enable_fpu(&mut self) {
        riscv::enable_fpu();
    }
}
