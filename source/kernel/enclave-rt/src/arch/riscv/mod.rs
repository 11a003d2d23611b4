// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V supervisor CSR helpers used by the enclave runtime.
//!
//! Thin wrappers over the `riscv` crate's register accessors plus the SBI
//! calls the boot path needs. Only built for the enclave target.

use riscv::register::{
    satp::{self, Mode},
    sepc, sie, sscratch,
    sstatus::{self, FS},
    stvec::{self, TrapMode},
    time,
};

/// Physical page number of the active root table.
#[inline]
pub fn read_root_ppn() -> usize {
    satp::read().ppn()
}

/// Switches translation to the Sv39 tree rooted at `ppn` and fences.
#[inline]
pub fn write_root_ppn(ppn: usize) {
    // SAFETY: the caller guarantees the new tree maps the executing code.
    unsafe {
        satp::set(Mode::Sv39, 0, ppn);
        riscv::asm::sfence_vma_all();
    }
}

#[inline]
pub fn sfence_all() {
    // SAFETY: a full fence has no memory-safety preconditions.
    unsafe { riscv::asm::sfence_vma_all() }
}

#[inline]
pub fn read_sepc() -> usize {
    sepc::read()
}

#[inline]
pub fn write_sepc(pc: usize) {
    // SAFETY: takes effect only at the next `sret`.
    unsafe { sepc::write(pc) }
}

#[inline]
pub fn write_sscratch(value: usize) {
    // SAFETY: sscratch is read only by the trap entry stub.
    unsafe { sscratch::write(value) }
}

/// Installs the trap vector address for supervisor mode.
#[inline]
pub fn configure_traps(trap_vector: usize) {
    // SAFETY: `trap_vector` is the runtime's trap entry stub.
    unsafe { stvec::write(trap_vector, TrapMode::Direct) }
}

/// Enables supervisor timer interrupts.
#[inline]
pub fn enable_timer_interrupts() {
    // SAFETY: the trap vector is installed before the timer is armed.
    unsafe { sie::set_stimer() }
}

/// Marks the FPU state dirty so user code may use it.
#[inline]
pub fn enable_fpu() {
    // SAFETY: only touches the FS field of sstatus.
    unsafe { sstatus::set_fs(FS::Dirty) }
}

#[inline]
pub fn read_time() -> u64 {
    time::read() as u64
}

/// Programs the next timer interrupt through the SBI.
#[inline]
pub fn set_timer(deadline: u64) {
    let ret = sbi_rt::set_timer(deadline);
    if ret.error != 0 {
        log_warn!(target: "timer", "sbi set_timer(0x{:x}) failed err=0x{:x}", deadline, ret.error);
    }
}

/// Parks the hart forever.
pub fn halt() -> ! {
    loop {
        // SAFETY: waiting for an interrupt has no side effects on memory.
        unsafe { riscv::asm::wfi() }
    }
}
