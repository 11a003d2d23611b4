// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hardware entry point invoked by the runtime's start stub
//! OWNERS: @kernel-team
//! PUBLIC API: enclave_rt_boot (extern "C"), runtime_layout()
//! DEPENDS_ON: boot, mm::direct::DirectMap, hal::virt::RiscvHart
//! INVARIANTS: Runs once on a single hart; statics are written before user mode starts

use core::panic::PanicInfo;
use core::ptr::{addr_of, addr_of_mut};

use spin::Once;

use crate::boot::layout::{BootParams, Regions, ReservedTables};
use crate::boot::{boot, BootError, RuntimeLayout};
use crate::config::RUNTIME_WINDOW_VA;
use crate::fork::UserRegs;
use crate::hal::virt::RiscvHart;
use crate::mm::direct::DirectMap;
use crate::mm::{Frame, MapError};
use crate::types::{PhysAddr, VirtAddr};

extern "C" {
    /// First byte of the runtime image, provided by the linker script.
    static rt_base: u8;
}

const EMPTY_FRAME: Frame = Frame::zeroed();

static mut RESERVED: [Frame; ReservedTables::FRAMES] = [EMPTY_FRAME; ReservedTables::FRAMES];
static mut RESUME: UserRegs = UserRegs::zeroed();
static LAYOUT: Once<RuntimeLayout> = Once::new();

/// Layout published by the boot sequence, once it has run.
pub fn runtime_layout() -> Option<&'static RuntimeLayout> {
    LAYOUT.get()
}

/// Boots the enclave and returns the register context to enter user mode with.
///
/// `a0` carries the SBI return value from the loader and is ignored.
#[no_mangle]
pub extern "C" fn enclave_rt_boot(
    _sbi_ret: usize,
    dram_base: usize,
    dram_size: usize,
    runtime_pa: usize,
    user_pa: usize,
    free_pa: usize,
    untrusted_pa: usize,
    untrusted_size: usize,
) -> *mut UserRegs {
    // SAFETY: only the symbol's address is taken.
    let linked = unsafe { addr_of!(rt_base) } as usize;
    let params = BootParams {
        dram_base: PhysAddr::new(dram_base),
        dram_size,
        runtime_pa: PhysAddr::new(runtime_pa),
        user_pa: PhysAddr::new(user_pa),
        free_pa: PhysAddr::new(free_pa),
        untrusted_pa: PhysAddr::new(untrusted_pa),
        untrusted_size,
        runtime_va: VirtAddr::new(linked).unwrap_or(RUNTIME_WINDOW_VA),
    };
    match run(&params) {
        Ok(resume) => resume,
        Err(err) => panic!("enclave boot failed: {:?}", err),
    }
}

fn run(params: &BootParams) -> Result<*mut UserRegs, BootError> {
    let regions = Regions::from_params(params)?;
    // SAFETY: only the address is taken; the frames are reached through `mem`.
    let reserved = unsafe { addr_of_mut!(RESERVED) } as usize;
    let reserved_pa = VirtAddr::new(reserved)
        .and_then(|va| regions.runtime.pa_of(va))
        .ok_or(MapError::OutOfRange)?;
    let tables = ReservedTables::contiguous(reserved_pa);

    let mut mem = DirectMap::new(regions, params.dram_base, params.dram_size);
    let mut hart = RiscvHart;
    let ctx = boot(&mut mem, &mut hart, params, &tables)?;

    let Some(resume) = ctx.resume_context().copied() else {
        panic!("boot returned before hand-off");
    };
    LAYOUT.call_once(|| ctx.layout());
    // SAFETY: single hart, written once before user mode; the trap path
    // only reads it after this returns.
    unsafe {
        RESUME = resume;
        Ok(addr_of_mut!(RESUME))
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log_error!(target: "panic", "{}", info);
    crate::arch::riscv::halt()
}
