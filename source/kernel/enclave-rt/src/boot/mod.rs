// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Enclave runtime cold boot and fork restore sequence
//! OWNERS: @kernel-team
//! PUBLIC API: boot(mem, hart, params, tables), BootContext, BootStage, BootError, RuntimeLayout
//! DEPENDS_ON: mm::{reserved, switch, remap, freemem}, fork, hal::Hart
//! INVARIANTS: Stages advance strictly in order; every table write precedes
//!             TrapAndTimerArmed; the loader root is captured before the switch

pub mod env;
pub mod layout;

#[cfg(test)]
mod tests;

use crate::config::{ECALL_WIDTH, PROGRAM_BREAK, TIMER_TICK, USER_STACK_START};
use crate::fork::{read_fork_request, ProcSnapshot, UserRegs};
use crate::hal::Hart;
use crate::mm::remap::{remap_tree, RemapRange, RemapStats};
use crate::mm::reserved::{map_with_reserved_tables, RegionError};
use crate::mm::switch::{merge_loader_root, switch_root};
use crate::mm::{FreeMemory, MapError, PhysMemory};
use crate::types::{PhysAddr, VirtAddr};

use self::layout::{BootParams, Regions, ReservedTables};

/// Progress through the boot sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStage {
    Entered,
    RegionsMapped,
    RootSwitched,
    MergedOldTable,
    UntrustedWindowOpened,
    FreeMemoryInitialized,
    ForkChecked,
    UserEnvReady,
    TrapAndTimerArmed,
    HandoffReady,
}

impl BootStage {
    const fn next(self) -> Option<Self> {
        Some(match self {
            BootStage::Entered => BootStage::RegionsMapped,
            BootStage::RegionsMapped => BootStage::RootSwitched,
            BootStage::RootSwitched => BootStage::MergedOldTable,
            BootStage::MergedOldTable => BootStage::UntrustedWindowOpened,
            BootStage::UntrustedWindowOpened => BootStage::FreeMemoryInitialized,
            BootStage::FreeMemoryInitialized => BootStage::ForkChecked,
            BootStage::ForkChecked => BootStage::UserEnvReady,
            BootStage::UserEnvReady => BootStage::TrapAndTimerArmed,
            BootStage::TrapAndTimerArmed => BootStage::HandoffReady,
            BootStage::HandoffReady => return None,
        })
    }
}

/// Fatal boot failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    /// Boot parameters describe an impossible layout.
    Region(RegionError),
    /// Page-table construction failed.
    Map(MapError),
    /// The pool could not back the whole user stack.
    StackExhausted { mapped: usize, wanted: usize },
    /// The startup block could not be written through the new tables.
    EnvUnwritable,
    /// The child's pool cannot hold the parent's restored pages.
    ForkPoolTooSmall,
    /// A region does not translate as built.
    Verify(VirtAddr),
}

impl From<RegionError> for BootError {
    fn from(err: RegionError) -> Self {
        BootError::Region(err)
    }
}

impl From<MapError> for BootError {
    fn from(err: MapError) -> Self {
        BootError::Map(err)
    }
}

/// Addresses other runtime subsystems need after boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub shared_buffer_va: VirtAddr,
    pub shared_buffer_size: usize,
    pub freemem_pa: PhysAddr,
    pub freemem_va: VirtAddr,
    pub freemem_size: usize,
    pub program_break: usize,
    pub stack_top: usize,
}

/// State threaded through the boot sequence.
pub struct BootContext {
    stage: BootStage,
    pub regions: Regions,
    pub tables: ReservedTables,
    /// Root that was active when the runtime was entered.
    pub loader_root: PhysAddr,
    /// Top-level entries carried over from the loader root.
    pub merged: usize,
    pub freemem: FreeMemory,
    pub snapshot: Option<ProcSnapshot>,
    pub remap: Option<RemapStats>,
    resume: UserRegs,
}

impl BootContext {
    fn new(regions: Regions, tables: ReservedTables) -> Self {
        Self {
            stage: BootStage::Entered,
            regions,
            tables,
            loader_root: PhysAddr::new(0),
            merged: 0,
            freemem: FreeMemory::new(regions.free.pa, regions.free.size, regions.free.va),
            snapshot: None,
            remap: None,
            resume: UserRegs::zeroed(),
        }
    }

    pub fn stage(&self) -> BootStage {
        self.stage
    }

    pub fn is_fork(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Moves to `next`; anything but the immediate successor is a bug.
    fn advance(&mut self, next: BootStage) {
        assert_eq!(
            self.stage.next(),
            Some(next),
            "boot stage {:?} cannot follow {:?}",
            next,
            self.stage
        );
        self.stage = next;
        log_debug!(target: "boot", "stage {:?}", next);
    }

    /// Register context to enter user mode with, once boot has finished.
    pub fn resume_context(&self) -> Option<&UserRegs> {
        (self.stage == BootStage::HandoffReady).then_some(&self.resume)
    }

    pub fn layout(&self) -> RuntimeLayout {
        RuntimeLayout {
            shared_buffer_va: self.regions.untrusted.va,
            shared_buffer_size: self.regions.untrusted.size,
            freemem_pa: self.freemem.base(),
            freemem_va: self.freemem.va_base(),
            freemem_size: self.freemem.size(),
            program_break: PROGRAM_BREAK,
            stack_top: USER_STACK_START,
        }
    }
}

#[cfg(feature = "debug_pt_verify")]
fn verify<M: PhysMemory + ?Sized>(
    mem: &mut M,
    root: PhysAddr,
    region: &crate::mm::reserved::Region,
) -> Result<(), BootError> {
    crate::mm::reserved::verify_region(mem, root, region).map_err(BootError::Verify)
}

#[cfg(not(feature = "debug_pt_verify"))]
fn verify<M: PhysMemory + ?Sized>(
    _mem: &mut M,
    _root: PhysAddr,
    _region: &crate::mm::reserved::Region,
) -> Result<(), BootError> {
    Ok(())
}

/// Runs the boot sequence up to the hand-off to user mode.
///
/// `tables` must name frames the runtime can reach through `mem` that nothing
/// else uses. On success the context is at [`BootStage::HandoffReady`].
pub fn boot<M, H>(
    mem: &mut M,
    hart: &mut H,
    params: &BootParams,
    tables: &ReservedTables,
) -> Result<BootContext, BootError>
where
    M: PhysMemory + ?Sized,
    H: Hart + ?Sized,
{
    #[cfg(feature = "boot_banner")]
    log_info!(
        target: "boot",
        "enclave runtime: dram 0x{:x}+0x{:x} runtime 0x{:x} user 0x{:x} free 0x{:x} \
         shared 0x{:x}+0x{:x}",
        params.dram_base,
        params.dram_size,
        params.runtime_pa,
        params.user_pa,
        params.free_pa,
        params.untrusted_pa,
        params.untrusted_size
    );

    let regions = Regions::from_params(params)?;
    for frame in tables.frames() {
        mem.frame(frame).ok_or(MapError::Unreachable(frame))?.zero();
    }
    let mut ctx = BootContext::new(regions, *tables);
    let root = tables.root;

    for region in [regions.runtime, regions.user, regions.free] {
        map_with_reserved_tables(mem, root, &region, tables.pair(region.kind))?;
        verify(mem, root, &region)?;
    }
    ctx.advance(BootStage::RegionsMapped);

    let loader = switch_root(mem, hart, root)?;
    ctx.loader_root = loader.pa;
    ctx.advance(BootStage::RootSwitched);

    let new_root = mem.frame(root).ok_or(MapError::Unreachable(root))?;
    ctx.merged = merge_loader_root(new_root, &loader.table);
    log_debug!(target: "boot", "merged {} entries from loader root 0x{:x}", ctx.merged, loader.pa);
    ctx.advance(BootStage::MergedOldTable);

    map_with_reserved_tables(mem, root, &regions.untrusted, tables.untrusted)?;
    verify(mem, root, &regions.untrusted)?;
    hart.flush_tlb();
    ctx.advance(BootStage::UntrustedWindowOpened);

    ctx.freemem = FreeMemory::new(regions.free.pa, regions.free.size, regions.free.va);
    ctx.advance(BootStage::FreeMemoryInitialized);

    ctx.snapshot = read_fork_request(mem, &regions);
    if let Some(snapshot) = ctx.snapshot {
        let range = RemapRange {
            parent_start: snapshot.freemem_pa_start,
            parent_end: snapshot.freemem_pa_end,
            child_base: regions.free.pa,
        };
        ctx.remap = Some(remap_tree(mem, root, &range, &regions.window_slots()));
        hart.flush_tlb();
        if !ctx.freemem.reserve_prefix(snapshot.parent_span()) {
            return Err(BootError::ForkPoolTooSmall);
        }
    }
    ctx.advance(BootStage::ForkChecked);

    match ctx.snapshot {
        Some(snapshot) => {
            ctx.resume = snapshot.regs;
            hart.set_user_stack(snapshot.regs.sp());
        }
        None => {
            let sp = env::setup_user_stack(mem, root, &mut ctx.freemem)?;
            hart.set_user_stack(sp);
            ctx.resume.regs[UserRegs::SEPC] = hart.resume_pc();
            ctx.resume.regs[UserRegs::SP] = sp;
        }
    }
    ctx.advance(BootStage::UserEnvReady);

    hart.install_trap_vector();
    if cfg!(feature = "timer_irq") {
        hart.arm_timer(TIMER_TICK);
    }
    hart.enable_fpu();
    ctx.advance(BootStage::TrapAndTimerArmed);

    if let Some(snapshot) = ctx.snapshot {
        let pc = snapshot.regs.sepc().wrapping_add(ECALL_WIDTH);
        hart.set_resume_pc(pc);
        ctx.resume.regs[UserRegs::SEPC] = pc;
        ctx.resume.regs[UserRegs::A0] = 0;
    }
    ctx.advance(BootStage::HandoffReady);

    log_info!(
        target: "boot",
        "{} boot finished, entering user mode at 0x{:x}",
        if ctx.is_fork() { "fork" } else { "cold" },
        ctx.resume.sepc()
    );
    Ok(ctx)
}
