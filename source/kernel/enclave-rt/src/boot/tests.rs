// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: End-to-end boots against simulated memory and hart
//! OWNERS: @kernel-team
//! NOTE: Tests only; cold boot, fork restore, stage ordering, fatal layouts

use super::layout::{BootParams, ReservedTables};
use super::*;
use crate::config::{FREEMEM_WINDOW_VA, USER_STACK_END};
use crate::edge::{EdgeCall, EDGE_CALL_HEADER_SIZE};
use crate::mm::reserved::{verify_region, RegionKind};
use crate::mm::{translate, PageFlags, Pte, MEGAPAGE_SIZE, PAGE_SIZE, PT_ENTRIES};
use crate::sim::{HartEvent, SimHart, SimMemory};

const LOADER_ROOT: PhysAddr = PhysAddr::new(0x8000_0000);
const LOADER_L2_LOW: PhysAddr = PhysAddr::new(0x8000_2000);
const LOADER_L3_LOW: PhysAddr = PhysAddr::new(0x8000_3000);
const LOADER_L2_DRAM: PhysAddr = PhysAddr::new(0x8000_4000);
const LOADER_L3_STACK: PhysAddr = PhysAddr::new(0x8000_5000);
const SHARED: usize = 0x9000_0000;
const USER_ENTRY: usize = 0x1_0000;

fn params(free_pa: usize) -> BootParams {
    BootParams::new(0x8000_0000, 0x400_0000, 0x8000_1000, 0x8010_0000, free_pa, SHARED, 0x1_0000)
}

fn tables() -> ReservedTables {
    ReservedTables::contiguous(PhysAddr::new(0x8000_8000))
}

fn user_leaf(pa: usize) -> Pte {
    let flags = PageFlags::READ
        | PageFlags::WRITE
        | PageFlags::EXECUTE
        | PageFlags::USER
        | PageFlags::ACCESSED;
    Pte::leaf(PhysAddr::new(pa), flags)
}

/// Loader tree: the user image at VA 0x10000 under slot 0 and DRAM
/// identity-mapped with megapages under slot 2.
fn loader_memory() -> SimMemory {
    let mut mem = SimMemory::new(&[(0x8000_0000, 0x400_0000), (SHARED, 0x1_0000)]);
    let root = mem.frame(LOADER_ROOT).unwrap();
    root.set_entry(0, Pte::table(LOADER_L2_LOW));
    root.set_entry(2, Pte::table(LOADER_L2_DRAM));
    mem.frame(LOADER_L2_LOW).unwrap().set_entry(0, Pte::table(LOADER_L3_LOW));
    let l3 = mem.frame(LOADER_L3_LOW).unwrap();
    for i in 0..4 {
        l3.set_entry(0x10 + i, user_leaf(0x8010_0000 + i * PAGE_SIZE));
    }
    let dram = mem.frame(LOADER_L2_DRAM).unwrap();
    for i in 0..32 {
        let flags = PageFlags::READ | PageFlags::WRITE | PageFlags::EXECUTE | PageFlags::ACCESSED;
        dram.set_entry(i, Pte::leaf(PhysAddr::new(0x8000_0000 + i * MEGAPAGE_SIZE), flags));
    }
    mem
}

fn valid_root_slots(mem: &mut SimMemory, root: PhysAddr) -> Vec<usize> {
    let frame = mem.frame(root).unwrap();
    (0..PT_ENTRIES).filter(|&i| frame.entry(i).is_valid()).collect()
}

#[test]
fn cold_boot_builds_isolated_address_space() {
    let mut mem = loader_memory();
    let mut hart = SimHart::new(LOADER_ROOT, USER_ENTRY);
    let tables = tables();

    let ctx = boot(&mut mem, &mut hart, &params(0x8020_0000), &tables).expect("boot");

    assert_eq!(ctx.stage(), BootStage::HandoffReady);
    assert!(!ctx.is_fork());
    assert_eq!(ctx.loader_root, LOADER_ROOT);
    assert_eq!(ctx.merged, 2);
    assert_eq!(hart.root, tables.root);
    assert_eq!(valid_root_slots(&mut mem, tables.root), vec![0, 2, 508, 509, 510, 511]);

    for region in ctx.regions.all() {
        assert_eq!(verify_region(&mut mem, tables.root, &region), Ok(()), "{} window", region.kind);
    }
    let untrusted = translate(&mut mem, tables.root, ctx.regions.untrusted.va).unwrap();
    assert!(!untrusted.flags.contains(PageFlags::EXECUTE));

    // Loader mappings remain reachable through the merged slots.
    let image = translate(&mut mem, tables.root, VirtAddr::canonical(USER_ENTRY)).unwrap();
    assert_eq!(image.pa, PhysAddr::new(0x8010_0000));

    let resume = ctx.resume_context().expect("handoff");
    assert_eq!(resume.sepc(), USER_ENTRY);
    assert_eq!(resume.sp(), USER_STACK_START - 64);
    assert_eq!(hart.user_stack, resume.sp());
    assert!(translate(&mut mem, tables.root, VirtAddr::canonical(USER_STACK_END)).is_some());
    // 32 stack pages plus one leaf table.
    assert_eq!(ctx.freemem.allocated_pages(), 33);

    let layout = ctx.layout();
    assert_eq!(layout.program_break, 0x20_4000_0000);
    assert_eq!(layout.freemem_va, FREEMEM_WINDOW_VA);
    assert_eq!(layout.shared_buffer_size, 0x1_0000);
}

#[test]
fn cold_boot_drives_hart_in_order() {
    let mut mem = loader_memory();
    let mut hart = SimHart::new(LOADER_ROOT, USER_ENTRY);
    let tables = tables();
    boot(&mut mem, &mut hart, &params(0x8020_0000), &tables).expect("boot");

    let switched = hart.position(HartEvent::ActivateRoot(tables.root)).unwrap();
    let flushed = hart.position(HartEvent::FlushTlb).unwrap();
    let stack = hart.position(HartEvent::SetUserStack(USER_STACK_START - 64)).unwrap();
    let trap = hart.position(HartEvent::InstallTrapVector).unwrap();
    let fpu = hart.position(HartEvent::EnableFpu).unwrap();
    assert!(switched < flushed && flushed < stack && stack < trap && trap < fpu);
    assert_eq!(hart.saw(HartEvent::ArmTimer(TIMER_TICK)), cfg!(feature = "timer_irq"));
    assert!(!hart.events.iter().any(|e| matches!(e, HartEvent::SetResumePc(_))));
}

fn post_fork(mem: &mut SimMemory, snapshot: &ProcSnapshot, payload: &[u8]) {
    let call = EdgeCall {
        call_id: 1,
        arg_offset: EDGE_CALL_HEADER_SIZE,
        arg_size: crate::fork::SNAPSHOT_HEADER_SIZE + payload.len(),
        ..EdgeCall::default()
    };
    let args = SHARED + EDGE_CALL_HEADER_SIZE;
    assert!(mem.write(PhysAddr::new(SHARED), &call.to_le_bytes()));
    assert!(mem.write(PhysAddr::new(args), &snapshot.to_le_bytes()));
    assert!(mem.write(PhysAddr::new(args + crate::fork::SNAPSHOT_HEADER_SIZE), payload));
}

fn parent_snapshot() -> ProcSnapshot {
    let mut regs = UserRegs::zeroed();
    regs.regs[UserRegs::SEPC] = 0x1_0a40;
    regs.regs[UserRegs::SP] = 0x3fff_fe00;
    regs.regs[UserRegs::A0] = 77;
    ProcSnapshot {
        regs,
        sstatus: 0,
        sbadaddr: 0,
        scause: 8,
        freemem_pa_start: PhysAddr::new(0x8020_0000),
        freemem_pa_end: PhysAddr::new(0x8030_0000),
    }
}

#[test]
fn fork_boot_restores_parent_into_child_pool() {
    let mut mem = loader_memory();
    // Parent pages: two in the parent's pool, one stack page, one in the image.
    let l3 = mem.frame(LOADER_L3_LOW).unwrap();
    l3.set_entry(0x20, user_leaf(0x8020_0000));
    l3.set_entry(0x21, user_leaf(0x802f_f000));
    mem.frame(LOADER_L2_LOW).unwrap().set_entry(511, Pte::table(LOADER_L3_STACK));
    mem.frame(LOADER_L3_STACK).unwrap().set_entry(511, user_leaf(0x8021_0000));
    let before = mem.frame(LOADER_L3_LOW).unwrap().entry(0x21);

    let payload = [0xc3u8; 64];
    post_fork(&mut mem, &parent_snapshot(), &payload);

    let mut hart = SimHart::new(LOADER_ROOT, 0);
    let tables = tables();
    let ctx = boot(&mut mem, &mut hart, &params(0x8025_0000), &tables).expect("boot");
    let root = tables.root;

    assert!(ctx.is_fork());
    let stats = ctx.remap.expect("remapped");
    assert_eq!(stats.leaves_seen, 7);
    assert_eq!(stats.remapped, 3);

    let moved = |mem: &mut SimMemory, va: usize| {
        translate(mem, root, VirtAddr::canonical(va)).unwrap().pa
    };
    assert_eq!(moved(&mut mem, 0x2_0000), PhysAddr::new(0x8025_0000));
    assert_eq!(moved(&mut mem, 0x2_1000), PhysAddr::new(0x8034_f000));
    assert_eq!(moved(&mut mem, 0x3fff_f000), PhysAddr::new(0x8026_0000));
    assert_eq!(moved(&mut mem, USER_ENTRY), PhysAddr::new(0x8010_0000));
    let after = mem.frame(LOADER_L3_LOW).unwrap().entry(0x21);
    assert_eq!(after.flags(), before.flags());

    // The runtime's own windows were not rewritten.
    assert_eq!(ctx.regions.user.va, crate::config::USER_WINDOW_VA);
    for region in ctx.regions.all() {
        assert_eq!(verify_region(&mut mem, root, &region), Ok(()), "{} window", region.kind);
    }

    let mut copied = [0u8; 64];
    assert!(mem.read(PhysAddr::new(0x8010_0000), &mut copied));
    assert_eq!(copied, payload);

    let resume = ctx.resume_context().expect("handoff");
    assert_eq!(resume.sepc(), 0x1_0a44);
    assert_eq!(resume.a0(), 0);
    assert_eq!(resume.sp(), 0x3fff_fe00);
    assert_eq!(hart.resume_pc, 0x1_0a44);
    let fpu = hart.position(HartEvent::EnableFpu).unwrap();
    assert!(hart.position(HartEvent::SetResumePc(0x1_0a44)).unwrap() > fpu);

    // No fresh stack; the pool resumes after the parent's pages.
    assert!(translate(&mut mem, root, VirtAddr::canonical(USER_STACK_END)).is_none());
    assert_eq!(ctx.freemem.cursor(), PhysAddr::new(0x8035_0000));
}

#[test]
fn malformed_fork_request_falls_back_to_cold_boot() {
    let mut mem = loader_memory();
    let mut snapshot = parent_snapshot();
    snapshot.freemem_pa_end = PhysAddr::new(0x9000_0000);
    post_fork(&mut mem, &snapshot, &[1; 8]);

    let mut hart = SimHart::new(LOADER_ROOT, USER_ENTRY);
    let ctx = boot(&mut mem, &mut hart, &params(0x8020_0000), &tables()).expect("boot");

    assert!(!ctx.is_fork());
    assert_eq!(ctx.resume_context().unwrap().sepc(), USER_ENTRY);
    let status = mem.read_word(PhysAddr::new(SHARED + 24)).unwrap() as u32;
    assert_eq!(status, crate::edge::CallStatus::BadPtr.raw());
}

#[test]
fn oversized_runtime_stops_before_switching() {
    let mut mem = loader_memory();
    let mut hart = SimHart::new(LOADER_ROOT, USER_ENTRY);
    let mut bad = params(0x8040_0000);
    bad.user_pa = PhysAddr::new(0x8030_0000);

    let err = boot(&mut mem, &mut hart, &bad, &tables()).err();
    assert!(matches!(
        err,
        Some(BootError::Region(RegionError::TooLarge { kind: RegionKind::Runtime, .. }))
    ));
    assert!(hart.events.is_empty());
}

#[test]
fn stack_shortfall_is_fatal() {
    let mut mem = loader_memory();
    let mut hart = SimHart::new(LOADER_ROOT, USER_ENTRY);
    // Eight free pages against a 32-page stack.
    let tight = BootParams::new(
        0x8000_0000,
        0x20_8000,
        0x8000_1000,
        0x8010_0000,
        0x8020_0000,
        SHARED,
        0x1_0000,
    );
    let err = boot(&mut mem, &mut hart, &tight, &tables()).err();
    assert!(matches!(err, Some(BootError::StackExhausted { .. })));
}

#[test]
#[should_panic(expected = "cannot follow")]
fn stages_cannot_be_skipped() {
    let regions = Regions::from_params(&params(0x8020_0000)).unwrap();
    let mut ctx = BootContext::new(regions, tables());
    ctx.advance(BootStage::RegionsMapped);
    ctx.advance(BootStage::MergedOldTable);
}

#[test]
fn resume_context_only_at_handoff() {
    let regions = Regions::from_params(&params(0x8020_0000)).unwrap();
    let ctx = BootContext::new(regions, tables());
    assert_eq!(ctx.resume_context(), None);
}
