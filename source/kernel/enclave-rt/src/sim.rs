// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host-side stand-ins for physical memory and the hart, used by unit tests.

use std::collections::BTreeMap;

use crate::hal::Hart;
use crate::mm::{Frame, PhysMemory, PAGE_SIZE};
use crate::types::PhysAddr;

/// Sparse physical memory: frames inside the configured ranges spring into
/// existence zeroed on first touch.
pub struct SimMemory {
    ranges: Vec<(usize, usize)>,
    frames: BTreeMap<usize, Box<Frame>>,
}

impl SimMemory {
    pub fn new(ranges: &[(usize, usize)]) -> Self {
        Self { ranges: ranges.to_vec(), frames: BTreeMap::new() }
    }

    fn backed(&self, pa: usize) -> bool {
        self.ranges.iter().any(|&(base, size)| pa >= base && pa - base < size)
    }
}

impl PhysMemory for SimMemory {
    fn frame(&mut self, pa: PhysAddr) -> Option<&mut Frame> {
        let page = pa.raw() & !(PAGE_SIZE - 1);
        if !self.backed(page) {
            return None;
        }
        Some(self.frames.entry(page).or_insert_with(|| Box::new(Frame::zeroed())))
    }
}

/// What the boot sequence asked of the hart, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HartEvent {
    ActivateRoot(PhysAddr),
    FlushTlb,
    SetResumePc(usize),
    SetUserStack(usize),
    InstallTrapVector,
    ArmTimer(u64),
    EnableFpu,
}

/// Recording hart with CSR-like state.
pub struct SimHart {
    pub root: PhysAddr,
    pub resume_pc: usize,
    pub user_stack: usize,
    pub events: Vec<HartEvent>,
}

impl SimHart {
    pub fn new(root: PhysAddr, resume_pc: usize) -> Self {
        Self { root, resume_pc, user_stack: 0, events: Vec::new() }
    }

    pub fn saw(&self, event: HartEvent) -> bool {
        self.events.contains(&event)
    }

    pub fn position(&self, event: HartEvent) -> Option<usize> {
        self.events.iter().position(|e| *e == event)
    }
}

impl Hart for SimHart {
    fn active_root(&self) -> PhysAddr {
        self.root
    }

    fn activate_root(&mut self, root: PhysAddr) {
        self.root = root;
        self.events.push(HartEvent::ActivateRoot(root));
    }

    fn flush_tlb(&mut self) {
        self.events.push(HartEvent::FlushTlb);
    }

    fn resume_pc(&self) -> usize {
        self.resume_pc
    }

    fn set_resume_pc(&mut self, pc: usize) {
        self.resume_pc = pc;
        self.events.push(HartEvent::SetResumePc(pc));
    }

    fn set_user_stack(&mut self, sp: usize) {
        self.user_stack = sp;
        self.events.push(HartEvent::SetUserStack(sp));
    }

    fn install_trap_vector(&mut self) {
        self.events.push(HartEvent::InstallTrapVector);
    }

    fn arm_timer(&mut self, ticks: u64) {
        self.events.push(HartEvent::ArmTimer(ticks));
    }

    fn enable_fpu(&mut self) {
        self.events.push(HartEvent::EnableFpu);
    }
}
