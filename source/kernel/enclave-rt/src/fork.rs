// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fork request intake from the untrusted shared buffer
//! OWNERS: @kernel-team
//! STATUS: Functional
//! TEST_COVERAGE: Unit tests per rejection path + boot::tests fork restore
//! PUBLIC API: UserRegs, ProcSnapshot, read_fork_request
//! DEPENDS_ON: edge::{SharedBuffer, CallStatus}, boot::layout::Regions
//! INVARIANTS: The buffer is host-controlled; every header field is copied out once
//!             and the snapshot is validated before any payload byte moves
//!
//! A fork request is an edge call whose argument range holds a snapshot
//! header followed by the parent's user image:
//!
//! ```text
//! [ regs[32] | sstatus | sbadaddr | scause | freemem_pa_start | freemem_pa_end ][ payload ... ]
//! ```

use crate::boot::layout::Regions;
use crate::edge::{CallStatus, SharedBuffer};
use crate::mm::{PhysMemory, PAGE_SIZE};
use crate::types::PhysAddr;

/// Bytes of the snapshot header that precedes the payload.
pub const SNAPSHOT_HEADER_SIZE: usize = 37 * 8;

/// Register file handed to user mode. Slot 0 holds `sepc`, slots 1..31 hold x1..x31.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserRegs {
    pub regs: [usize; 32],
}

impl UserRegs {
    pub const SEPC: usize = 0;
    pub const SP: usize = 2;
    pub const A0: usize = 10;

    pub const fn zeroed() -> Self {
        Self { regs: [0; 32] }
    }

    pub fn sepc(&self) -> usize {
        self.regs[Self::SEPC]
    }

    pub fn sp(&self) -> usize {
        self.regs[Self::SP]
    }

    pub fn a0(&self) -> usize {
        self.regs[Self::A0]
    }
}

/// Parent state restored into a forked child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcSnapshot {
    pub regs: UserRegs,
    pub sstatus: usize,
    pub sbadaddr: usize,
    pub scause: usize,
    pub freemem_pa_start: PhysAddr,
    pub freemem_pa_end: PhysAddr,
}

impl ProcSnapshot {
    pub fn from_le_bytes(bytes: &[u8; SNAPSHOT_HEADER_SIZE]) -> Self {
        let mut words = [0usize; SNAPSHOT_HEADER_SIZE / 8];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = usize::from_le_bytes(raw);
        }
        let mut regs = UserRegs::zeroed();
        regs.regs.copy_from_slice(&words[..32]);
        Self {
            regs,
            sstatus: words[32],
            sbadaddr: words[33],
            scause: words[34],
            freemem_pa_start: PhysAddr::new(words[35]),
            freemem_pa_end: PhysAddr::new(words[36]),
        }
    }

    /// Serialises the header as the parent runtime lays it out.
    pub fn to_le_bytes(&self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut words = [0usize; SNAPSHOT_HEADER_SIZE / 8];
        words[..32].copy_from_slice(&self.regs.regs);
        words[32] = self.sstatus;
        words[33] = self.sbadaddr;
        words[34] = self.scause;
        words[35] = self.freemem_pa_start.raw();
        words[36] = self.freemem_pa_end.raw();
        let mut bytes = [0u8; SNAPSHOT_HEADER_SIZE];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Bytes of the parent's free pool.
    pub fn parent_span(&self) -> usize {
        self.freemem_pa_end.raw().saturating_sub(self.freemem_pa_start.raw())
    }

    /// Rejects a parent pool that is unaligned, inverted, or larger than `child_free`.
    pub fn validate(&self, child_free: usize) -> Result<(), CallStatus> {
        let aligned = self.freemem_pa_start.is_aligned(PAGE_SIZE)
            && self.freemem_pa_end.is_aligned(PAGE_SIZE);
        if !aligned
            || self.freemem_pa_start > self.freemem_pa_end
            || self.parent_span() > child_free
        {
            return Err(CallStatus::BadPtr);
        }
        Ok(())
    }
}

fn reject<M: PhysMemory + ?Sized>(
    mem: &mut M,
    shared: &SharedBuffer,
    status: CallStatus,
) -> Option<ProcSnapshot> {
    log_warn!(target: "fork", "fork request rejected: {:?}", status);
    if !shared.set_status(mem, status) {
        log_warn!(target: "fork", "status word unreachable");
    }
    None
}

/// Reads a pending fork request out of the shared buffer.
///
/// Returns the parent snapshot after copying the payload to the user image
/// base, or `None` for a cold boot. A malformed request is answered through
/// the call status and also yields `None`.
pub fn read_fork_request<M: PhysMemory + ?Sized>(
    mem: &mut M,
    regions: &Regions,
) -> Option<ProcSnapshot> {
    let shared = regions.shared_buffer();
    let call = shared.read_call(mem)?;
    if call.call_id == 0 {
        return None;
    }

    let (args, size) = match shared.resolve_args(&call) {
        Ok(range) => range,
        Err(status) => return reject(mem, &shared, status),
    };
    if size < SNAPSHOT_HEADER_SIZE || size - SNAPSHOT_HEADER_SIZE > regions.user.size {
        return reject(mem, &shared, CallStatus::BadOffset);
    }

    let mut header = [0u8; SNAPSHOT_HEADER_SIZE];
    if !mem.read(args, &mut header) {
        return reject(mem, &shared, CallStatus::Error);
    }
    let snapshot = ProcSnapshot::from_le_bytes(&header);
    if let Err(status) = snapshot.validate(regions.free.size) {
        return reject(mem, &shared, status);
    }

    let payload_len = size - SNAPSHOT_HEADER_SIZE;
    let Some(payload) = args.checked_add(SNAPSHOT_HEADER_SIZE) else {
        return reject(mem, &shared, CallStatus::BadOffset);
    };
    if !mem.copy(payload, regions.user.pa, payload_len) {
        return reject(mem, &shared, CallStatus::Error);
    }

    log_info!(
        target: "fork",
        "fork request {}: {} payload bytes, parent pool [0x{:x}, 0x{:x})",
        call.call_id,
        payload_len,
        snapshot.freemem_pa_start,
        snapshot.freemem_pa_end
    );
    Some(snapshot)
}
