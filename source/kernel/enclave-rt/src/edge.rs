// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Edge-call header exchanged with the untrusted host through the shared buffer
//! OWNERS: @kernel-team
//! PUBLIC API: EdgeCall, CallStatus, SharedBuffer::{read_call, set_status, resolve}
//! DEPENDS_ON: mm::PhysMemory
//! INVARIANTS: LE wire layout frozen (golden vector); header read once per use;
//!             resolved ranges lie strictly inside the buffer

use crate::mm::PhysMemory;
use crate::types::PhysAddr;

/// Bytes occupied by the edge-call header at the start of the shared buffer.
pub const EDGE_CALL_HEADER_SIZE: usize = 48;

const CALL_ID: usize = 0;
const ARG_OFFSET: usize = 8;
const ARG_SIZE: usize = 16;
const STATUS: usize = 24;
const RET_OFFSET: usize = 32;
const RET_SIZE: usize = 40;

/// Status the runtime reports back to the host.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallStatus {
    Ok = 0,
    BadCallId = 1,
    BadOffset = 2,
    BadPtr = 3,
    Error = 4,
    SyscallFailed = 5,
}

impl CallStatus {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => CallStatus::Ok,
            1 => CallStatus::BadCallId,
            2 => CallStatus::BadOffset,
            3 => CallStatus::BadPtr,
            4 => CallStatus::Error,
            5 => CallStatus::SyscallFailed,
            _ => return None,
        })
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// Local copy of the edge-call header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EdgeCall {
    pub call_id: usize,
    pub arg_offset: usize,
    pub arg_size: usize,
    pub status: u32,
    pub ret_offset: usize,
    pub ret_size: usize,
}

fn word(bytes: &[u8; EDGE_CALL_HEADER_SIZE], at: usize) -> usize {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    usize::from_le_bytes(raw)
}

impl EdgeCall {
    pub fn from_le_bytes(bytes: &[u8; EDGE_CALL_HEADER_SIZE]) -> Self {
        let mut status = [0u8; 4];
        status.copy_from_slice(&bytes[STATUS..STATUS + 4]);
        Self {
            call_id: word(bytes, CALL_ID),
            arg_offset: word(bytes, ARG_OFFSET),
            arg_size: word(bytes, ARG_SIZE),
            status: u32::from_le_bytes(status),
            ret_offset: word(bytes, RET_OFFSET),
            ret_size: word(bytes, RET_SIZE),
        }
    }

    /// Serialises the header as the host lays it out.
    pub fn to_le_bytes(&self) -> [u8; EDGE_CALL_HEADER_SIZE] {
        let mut bytes = [0u8; EDGE_CALL_HEADER_SIZE];
        bytes[CALL_ID..CALL_ID + 8].copy_from_slice(&self.call_id.to_le_bytes());
        bytes[ARG_OFFSET..ARG_OFFSET + 8].copy_from_slice(&self.arg_offset.to_le_bytes());
        bytes[ARG_SIZE..ARG_SIZE + 8].copy_from_slice(&self.arg_size.to_le_bytes());
        bytes[STATUS..STATUS + 4].copy_from_slice(&self.status.to_le_bytes());
        // Bytes 28..32 pad the status word.
        bytes[RET_OFFSET..RET_OFFSET + 8].copy_from_slice(&self.ret_offset.to_le_bytes());
        bytes[RET_SIZE..RET_SIZE + 8].copy_from_slice(&self.ret_size.to_le_bytes());
        bytes
    }
}

/// Checks that `[offset, offset + size)` lies inside a buffer of `buffer_size` bytes.
pub fn resolve(
    offset: usize,
    size: usize,
    buffer_size: usize,
) -> Result<(usize, usize), CallStatus> {
    match offset.checked_add(size) {
        Some(end) if end <= buffer_size => Ok((offset, size)),
        _ => Err(CallStatus::BadOffset),
    }
}

/// The shared buffer as seen from physical memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedBuffer {
    pub pa: PhysAddr,
    pub size: usize,
}

impl SharedBuffer {
    /// Copies the header out of the buffer, or `None` if it cannot hold one.
    pub fn read_call<M: PhysMemory + ?Sized>(&self, mem: &mut M) -> Option<EdgeCall> {
        if self.size < EDGE_CALL_HEADER_SIZE {
            return None;
        }
        let mut raw = [0u8; EDGE_CALL_HEADER_SIZE];
        mem.read(self.pa, &mut raw).then(|| EdgeCall::from_le_bytes(&raw))
    }

    /// Writes only the status word back to the host.
    pub fn set_status<M: PhysMemory + ?Sized>(&self, mem: &mut M, status: CallStatus) -> bool {
        let Some(at) = self.pa.checked_add(STATUS) else { return false };
        mem.write(at, &status.raw().to_le_bytes())
    }

    /// Physical start of the argument range named by `call`.
    pub fn resolve_args(&self, call: &EdgeCall) -> Result<(PhysAddr, usize), CallStatus> {
        let (offset, size) = resolve(call.arg_offset, call.arg_size, self.size)?;
        let pa = self.pa.checked_add(offset).ok_or(CallStatus::BadOffset)?;
        Ok((pa, size))
    }
}
