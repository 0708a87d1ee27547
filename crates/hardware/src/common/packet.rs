//! Memory transactions as they travel through the expander.
//!
//! This module defines the packet that carries one host access through every
//! stage of the model. It provides:
//! 1. **Commands:** `MemCmd` for the host-side request/response kind and `CxlCmd`
//!    for the CXL.mem message class attached inside the expander range.
//! 2. **Packet:** Address, size, payload, issue tick, the per-stage arrival record,
//!    and the header delay charged by the interconnect.
//! 3. **Host surface:** `HostRequest` (what the host asks for) and `Completion`
//!    (what it gets back).
//!
//! A packet is owned by exactly one stage at a time and is moved, never cloned,
//! between stages.

use super::constants::Tick;
use crate::soc::traits::ComponentId;
use std::fmt;

/// Identifier assigned to each accepted host transaction.
pub type TransactionId = u64;

/// Direction of a memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum AccessKind {
    /// Data flows from memory to the host.
    Read,
    /// Data flows from the host to memory.
    Write,
}

/// Host-side memory command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemCmd {
    /// Read request.
    ReadReq,
    /// Write request carrying data.
    WriteReq,
    /// Read response carrying data.
    ReadResp,
    /// Write acknowledgement.
    WriteResp,
}

impl MemCmd {
    /// Returns `true` for request commands.
    pub const fn is_request(self) -> bool {
        matches!(self, Self::ReadReq | Self::WriteReq)
    }

    /// Returns the access direction of the command.
    pub const fn kind(self) -> AccessKind {
        match self {
            Self::ReadReq | Self::ReadResp => AccessKind::Read,
            Self::WriteReq | Self::WriteResp => AccessKind::Write,
        }
    }

    /// Returns the response command matching a request; responses map to themselves.
    pub const fn response(self) -> Self {
        match self {
            Self::ReadReq | Self::ReadResp => Self::ReadResp,
            Self::WriteReq | Self::WriteResp => Self::WriteResp,
        }
    }
}

/// CXL.mem message class attached to packets inside the expander range.
///
/// Master-to-subordinate (`M2S*`) classes travel toward the device,
/// subordinate-to-master (`S2M*`) classes travel back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CxlCmd {
    /// Request without data (reads).
    M2SReq,
    /// Request with data (writes).
    M2SRwD,
    /// Data response (read data).
    S2MDRS,
    /// No-data response (write completion).
    S2MNDR,
}

impl CxlCmd {
    /// Returns the request class for an access direction.
    pub const fn request_for(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Read => Self::M2SReq,
            AccessKind::Write => Self::M2SRwD,
        }
    }

    /// Returns the response class for an access direction.
    pub const fn response_for(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Read => Self::S2MDRS,
            AccessKind::Write => Self::S2MNDR,
        }
    }

    /// Returns `true` for subordinate-to-master classes.
    pub const fn is_response(self) -> bool {
        matches!(self, Self::S2MDRS | Self::S2MNDR)
    }
}

impl fmt::Display for CxlCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::M2SReq => "M2SReq",
            Self::M2SRwD => "M2SRwD",
            Self::S2MDRS => "S2MDRS",
            Self::S2MNDR => "S2MNDR",
        };
        f.write_str(name)
    }
}

/// Arrival record for one stage on the packet's path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hop {
    /// Stage that accepted the packet.
    pub component: ComponentId,
    /// Tick at which it was accepted.
    pub arrived: Tick,
}

/// One in-flight memory transaction.
#[derive(Debug, PartialEq, Eq)]
pub struct Packet {
    /// Host transaction identifier.
    pub id: TransactionId,
    /// Physical address of the first byte.
    pub addr: u64,
    /// Access size in bytes.
    pub size: usize,
    /// Request or response command.
    pub cmd: MemCmd,
    /// CXL message class, set once the packet enters the expander range.
    pub cxl_cmd: Option<CxlCmd>,
    /// Payload: write data on requests, read data on responses.
    pub data: Vec<u8>,
    /// Tick at which the host issued the request.
    pub issue_tick: Tick,
    /// Stages that have accepted the packet, in order.
    pub hops: Vec<Hop>,
    /// Transport delay not yet charged by a buffering stage.
    pub header_delay: Tick,
}

impl Packet {
    /// Creates a read request for `size` bytes at `addr`.
    pub const fn read(id: TransactionId, addr: u64, size: usize, issue_tick: Tick) -> Self {
        Self {
            id,
            addr,
            size,
            cmd: MemCmd::ReadReq,
            cxl_cmd: None,
            data: Vec::new(),
            issue_tick,
            hops: Vec::new(),
            header_delay: 0,
        }
    }

    /// Creates a write request carrying `data` to `addr`.
    pub fn write(id: TransactionId, addr: u64, data: Vec<u8>, issue_tick: Tick) -> Self {
        Self {
            id,
            addr,
            size: data.len(),
            cmd: MemCmd::WriteReq,
            cxl_cmd: None,
            data,
            issue_tick,
            hops: Vec::new(),
            header_delay: 0,
        }
    }

    /// Returns the access direction.
    #[inline]
    pub const fn kind(&self) -> AccessKind {
        self.cmd.kind()
    }

    /// Returns `true` while the packet is still a request.
    #[inline]
    pub const fn is_request(&self) -> bool {
        self.cmd.is_request()
    }

    /// Returns `true` for reads (requests and responses).
    #[inline]
    pub const fn is_read(&self) -> bool {
        matches!(self.kind(), AccessKind::Read)
    }

    /// Returns the number of payload bytes that cross a data bus with this packet.
    pub const fn payload_len(&self) -> usize {
        match self.cmd {
            MemCmd::WriteReq | MemCmd::ReadResp => self.size,
            MemCmd::ReadReq | MemCmd::WriteResp => 0,
        }
    }

    /// Turns the request into its response in place.
    ///
    /// Reads receive `data`; writes drop their payload.
    pub fn make_response(&mut self, data: Vec<u8>) {
        self.cmd = self.cmd.response();
        self.data = match self.kind() {
            AccessKind::Read => data,
            AccessKind::Write => Vec::new(),
        };
    }

    /// Records acceptance by `component` at `now`.
    pub fn record_hop(&mut self, component: ComponentId, now: Tick) {
        self.hops.push(Hop { component, arrived: now });
    }

    /// Returns the pending header delay and clears it.
    pub const fn take_header_delay(&mut self) -> Tick {
        let delay = self.header_delay;
        self.header_delay = 0;
        delay
    }
}

/// A host access submitted through [`System::send_request`](crate::soc::System::send_request).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRequest {
    /// Physical address of the first byte.
    pub addr: u64,
    /// Read or write.
    pub kind: AccessKind,
    /// Access size in bytes.
    pub size: usize,
    /// Write payload; empty for reads.
    pub data: Vec<u8>,
}

impl HostRequest {
    /// A read of `size` bytes at `addr`.
    pub const fn read(addr: u64, size: usize) -> Self {
        Self { addr, kind: AccessKind::Read, size, data: Vec::new() }
    }

    /// A write of `data` to `addr`.
    pub fn write(addr: u64, data: Vec<u8>) -> Self {
        Self { addr, kind: AccessKind::Write, size: data.len(), data }
    }

    /// Builds the request packet for transaction `id`.
    pub fn into_packet(self, id: TransactionId, now: Tick) -> Packet {
        match self.kind {
            AccessKind::Read => Packet::read(id, self.addr, self.size, now),
            AccessKind::Write => Packet::write(id, self.addr, self.data, now),
        }
    }

    /// Recovers the request from a refused packet.
    pub fn from_packet(pkt: Packet) -> Self {
        Self { addr: pkt.addr, kind: pkt.kind(), size: pkt.size, data: pkt.data }
    }
}

/// A finished host transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Transaction identifier returned at admission.
    pub id: TransactionId,
    /// Physical address of the access.
    pub addr: u64,
    /// Read or write.
    pub kind: AccessKind,
    /// Read data; empty for writes.
    pub data: Vec<u8>,
    /// Tick at which the request was issued.
    pub issued: Tick,
    /// Tick at which the response reached the host.
    pub completed: Tick,
}

impl Completion {
    /// Builds a completion from a response packet arriving at `completed`.
    pub fn from_response(pkt: Packet, completed: Tick) -> Self {
        Self {
            id: pkt.id,
            addr: pkt.addr,
            kind: pkt.kind(),
            data: pkt.data,
            issued: pkt.issue_tick,
            completed,
        }
    }

    /// Round-trip latency in ticks.
    pub const fn latency(&self) -> Tick {
        self.completed.saturating_sub(self.issued)
    }
}
