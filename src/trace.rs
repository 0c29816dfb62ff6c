//! Pre-decoded trace events
//!
//! Trace decoding happens outside this crate. The decoder hands over one
//! [`TraceEvent`] per interesting instruction: the cycle count, program
//! counter, privilege flag and the decoded operands the provenance pass
//! needs. Events serialize to JSON so the command-line adapter can read
//! them from a file.

use crate::provenance::{DerefKind, NodeOrigin};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw fields of a capability register as decoded from the trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapRegister {
    pub base: u64,
    pub length: u64,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub permissions: u32,
    #[serde(default)]
    pub object_type: u32,
    #[serde(default = "default_valid")]
    pub valid: bool,
    #[serde(default)]
    pub sealed: bool,
}

fn default_valid() -> bool {
    true
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    /// Capability register with its decoded value
    Capability { reg: u8, value: CapRegister },
    /// General purpose register
    Register { reg: u8, value: u64 },
    Immediate { value: i64 },
}

impl Operand {
    pub fn is_capability(&self) -> bool {
        matches!(self, Operand::Capability { .. })
    }

    /// Register number, for register operands
    pub fn register(&self) -> Option<u8> {
        match self {
            Operand::Capability { reg, .. } | Operand::Register { reg, .. } => Some(*reg),
            Operand::Immediate { .. } => None,
        }
    }

    pub fn capability(&self) -> Option<&CapRegister> {
        match self {
            Operand::Capability { value, .. } => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Capability { reg, value } => write!(
                f,
                "$c{} [b:{:#x} l:{:#x}]",
                reg, value.base, value.length
            ),
            Operand::Register { reg, value } => write!(f, "${} = {:#x}", reg, value),
            Operand::Immediate { value } => write!(f, "imm {}", value),
        }
    }
}

/// Capability manipulation instructions that derive a new capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeriveOp {
    /// csetbounds
    SetBounds,
    /// cfromptr
    FromPtr,
    /// candperm
    AndPerm,
    /// cfromptr immediately followed by csetbounds, merged by the decoder
    PtrSetBounds,
}

impl DeriveOp {
    pub fn origin(self) -> NodeOrigin {
        match self {
            DeriveOp::SetBounds => NodeOrigin::SetBounds,
            DeriveOp::FromPtr => NodeOrigin::FromPtr,
            DeriveOp::AndPerm => NodeOrigin::AndPerm,
            DeriveOp::PtrSetBounds => NodeOrigin::PtrSetBounds,
        }
    }
}

/// Memory-mapping system calls tracked by the provenance pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyscallKind {
    Mmap,
    Munmap,
}

impl SyscallKind {
    pub fn origin(self) -> NodeOrigin {
        match self {
            SyscallKind::Mmap => NodeOrigin::SysMmap,
            SyscallKind::Munmap => NodeOrigin::SysMunmap,
        }
    }
}

/// What an event did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A capability with no known parent, e.g. an initial register value
    Root { dst: Operand },
    /// A capability derived from the capability in `src`
    Derive {
        op: DeriveOp,
        dst: Operand,
        #[serde(default)]
        src: Option<u8>,
    },
    /// A system call returning a capability
    Syscall {
        call: SyscallKind,
        result: Operand,
        #[serde(default)]
        src: Option<u8>,
    },
    /// A load, store or call through the capability in `cap_reg`
    Memory {
        access: DerefKind,
        cap_reg: u8,
        address: u64,
        #[serde(default)]
        is_capability: bool,
        /// Register holding the capability being loaded or stored
        #[serde(default)]
        value_reg: Option<u8>,
    },
    /// The capability in `cap_reg` was released
    Free { cap_reg: u8 },
}

impl EventKind {
    /// Capability operand produced by the event, if any
    pub fn capability_operand(&self) -> Option<&Operand> {
        match self {
            EventKind::Root { dst } | EventKind::Derive { dst, .. } => Some(dst),
            EventKind::Syscall { result, .. } => Some(result),
            EventKind::Memory { .. } | EventKind::Free { .. } => None,
        }
    }

    /// Origin of the vertex created for this event
    pub fn origin(&self) -> NodeOrigin {
        match self {
            EventKind::Root { .. } => NodeOrigin::Root,
            EventKind::Derive { op, .. } => op.origin(),
            EventKind::Syscall { call, .. } => call.origin(),
            EventKind::Memory { .. } | EventKind::Free { .. } => NodeOrigin::Unknown,
        }
    }
}

/// One decoded trace entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Cycle count at which the instruction retired
    pub cycles: i64,
    pub pc: u64,
    #[serde(default)]
    pub is_kernel: bool,
    pub kind: EventKind,
}

impl TraceEvent {
    pub fn new(cycles: i64, pc: u64, kind: EventKind) -> Self {
        Self {
            cycles,
            pc,
            is_kernel: false,
            kind,
        }
    }

    pub fn in_kernel(mut self) -> Self {
        self.is_kernel = true;
        self
    }
}
