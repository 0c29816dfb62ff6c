//! Capability provenance model
//!
//! Every capability produced by the trace becomes a vertex of a
//! [`ProvenanceGraph`]. The vertex payload, [`NodeData`], records the
//! capability snapshot, what produced it, and everything the program did
//! with it afterwards: where the capability value was stored and every
//! dereference made through it.
//!
//! # Architecture
//!
//! ```text
//! TraceEvent ──► NodeData::from_capability_event ──► ProvenanceGraph::add_vertex
//!                                                          │
//!   src register's vertex ─────── add_edge(parent, new) ───┘
//!
//! Memory events ──► NodeData::add_deref / NodeData::add_store
//! ```

mod graph;

pub use graph::{NodeId, ProvenanceGraph};

use crate::capability::CheriCap;
use crate::error::{CapmapError, Result};
use crate::trace::TraceEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What produced a provenance vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeOrigin {
    Unknown,
    /// No known parent
    Root,
    SetBounds,
    FromPtr,
    AndPerm,
    /// Aggregate of a cfromptr and the csetbounds that follows it
    PtrSetBounds,
    SysMmap,
    SysMunmap,
}

impl NodeOrigin {
    pub fn is_syscall(self) -> bool {
        matches!(self, NodeOrigin::SysMmap | NodeOrigin::SysMunmap)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeOrigin::Unknown => "UNKNOWN",
            NodeOrigin::Root => "ROOT",
            NodeOrigin::SetBounds => "SETBOUNDS",
            NodeOrigin::FromPtr => "FROMPTR",
            NodeOrigin::AndPerm => "ANDPERM",
            NodeOrigin::PtrSetBounds => "PTR_SETBOUNDS",
            NodeOrigin::SysMmap => "SYS_MMAP",
            NodeOrigin::SysMunmap => "SYS_MUNMAP",
        }
    }
}

impl fmt::Display for NodeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of memory access made through a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerefKind {
    Load,
    Store,
    Call,
}

/// One dereference of a capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerefEntry {
    pub time: i64,
    pub address: u64,
    /// The access moved a capability rather than plain data
    pub is_capability: bool,
    pub kind: DerefKind,
}

/// Payload of a provenance graph vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub cap: CheriCap,
    pub origin: NodeOrigin,
    /// PC of the instruction that produced the capability
    pub pc: u64,
    pub is_kernel: bool,
    /// Memory locations the capability value was written to, by cycle
    pub stores: BTreeMap<i64, Vec<u64>>,
    /// Dereferences in trace order
    pub deref_log: Vec<DerefEntry>,
}

impl NodeData {
    pub fn new(cap: CheriCap, origin: NodeOrigin) -> Self {
        Self {
            cap,
            origin,
            pc: 0,
            is_kernel: false,
            stores: BTreeMap::new(),
            deref_log: Vec::new(),
        }
    }

    /// Build a vertex payload from an event carrying a capability operand
    ///
    /// The allocation time is the event cycle count; the origin is taken
    /// from the event kind.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperand` if the event operand is not a capability
    /// register, or the event carries no operand at all.
    pub fn from_capability_event(event: &TraceEvent) -> Result<Self> {
        let operand = event.kind.capability_operand().ok_or_else(|| {
            CapmapError::InvalidOperand(format!("event at pc {:#x} has no operand", event.pc))
        })?;
        let mut cap = CheriCap::from_register(operand)?;
        cap.t_alloc = event.cycles;

        let mut data = Self::new(cap, event.kind.origin());
        data.pc = event.pc;
        data.is_kernel = event.is_kernel;
        Ok(data)
    }

    /// Append a dereference to the log
    ///
    /// Callers feed dereferences in trace order, so `time` is expected to be
    /// non-decreasing; this is not checked.
    pub fn add_deref(&mut self, time: i64, address: u64, is_capability: bool, kind: DerefKind) {
        self.deref_log.push(DerefEntry {
            time,
            address,
            is_capability,
            kind,
        });
    }

    /// Record that the capability value was stored at `address`
    pub fn add_store(&mut self, time: i64, address: u64) {
        self.stores.entry(time).or_default().push(address);
    }

    /// Dereferences of the given kind, in log order
    pub fn derefs(&self, kind: DerefKind) -> impl Iterator<Item = &DerefEntry> {
        self.deref_log.iter().filter(move |d| d.kind == kind)
    }
}

impl fmt::Display for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} origin:{} pc:{:#x} (kernel {})",
            self.cap,
            self.origin,
            self.pc,
            u8::from(self.is_kernel)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{CapRegister, DeriveOp, EventKind, Operand};

    fn cap_operand(reg: u8, base: u64, length: u64) -> Operand {
        Operand::Capability {
            reg,
            value: CapRegister {
                base,
                length,
                valid: true,
                ..CapRegister::default()
            },
        }
    }

    #[test]
    fn test_from_capability_event() {
        let event = TraceEvent::new(
            1234,
            0x1_2000,
            EventKind::Derive {
                op: DeriveOp::SetBounds,
                dst: cap_operand(3, 0x4000, 0x100),
                src: Some(1),
            },
        )
        .in_kernel();

        let data = NodeData::from_capability_event(&event).unwrap();
        assert_eq!(data.cap.base, 0x4000);
        assert_eq!(data.cap.t_alloc, 1234);
        assert_eq!(data.cap.t_free, -1);
        assert_eq!(data.pc, 0x1_2000);
        assert!(data.is_kernel);
        assert_eq!(data.origin, NodeOrigin::SetBounds);
        assert!(data.deref_log.is_empty());
    }

    #[test]
    fn test_from_capability_event_rejects_gpr() {
        let event = TraceEvent::new(
            1,
            0x100,
            EventKind::Root {
                dst: Operand::Register { reg: 2, value: 0 },
            },
        );
        let err = NodeData::from_capability_event(&event).unwrap_err();
        assert!(matches!(err, CapmapError::InvalidOperand(_)));
    }

    #[test]
    fn test_from_memory_event_is_invalid() {
        let event = TraceEvent::new(
            1,
            0x100,
            EventKind::Memory {
                access: DerefKind::Load,
                cap_reg: 1,
                address: 0x10,
                is_capability: false,
                value_reg: None,
            },
        );
        assert!(NodeData::from_capability_event(&event).is_err());
    }

    #[test]
    fn test_deref_log_keeps_call_order() {
        let mut data = NodeData::new(CheriCap::default(), NodeOrigin::Root);
        data.add_deref(10, 0x100, false, DerefKind::Load);
        data.add_deref(11, 0x108, true, DerefKind::Store);
        data.add_deref(11, 0x108, true, DerefKind::Store);
        data.add_deref(12, 0x2000, false, DerefKind::Call);

        assert_eq!(data.deref_log.len(), 4);
        let kinds: Vec<DerefKind> = data.deref_log.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DerefKind::Load,
                DerefKind::Store,
                DerefKind::Store,
                DerefKind::Call
            ]
        );
        assert_eq!(data.derefs(DerefKind::Store).count(), 2);
        assert!(data.deref_log[1].is_capability);
    }

    #[test]
    fn test_add_store_groups_by_time() {
        let mut data = NodeData::new(CheriCap::default(), NodeOrigin::FromPtr);
        data.add_store(5, 0x100);
        data.add_store(5, 0x200);
        data.add_store(9, 0x100);
        assert_eq!(data.stores[&5], vec![0x100, 0x200]);
        assert_eq!(data.stores[&9], vec![0x100]);
    }

    #[test]
    fn test_display() {
        let mut data = NodeData::new(CheriCap::default(), NodeOrigin::SysMmap);
        data.pc = 0x40;
        let text = data.to_string();
        assert!(text.ends_with("origin:SYS_MMAP pc:0x40 (kernel 0)"));
    }
}
