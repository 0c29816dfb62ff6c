//! Single-pass construction of the provenance graph from trace events
//!
//! The builder tracks which vertex every capability register currently
//! holds, and which vertex was last stored at each memory address, so
//! derived capabilities and reloaded capabilities link back to the right
//! parent. Every new vertex is also reported to the omit builder.
//!
//! # Event Handling
//!
//! | Event     | Graph                                  | Registers            |
//! |-----------|----------------------------------------|----------------------|
//! | `Root`    | new ROOT vertex                        | bind `dst`           |
//! | `Derive`  | new vertex, edge from `src`            | bind `dst`           |
//! | `Syscall` | new SYS_* vertex, edge from `src`      | mmap binds `result`  |
//! | `Memory`  | deref on `cap_reg`, store bookkeeping  | cap load binds value |
//! | `Free`    | `t_free` on `cap_reg`                  | unchanged            |

use crate::config::AnalysisConfig;
use crate::error::{CapmapError, Result};
use crate::omit_builder::{CapabilityOmitBuilder, OmitRangeBuilder};
use crate::provenance::{DerefKind, NodeData, NodeId, ProvenanceGraph};
use crate::trace::{EventKind, SyscallKind, TraceEvent};
use crate::vmmap::VmMapEntry;
use fnv::FnvHashMap;
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Counters collected while consuming events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub events: usize,
    pub vertices: usize,
    /// Events skipped for an invalid operand
    pub skipped: usize,
    /// Vertices left out of the omit builder because their bound wrapped
    pub overflowed: usize,
    pub derefs: usize,
    /// Memory or free events through a register with no known vertex
    pub unbound: usize,
}

/// Provenance graph and omit-region construction pass
#[derive(Debug)]
pub struct ProvenanceBuilder {
    graph: ProvenanceGraph,
    omit: CapabilityOmitBuilder,
    registers: FnvHashMap<u8, NodeId>,
    memory: FnvHashMap<u64, NodeId>,
    stats: BuildStats,
}

impl Default for ProvenanceBuilder {
    fn default() -> Self {
        Self::new(CapabilityOmitBuilder::default())
    }
}

impl ProvenanceBuilder {
    pub fn new(omit: CapabilityOmitBuilder) -> Self {
        Self {
            graph: ProvenanceGraph::new(),
            omit,
            registers: FnvHashMap::default(),
            memory: FnvHashMap::default(),
            stats: BuildStats::default(),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        let omit = CapabilityOmitBuilder::new(OmitRangeBuilder::with_limits(
            config.size_limit,
            config.address_limit,
        ));
        let omit = if config.split_large_capabilities {
            omit
        } else {
            omit.without_split()
        };
        Self::new(omit)
    }

    pub fn graph(&self) -> &ProvenanceGraph {
        &self.graph
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// Vertex currently held by a capability register
    pub fn register(&self, reg: u8) -> Option<NodeId> {
        self.registers.get(&reg).copied()
    }

    /// Apply one event
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperand` when a capability-producing event carries a
    /// non-capability operand; the builder state is unchanged in that case.
    pub fn process(&mut self, event: &TraceEvent) -> Result<()> {
        self.stats.events += 1;
        match &event.kind {
            EventKind::Root { dst } => {
                self.add_node(event, dst.register(), None)?;
            }
            EventKind::Derive { dst, src, .. } => {
                self.add_node(event, dst.register(), *src)?;
            }
            EventKind::Syscall { call, result, src } => {
                let bind = match call {
                    SyscallKind::Mmap => result.register(),
                    SyscallKind::Munmap => None,
                };
                self.add_node(event, bind, *src)?;
            }
            EventKind::Memory {
                access,
                cap_reg,
                address,
                is_capability,
                value_reg,
            } => self.memory_access(event, *access, *cap_reg, *address, *is_capability, *value_reg),
            EventKind::Free { cap_reg } => match self.register(*cap_reg) {
                Some(node) => {
                    if let Some(data) = self.graph.node_mut(node) {
                        data.cap.t_free = event.cycles;
                    }
                }
                None => {
                    debug!("Free through unbound register $c{}", cap_reg);
                    self.stats.unbound += 1;
                }
            },
        }
        Ok(())
    }

    fn add_node(&mut self, event: &TraceEvent, dst: Option<u8>, src: Option<u8>) -> Result<NodeId> {
        let data = NodeData::from_capability_event(event)?;
        if let Err(err) = self.omit.inspect_node(&data) {
            warn!("Skip overflowed node {}: {}", data, err);
            self.stats.overflowed += 1;
        }

        let parent = src.and_then(|reg| self.register(reg));
        let node = self.graph.add_vertex(data);
        if let Some(parent) = parent {
            self.graph.add_edge(parent, node)?;
        }
        if let Some(reg) = dst {
            self.registers.insert(reg, node);
        }
        self.stats.vertices += 1;
        trace!("New vertex {} from pc {:#x}", node, event.pc);
        Ok(node)
    }

    fn memory_access(
        &mut self,
        event: &TraceEvent,
        access: DerefKind,
        cap_reg: u8,
        address: u64,
        is_capability: bool,
        value_reg: Option<u8>,
    ) {
        let Some(node) = self.register(cap_reg) else {
            debug!("{:?} at {:#x} through unbound register $c{}", access, address, cap_reg);
            self.stats.unbound += 1;
            return;
        };
        if let Some(data) = self.graph.node_mut(node) {
            data.add_deref(event.cycles, address, is_capability, access);
        }
        self.stats.derefs += 1;

        if !is_capability {
            return;
        }
        match access {
            DerefKind::Store => {
                if let Some(value) = value_reg.and_then(|reg| self.register(reg)) {
                    if let Some(data) = self.graph.node_mut(value) {
                        data.add_store(event.cycles, address);
                    }
                    self.memory.insert(address, value);
                }
            }
            DerefKind::Load => {
                if let Some(reg) = value_reg {
                    match self.memory.get(&address).copied() {
                        Some(value) => {
                            self.registers.insert(reg, value);
                        }
                        None => {
                            self.registers.remove(&reg);
                        }
                    }
                }
            }
            DerefKind::Call => {}
        }
    }

    /// Apply every event, skipping the ones with invalid operands
    ///
    /// # Errors
    ///
    /// Structural errors abort the pass; `InvalidOperand` is logged and
    /// counted instead.
    pub fn consume(&mut self, events: &[TraceEvent]) -> Result<()> {
        let total = events.len();
        let step = (total / 10).max(1);
        for (idx, event) in events.iter().enumerate() {
            match self.process(event) {
                Ok(()) => {}
                Err(CapmapError::InvalidOperand(operand)) => {
                    warn!("Skip event at pc {:#x}: invalid operand {}", event.pc, operand);
                    self.stats.skipped += 1;
                }
                Err(err) => return Err(err),
            }
            if (idx + 1) % step == 0 {
                debug!("Processed {}% of {} events", (idx + 1) * 100 / total, total);
            }
        }
        Ok(())
    }

    /// Report a VM map region as interesting
    pub fn inspect_vm_entry(&mut self, entry: &VmMapEntry) {
        self.omit.inspect_vm_entry(entry);
    }

    pub fn finish(self) -> (ProvenanceGraph, CapabilityOmitBuilder, BuildStats) {
        (self.graph, self.omit, self.stats)
    }
}
