//! Append-only provenance graph
//!
//! Vertices live in an index-addressed arena; a [`NodeId`] is the arena
//! slot. Edges point from the capability a vertex was derived from to the
//! derived vertex and are stored as adjacency lists in both directions.
//!
//! The graph only grows. Releasing a capability is recorded by setting
//! `t_free` on its snapshot, never by removing the vertex.

use super::{NodeData, NodeOrigin};
use crate::error::{CapmapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::{debug, error};

/// Index of a vertex in the provenance graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Directed capability derivation graph
///
/// # Edge Representation
///
/// An edge `u → v` means capability `v` was derived from capability `u`
/// by an instruction or a system call. ROOT vertices have no incoming
/// edge.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceGraph {
    nodes: Vec<NodeData>,
    children: Vec<Vec<NodeId>>,
    parents: Vec<Vec<NodeId>>,
    edge_count: usize,
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex owning `data`
    pub fn add_vertex(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(data);
        self.children.push(Vec::new());
        self.parents.push(Vec::new());
        id
    }

    /// Add a derivation edge `parent → child`
    ///
    /// # Errors
    ///
    /// Returns `UnknownNode` if either endpoint is not in the graph.
    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        for id in [parent, child] {
            if id.0 >= self.nodes.len() {
                error!("Edge {} -> {} references missing vertex {}", parent, child, id);
                return Err(CapmapError::UnknownNode(id.0));
            }
        }
        self.children[parent.0].push(child);
        self.parents[child.0].push(parent);
        self.edge_count += 1;
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(id.0)
    }

    /// Mutable payload access for the construction pass
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(id.0)
    }

    /// All vertices with their payloads, in insertion order
    pub fn vertices(&self) -> impl Iterator<Item = (NodeId, &NodeData)> {
        self.nodes.iter().enumerate().map(|(idx, data)| (NodeId(idx), data))
    }

    /// Vertices derived directly from `id`
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Vertices `id` was derived from
    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        self.parents.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Vertices without a parent
    pub fn roots(&self) -> Vec<NodeId> {
        self.parents
            .iter()
            .enumerate()
            .filter(|(_, parents)| parents.is_empty())
            .map(|(idx, _)| NodeId(idx))
            .collect()
    }

    /// All vertices reachable from `start`, excluding `start`, in BFS order
    pub fn descendants(&self, start: NodeId) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut order = Vec::new();

        visited.insert(start);
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            for &child in self.children(node) {
                if visited.insert(child) {
                    order.push(child);
                    queue.push_back(child);
                }
            }
        }
        order
    }

    /// Pair every SYS_MMAP vertex with the SYS_MUNMAP below it
    ///
    /// The mapped capability's `t_free` becomes the munmap allocation time.
    /// Mappings without a munmap stay live until the end of the trace.
    ///
    /// # Returns
    ///
    /// The number of mappings that were closed.
    ///
    /// # Errors
    ///
    /// Returns `MultipleMunmap` if one mapping has more than one munmap
    /// among its descendants.
    pub fn resolve_mmap_lifetimes(&mut self) -> Result<usize> {
        let mut closed = 0;
        for idx in 0..self.nodes.len() {
            let mmap = NodeId(idx);
            if self.nodes[idx].origin != NodeOrigin::SysMmap {
                continue;
            }

            let mut t_free = None;
            for descendant in self.descendants(mmap) {
                let data = &self.nodes[descendant.0];
                if data.origin != NodeOrigin::SysMunmap {
                    continue;
                }
                if t_free.is_some() {
                    error!("Multiple MUNMAP for a single mapped block {}", mmap);
                    return Err(CapmapError::MultipleMunmap(idx));
                }
                t_free = Some(data.cap.t_alloc);
            }

            if let Some(t_free) = t_free {
                debug!("Mapping {} released at cycle {}", mmap, t_free);
                self.nodes[idx].cap.t_free = t_free;
                closed += 1;
            }
        }
        Ok(closed)
    }
}
