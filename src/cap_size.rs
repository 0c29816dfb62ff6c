//! Capability size distribution per memory-mapped region
//!
//! For every VM map entry the sizes of the capabilities referencing it are
//! binned by `log2(length + 1)` and normalized, so each entry yields the
//! share of small and large capabilities pointing into it. Which
//! capabilities reference an entry depends on the [`CapSizeMode`].

use crate::provenance::{DerefKind, NodeData, ProvenanceGraph};
use crate::vmmap::VmMapEntry;
use clap::ValueEnum;
use serde::Serialize;
use tracing::{debug, warn};

/// Bin edges over `log2(length + 1)`; the last bin includes its upper edge
pub const SIZE_BINS: [f64; 6] = [0.0, 10.0, 20.0, 30.0, 40.0, 64.0];

/// Number of histogram bins
pub const BIN_COUNT: usize = SIZE_BINS.len() - 1;

/// When a capability is considered to reference a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CapSizeMode {
    /// At creation, when its span touches the region
    Creation,
    /// At every load or store dereference into the region
    Deref,
    /// At every call into the region
    Call,
}

/// Normalized size histogram of every VM map entry
#[derive(Debug, Clone, Serialize)]
pub struct CapSizeHistogram {
    mode: CapSizeMode,
    counts: Vec<[u64; BIN_COUNT]>,
    rows: Vec<[f64; BIN_COUNT]>,
}

/// Bin of a capability length
pub fn bin_index(length: u64) -> usize {
    let value = (length as f64 + 1.0).log2();
    SIZE_BINS[1..]
        .iter()
        .position(|&edge| value < edge)
        .unwrap_or(BIN_COUNT - 1)
}

impl CapSizeHistogram {
    /// One row per entry of `vmmap`, in map order
    pub fn build(graph: &ProvenanceGraph, vmmap: &[VmMapEntry], mode: CapSizeMode) -> Self {
        let mut counts = vec![[0u64; BIN_COUNT]; vmmap.len()];
        for (node, data) in graph.vertices() {
            if data.cap.is_overflowed() {
                warn!("Skip overflowed node {}", node);
                continue;
            }
            let bin = bin_index(data.cap.length);
            for (idx, entry) in vmmap.iter().enumerate() {
                counts[idx][bin] += references(data, entry, mode);
            }
        }

        let rows = counts
            .iter()
            .map(|row| {
                let total: u64 = row.iter().sum();
                let mut normalized = [0.0; BIN_COUNT];
                if total > 0 {
                    for (out, &count) in normalized.iter_mut().zip(row) {
                        *out = count as f64 / total as f64;
                    }
                }
                normalized
            })
            .collect();
        debug!("Size histogram for {} regions ({:?})", vmmap.len(), mode);

        Self { mode, counts, rows }
    }

    pub fn mode(&self) -> CapSizeMode {
        self.mode
    }

    /// Raw bin counts per entry
    pub fn counts(&self) -> &[[u64; BIN_COUNT]] {
        &self.counts
    }

    /// Normalized rows; entries without samples are all zero
    pub fn rows(&self) -> &[[f64; BIN_COUNT]] {
        &self.rows
    }

    /// Legend label of each bin, named after its upper edge
    pub fn bin_labels() -> Vec<String> {
        SIZE_BINS[1..]
            .iter()
            .map(|edge| format!("Size: 2^{}", edge))
            .collect()
    }
}

fn references(data: &NodeData, entry: &VmMapEntry, mode: CapSizeMode) -> u64 {
    match mode {
        CapSizeMode::Creation => {
            u64::from(entry.start <= data.cap.bound() && data.cap.base < entry.end)
        }
        CapSizeMode::Deref => data
            .deref_log
            .iter()
            .filter(|d| matches!(d.kind, DerefKind::Load | DerefKind::Store))
            .filter(|d| entry.range().contains(d.address))
            .count() as u64,
        CapSizeMode::Call => data
            .derefs(DerefKind::Call)
            .filter(|d| entry.range().contains(d.address))
            .count() as u64,
    }
}
