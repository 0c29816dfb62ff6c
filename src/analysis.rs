//! End-to-end provenance analysis pass
//!
//! ```text
//! events ──► ProvenanceBuilder ──► graph ──► resolve_mmap_lifetimes
//!                  │
//! vmmap ───────────┤ (interesting ranges)
//!                  ▼
//!          omit ranges ──► AddressFilters ──► partition ──► AddressSpaceCollapse
//! ```

use crate::builder::{BuildStats, ProvenanceBuilder};
use crate::collapse::AddressSpaceCollapse;
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::filters::{AddressFilters, FilterMode};
use crate::provenance::{NodeId, ProvenanceGraph};
use crate::range::RangeSet;
use crate::ticks;
use crate::trace::TraceEvent;
use crate::vmmap::VmMapEntry;
use serde::Serialize;
use tracing::{info, warn};

/// Runs the analysis with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct ProvenanceAnalysis {
    config: AnalysisConfig,
}

impl ProvenanceAnalysis {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Build the graph, the address partition and the collapse transform
    ///
    /// # Errors
    ///
    /// Configuration, filter, partition and munmap pairing errors abort
    /// the pass. Invalid operands and overflowed capabilities are logged
    /// and counted in the summary instead.
    pub fn run(&self, events: &[TraceEvent], vmmap: &[VmMapEntry]) -> Result<AnalysisResult> {
        self.config.validate()?;
        info!("Analysing {} events", events.len());

        let mut builder = ProvenanceBuilder::from_config(&self.config);
        builder.consume(events)?;
        if self.config.include_vmmap {
            for entry in vmmap {
                builder.inspect_vm_entry(entry);
            }
        }
        let (mut graph, omit, stats) = builder.finish();
        let closed_mappings = graph.resolve_mmap_lifetimes()?;

        let omit_ranges = omit.get_omit_ranges();
        let mut filters = AddressFilters::new(FilterMode::DefaultInclude, self.config.address_limit);
        let partition = filters.set_omit_ranges(&omit_ranges)?;

        let mut collapse = AddressSpaceCollapse::new(self.config.address_limit)
            .with_omit_fraction(self.config.omit_fraction);
        collapse.update_range(partition.clone());

        info!(
            "Built {} vertices, {} edges, {} omit ranges",
            graph.node_count(),
            graph.edge_count(),
            omit_ranges.len()
        );

        Ok(AnalysisResult {
            config: self.config.clone(),
            graph,
            omit_ranges,
            partition,
            collapse,
            stats,
            closed_mappings,
            vmmap: vmmap.to_vec(),
        })
    }
}

/// Display coordinates of one vertex
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeCoordinates {
    pub node: NodeId,
    pub x_start: f64,
    pub x_end: f64,
    /// Allocation cycle
    pub y: i64,
}

/// Counters describing an analysis run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub events: usize,
    pub vertices: usize,
    pub edges: usize,
    pub roots: usize,
    pub skipped_events: usize,
    pub overflowed: usize,
    pub closed_mappings: usize,
    pub omit_ranges: usize,
    pub omit_scale: f64,
}

/// Products of a [`ProvenanceAnalysis`] run
#[derive(Debug)]
pub struct AnalysisResult {
    config: AnalysisConfig,
    graph: ProvenanceGraph,
    omit_ranges: Vec<(u64, u64)>,
    partition: RangeSet,
    collapse: AddressSpaceCollapse,
    stats: BuildStats,
    closed_mappings: usize,
    vmmap: Vec<VmMapEntry>,
}

impl AnalysisResult {
    pub fn graph(&self) -> &ProvenanceGraph {
        &self.graph
    }

    pub fn omit_ranges(&self) -> &[(u64, u64)] {
        &self.omit_ranges
    }

    pub fn partition(&self) -> &RangeSet {
        &self.partition
    }

    pub fn collapse(&self) -> &AddressSpaceCollapse {
        &self.collapse
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    pub fn vmmap(&self) -> &[VmMapEntry] {
        &self.vmmap
    }

    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary {
            events: self.stats.events,
            vertices: self.graph.node_count(),
            edges: self.graph.edge_count(),
            roots: self.graph.roots().len(),
            skipped_events: self.stats.skipped,
            overflowed: self.stats.overflowed,
            closed_mappings: self.closed_mappings,
            omit_ranges: self.omit_ranges.len(),
            omit_scale: self.collapse.omit_scale(),
        }
    }

    /// Axis ticks: VM map boundaries when a map is present, otherwise the
    /// starts of the kept ranges
    pub fn tick_values(&self) -> Result<Vec<u64>> {
        if self.config.include_vmmap && !self.vmmap.is_empty() {
            return Ok(ticks::vmmap_ticks(&self.vmmap));
        }
        ticks::tick_values(&self.collapse, self.config.tick_min_spacing)
    }

    /// Collapsed span of every vertex, overflowed capabilities excluded
    pub fn node_coordinates(&self) -> Result<Vec<NodeCoordinates>> {
        let mut coords = Vec::with_capacity(self.graph.node_count());
        for (node, data) in self.graph.vertices() {
            let range = match data.cap.checked_range() {
                Ok(range) => range,
                Err(err) => {
                    warn!("Skip overflowed node {}: {}", node, err);
                    continue;
                }
            };
            coords.push(NodeCoordinates {
                node,
                x_start: self.collapse.forward_address(range.start)?,
                x_end: self.collapse.forward_address(range.end)?,
                y: data.cap.t_alloc,
            });
        }
        Ok(coords)
    }
}
