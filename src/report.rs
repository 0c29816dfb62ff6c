//! JSON and text reports of an analysis run

use crate::analysis::{AnalysisResult, AnalysisSummary};
use crate::cap_size::{CapSizeHistogram, CapSizeMode, BIN_COUNT};
use crate::error::Result;
use crate::ticks::format_address;
use serde::Serialize;
use std::fmt::Write;

/// An omitted address range
#[derive(Debug, Clone, Serialize)]
pub struct JsonRange {
    pub start: u64,
    pub end: u64,
}

/// An axis tick with its label
#[derive(Debug, Clone, Serialize)]
pub struct JsonTick {
    pub address: u64,
    /// Collapsed display coordinate
    pub x: f64,
    pub label: String,
}

/// One provenance vertex with its display coordinates
#[derive(Debug, Clone, Serialize)]
pub struct JsonNode {
    pub id: usize,
    pub origin: String,
    pub base: u64,
    pub length: u64,
    pub perms: String,
    pub t_alloc: i64,
    /// Absent while the capability is live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_free: Option<i64>,
    pub x_start: f64,
    pub x_end: f64,
    pub derefs: usize,
    pub parents: Vec<usize>,
}

/// Size histogram row of one VM map region
#[derive(Debug, Clone, Serialize)]
pub struct JsonCapSizeRow {
    pub region: String,
    pub counts: [u64; BIN_COUNT],
    pub shares: [f64; BIN_COUNT],
}

/// Capability size distribution over the VM map
#[derive(Debug, Clone, Serialize)]
pub struct JsonCapSizes {
    pub mode: CapSizeMode,
    pub bins: Vec<String>,
    pub regions: Vec<JsonCapSizeRow>,
}

/// Complete report
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    pub summary: AnalysisSummary,
    pub omit_ranges: Vec<JsonRange>,
    pub ticks: Vec<JsonTick>,
    pub nodes: Vec<JsonNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cap_sizes: Option<JsonCapSizes>,
}

impl Report {
    /// Collect the report data; overflowed vertices have no coordinates
    /// and are left out of `nodes`
    pub fn from_result(result: &AnalysisResult) -> Result<Self> {
        let graph = result.graph();
        let collapse = result.collapse();

        let mut nodes = Vec::new();
        for coords in result.node_coordinates()? {
            let Some(data) = graph.node(coords.node) else {
                continue;
            };
            nodes.push(JsonNode {
                id: coords.node.0,
                origin: data.origin.to_string(),
                base: data.cap.base,
                length: data.cap.length,
                perms: data.cap.perm_string(),
                t_alloc: data.cap.t_alloc,
                t_free: (!data.cap.is_live()).then_some(data.cap.t_free),
                x_start: coords.x_start,
                x_end: coords.x_end,
                derefs: data.deref_log.len(),
                parents: graph.parents(coords.node).iter().map(|p| p.0).collect(),
            });
        }

        let mut ticks = Vec::new();
        for address in result.tick_values()? {
            ticks.push(JsonTick {
                address,
                x: collapse.forward_address(address)?,
                label: format_address(address),
            });
        }

        Ok(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "capmap-json-v1".to_string(),
            summary: result.summary(),
            omit_ranges: result
                .omit_ranges()
                .iter()
                .map(|&(start, end)| JsonRange { start, end })
                .collect(),
            ticks,
            nodes,
            cap_sizes: None,
        })
    }

    /// Attach the capability size histogram of every VM map region
    pub fn with_cap_sizes(mut self, result: &AnalysisResult, mode: CapSizeMode) -> Self {
        let hist = CapSizeHistogram::build(result.graph(), result.vmmap(), mode);
        let regions = result
            .vmmap()
            .iter()
            .zip(hist.counts().iter().zip(hist.rows()))
            .map(|(entry, (&counts, &shares))| JsonCapSizeRow {
                region: entry.label(),
                counts,
                shares,
            })
            .collect();
        self.cap_sizes = Some(JsonCapSizes {
            mode,
            bins: CapSizeHistogram::bin_labels(),
            regions,
        });
        self
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary
    pub fn to_text(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(out, "events:      {} ({} skipped)", s.events, s.skipped_events);
        let _ = writeln!(out, "vertices:    {} ({} roots, {} edges)", s.vertices, s.roots, s.edges);
        let _ = writeln!(out, "overflowed:  {}", s.overflowed);
        let _ = writeln!(out, "mmap closed: {}", s.closed_mappings);
        let _ = writeln!(out, "omit scale:  {:.6}", s.omit_scale);
        let _ = writeln!(out, "omit ranges: {}", s.omit_ranges);
        for r in &self.omit_ranges {
            let _ = writeln!(out, "  {} - {}", format_address(r.start), format_address(r.end));
        }
        if !self.ticks.is_empty() {
            let labels: Vec<&str> = self.ticks.iter().map(|t| t.label.as_str()).collect();
            let _ = writeln!(out, "ticks:       {}", labels.join(" "));
        }
        if let Some(sizes) = &self.cap_sizes {
            let _ = writeln!(out, "capability sizes ({:?}): {}", sizes.mode, sizes.bins.join(", "));
            for row in &sizes.regions {
                let shares: Vec<String> = row.shares.iter().map(|s| format!("{:.2}", s)).collect();
                let _ = writeln!(out, "  {:<24} {}", row.region, shares.join(" "));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ProvenanceAnalysis;
    use crate::config::AnalysisConfig;
    use crate::trace::{CapRegister, EventKind, Operand, TraceEvent};
    use crate::vmmap::VmMapEntry;

    fn result() -> AnalysisResult {
        let events = vec![TraceEvent::new(
            7,
            0x100,
            EventKind::Root {
                dst: Operand::Capability {
                    reg: 0,
                    value: CapRegister {
                        base: 0x10000,
                        length: 0x1000,
                        permissions: 0b1100,
                        ..CapRegister::default()
                    },
                },
            },
        )];
        let config = AnalysisConfig {
            address_limit: 0x100000,
            ..AnalysisConfig::default()
        };
        ProvenanceAnalysis::new(config).run(&events, &[]).unwrap()
    }

    #[test]
    fn test_report_contents() {
        let report = Report::from_result(&result()).unwrap();
        assert_eq!(report.format, "capmap-json-v1");
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.nodes[0].perms, "LOAD STORE");
        assert_eq!(report.nodes[0].origin, "ROOT");
        assert_eq!(report.nodes[0].x_start, 0.0);
        assert_eq!(report.ticks.len(), 1);
        assert_eq!(report.ticks[0].label, "0x10000");
        assert_eq!(report.omit_ranges.len(), 2);
    }

    #[test]
    fn test_json_serialization() {
        let json = Report::from_result(&result()).unwrap().to_json().unwrap();
        assert!(json.contains("\"format\": \"capmap-json-v1\""));
        assert!(json.contains("\"omit_ranges\""));
        // live capabilities have no free time
        assert!(!json.contains("t_free"));
    }

    #[test]
    fn test_cap_sizes_per_region() {
        let result = {
            let events = vec![TraceEvent::new(
                7,
                0x100,
                EventKind::Root {
                    dst: Operand::Capability {
                        reg: 0,
                        value: CapRegister {
                            base: 0x10000,
                            length: 0x1000,
                            ..CapRegister::default()
                        },
                    },
                },
            )];
            let vmmap = vec![
                VmMapEntry::new(0x10000, 0x20000, "rw", "/lib/libc.so"),
                VmMapEntry::new(0x30000, 0x40000, "r", ""),
            ];
            ProvenanceAnalysis::new(AnalysisConfig {
                address_limit: 0x100000,
                ..AnalysisConfig::default()
            })
            .run(&events, &vmmap)
            .unwrap()
        };
        let report = Report::from_result(&result)
            .unwrap()
            .with_cap_sizes(&result, CapSizeMode::Creation);
        let sizes = report.cap_sizes.as_ref().unwrap();
        assert_eq!(sizes.regions.len(), 2);
        assert_eq!(sizes.regions[0].region, "rw libc.so");
        assert_eq!(sizes.regions[0].counts, [0, 1, 0, 0, 0]);
        assert_eq!(sizes.regions[1].shares, [0.0; BIN_COUNT]);
        assert!(report.to_text().contains("capability sizes (Creation)"));
    }

    #[test]
    fn test_text_output() {
        let text = Report::from_result(&result()).unwrap().to_text();
        assert!(text.contains("vertices:    1 (1 roots, 0 edges)"));
        assert!(text.contains("0x11000 - 0x100000"));
        assert!(text.contains("ticks:       0x10000"));
    }
}
