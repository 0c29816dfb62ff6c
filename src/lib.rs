//! capmap - Capability provenance analysis for CHERI instruction traces
//!
//! This library reconstructs how every capability in a trace was derived,
//! finds the stretches of the 64-bit address space no capability touches,
//! and collapses them with an invertible piecewise-linear transform so the
//! interesting regions can be displayed side by side.
//!
//! ```text
//! TraceEvent ──► builder ──► provenance graph
//!                   │
//!                   ▼
//!             omit_builder ──► filters ──► collapse ──► ticks / address_map
//! ```

pub mod address_map;
pub mod analysis;
pub mod builder;
pub mod cap_size;
pub mod capability;
pub mod cli;
pub mod collapse;
pub mod config;
pub mod error;
pub mod filters;
pub mod omit_builder;
pub mod provenance;
pub mod range;
pub mod report;
pub mod ticks;
pub mod trace;
pub mod vmmap;

pub use analysis::{AnalysisResult, AnalysisSummary, ProvenanceAnalysis};
pub use capability::{CapPerm, CheriCap};
pub use collapse::AddressSpaceCollapse;
pub use config::AnalysisConfig;
pub use error::{CapmapError, Result};
pub use provenance::{NodeData, NodeId, NodeOrigin, ProvenanceGraph};
pub use range::{Range, RangeKind, RangeSet, MAX_ADDRESS};
pub use report::Report;
pub use trace::TraceEvent;
pub use vmmap::VmMapEntry;
