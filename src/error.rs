//! Error types shared by the capmap analysis modules
//!
//! Structural violations (overlapping filters, incomplete partitions,
//! stale transform indexes) abort the current pass. Per-node data quality
//! problems (`InvalidOperand`, `OverflowedCapability`) are returned to the
//! caller, which logs them and skips the offending item.

use crate::range::Range;
use thiserror::Error;

/// Errors that can occur while building or querying a capability map
#[derive(Error, Debug)]
pub enum CapmapError {
    #[error("Operand is not a capability register: {0}")]
    InvalidOperand(String),

    #[error("Range {requested} overlaps {existing} in another filter")]
    OverlappingFilterRange { requested: Range, existing: Range },

    #[error("Range {requested} overlaps {count} ranges in the same filter")]
    AmbiguousFilterMerge { requested: Range, count: usize },

    #[error("Address-space partition is incomplete: {0}")]
    IncompletePartition(String),

    #[error("The range {0} must have a KEEP or OMIT kind")]
    UnknownRangeKind(Range),

    #[error("Overflowed capability: base {base:#x} is above bound {bound:#x}")]
    OverflowedCapability { base: u64, bound: u64 },

    #[error("Transform index is stale, refresh it before querying")]
    StalePartition,

    #[error("Multiple munmap for mapped block at vertex {0}")]
    MultipleMunmap(usize),

    #[error("Unknown provenance vertex {0}")]
    UnknownNode(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capmap operations
pub type Result<T> = std::result::Result<T, CapmapError>;
