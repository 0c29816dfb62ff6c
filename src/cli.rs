//! CLI argument parsing for capmap

use crate::cap_size::CapSizeMode;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for the analysis report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "capmap")]
#[command(version)]
#[command(about = "Capability provenance and collapsed address-space map of a CHERI trace", long_about = None)]
pub struct Cli {
    /// Pre-decoded trace events (JSON array)
    #[arg(value_name = "EVENTS")]
    pub events: PathBuf,

    /// VM map of the traced process (JSON array of regions)
    #[arg(long = "vmmap", value_name = "FILE")]
    pub vmmap: Option<PathBuf>,

    /// Analysis configuration (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Smallest gap between interesting ranges that is collapsed, overrides the config
    #[arg(short = 's', long = "size-limit", value_name = "BYTES")]
    pub size_limit: Option<u64>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Add the capability size histogram of every VM map region
    #[arg(long = "cap-size", value_enum, value_name = "MODE")]
    pub cap_size: Option<CapSizeMode>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
