use anyhow::{Context, Result};
use capmap::cli::{Cli, OutputFormat};
use capmap::{AnalysisConfig, ProvenanceAnalysis, Report, TraceEvent, VmMapEntry};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber, `--debug` forces TRACE level
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} from {}", what, path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse {} in {}", what, path.display()))
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(size_limit) = args.size_limit {
        config.size_limit = size_limit;
    }

    let events: Vec<TraceEvent> = read_json(&args.events, "trace events")?;
    let vmmap: Vec<VmMapEntry> = match &args.vmmap {
        Some(path) => read_json(path, "VM map")?,
        None => Vec::new(),
    };

    let result = ProvenanceAnalysis::new(config).run(&events, &vmmap)?;
    let mut report = Report::from_result(&result)?;
    if let Some(mode) = args.cap_size {
        report = report.with_cap_sizes(&result, mode);
    }

    match args.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print!("{}", report.to_text()),
    }

    Ok(())
}
