//! Analysis configuration
//!
//! All fields have defaults, so a TOML file only lists what it changes:
//!
//! ```toml
//! size_limit = 8192
//! omit_fraction = 0.1
//! split_large_capabilities = false
//! ```
//!
//! TOML integers are signed 64-bit, so an `address_limit` set from a file
//! cannot exceed `i64::MAX`; leave it unset to cover the whole space.

use crate::collapse::DEFAULT_OMIT_FRACTION;
use crate::error::{CapmapError, Result};
use crate::omit_builder::DEFAULT_SIZE_LIMIT;
use crate::range::MAX_ADDRESS;
use crate::ticks::DEFAULT_TICK_SPACING;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Parameters of a provenance analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Omitted regions smaller than this are kept expanded
    pub size_limit: u64,
    /// Display width of all omitted regions relative to the kept ones
    pub omit_fraction: f64,
    /// Exclusive end of the analysed address space
    pub address_limit: u64,
    /// Minimum display distance between axis ticks
    pub tick_min_spacing: f64,
    /// Only keep the edges of capabilities larger than twice `size_limit`
    pub split_large_capabilities: bool,
    /// Feed VM map regions to the omit builder
    pub include_vmmap: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            size_limit: DEFAULT_SIZE_LIMIT,
            omit_fraction: DEFAULT_OMIT_FRACTION,
            address_limit: MAX_ADDRESS,
            tick_min_spacing: DEFAULT_TICK_SPACING,
            split_large_capabilities: true,
            include_vmmap: true,
        }
    }
}

impl AnalysisConfig {
    /// Collapse every gap, however small
    pub fn compact() -> Self {
        Self {
            size_limit: 0,
            ..Self::default()
        }
    }

    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// Returns `Parse` for malformed TOML and `InvalidConfig` for values
    /// rejected by [`AnalysisConfig::validate`].
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, otherwise the errors of
    /// [`AnalysisConfig::from_toml_str`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading configuration from {}", path.as_ref().display());
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.omit_fraction > 0.0 && self.omit_fraction <= 1.0) {
            return Err(CapmapError::InvalidConfig(format!(
                "omit_fraction must be in (0, 1], got {}",
                self.omit_fraction
            )));
        }
        if self.address_limit == 0 {
            return Err(CapmapError::InvalidConfig(
                "address_limit must be positive".to_string(),
            ));
        }
        if !(self.tick_min_spacing >= 0.0) {
            return Err(CapmapError::InvalidConfig(format!(
                "tick_min_spacing must not be negative, got {}",
                self.tick_min_spacing
            )));
        }
        Ok(())
    }
}
