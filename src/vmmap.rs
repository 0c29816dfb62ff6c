//! Pre-parsed process memory map entries
//!
//! Loading the map from procstat output is left to the caller; the
//! analysis only needs the region bounds, permissions and backing path.

use crate::range::{Range, RangeKind};
use serde::{Deserialize, Serialize};

/// One mapped region of the traced process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmMapEntry {
    pub start: u64,
    pub end: u64,
    /// Permission string, e.g. `rw` or `rx`
    #[serde(default)]
    pub perms: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub grows_down: bool,
}

impl VmMapEntry {
    pub fn new(start: u64, end: u64, perms: &str, path: &str) -> Self {
        Self {
            start,
            end,
            perms: perms.to_string(),
            path: path.to_string(),
            grows_down: false,
        }
    }

    /// The region as an interesting range
    pub fn range(&self) -> Range {
        Range::new(self.start, self.end, RangeKind::Keep)
    }

    /// Basename of the backing file; anonymous regions growing down are the stack
    pub fn name(&self) -> &str {
        let name = self.path.rsplit('/').next().unwrap_or("");
        if name.is_empty() && self.grows_down {
            "stack"
        } else {
            name
        }
    }

    /// `perms name` label for the region
    pub fn label(&self) -> String {
        format!("{} {}", self.perms, self.name())
    }
}
