//! Omit/include address filters and partition finalization
//!
//! Filters are two mutually exclusive lists of address ranges. Depending
//! on the [`FilterMode`], one list is mapped onto the address space and
//! everything it does not cover becomes the complement, which yields a
//! complete KEEP/OMIT partition for the collapse transform.

use crate::error::{CapmapError, Result};
use crate::range::{Range, RangeKind, RangeSet, MAX_ADDRESS};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Which filter list decides the classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Every address not explicitly omitted is KEEP
    #[default]
    DefaultInclude,
    /// Every address not explicitly included is OMIT
    DefaultOmit,
}

/// Omit and include filter lists over `[0, address_limit)`
#[derive(Debug, Clone)]
pub struct AddressFilters {
    omit: RangeSet,
    include: RangeSet,
    mode: FilterMode,
    address_limit: u64,
}

impl Default for AddressFilters {
    fn default() -> Self {
        Self::new(FilterMode::DefaultInclude, MAX_ADDRESS)
    }
}

impl AddressFilters {
    pub fn new(mode: FilterMode, address_limit: u64) -> Self {
        Self {
            omit: RangeSet::new(),
            include: RangeSet::new(),
            mode,
            address_limit,
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn omit_filters(&self) -> &RangeSet {
        &self.omit
    }

    pub fn include_filters(&self) -> &RangeSet {
        &self.include
    }

    /// Add a range to the omit list
    ///
    /// # Errors
    ///
    /// - `OverlappingFilterRange` if the range overlaps an include filter
    /// - `AmbiguousFilterMerge` if it overlaps more than one omit filter
    pub fn add_omit(&mut self, range: Range) -> Result<()> {
        add_filter(&mut self.omit, &self.include, range.with_kind(RangeKind::Omit))
    }

    /// Add a range to the include list
    ///
    /// # Errors
    ///
    /// Same as [`AddressFilters::add_omit`] with the lists swapped.
    pub fn add_include(&mut self, range: Range) -> Result<()> {
        add_filter(&mut self.include, &self.omit, range.with_kind(RangeKind::Keep))
    }

    /// Split `target` into mapped and complement regions
    ///
    /// In `DefaultInclude` mode the omit filters are mapped as OMIT and the
    /// rest of `target` is KEEP; `DefaultOmit` maps the include filters as
    /// KEEP and the rest as OMIT. Empty pieces are dropped and the result is
    /// sorted by start.
    pub fn map_partition(&self, target: &Range) -> RangeSet {
        let (regions, kind, complement_kind) = match self.mode {
            FilterMode::DefaultInclude => (
                self.omit.match_overlap_range(target),
                RangeKind::Omit,
                RangeKind::Keep,
            ),
            FilterMode::DefaultOmit => (
                self.include.match_overlap_range(target),
                RangeKind::Keep,
                RangeKind::Omit,
            ),
        };
        debug!(
            "Map {} filter regions on {}",
            regions.len(),
            target
        );

        let mut partition = RangeSet::new();
        let mut cursor = target.start;
        for r in &regions {
            let start = target.start.max(r.start);
            let end = target.end.min(r.end);
            if start > cursor {
                partition.insert(Range::new(cursor, start, complement_kind));
            }
            if end > start {
                partition.insert(Range::new(start, end, kind));
                cursor = cursor.max(end);
            }
        }
        if cursor < target.end {
            partition.insert(Range::new(cursor, target.end, complement_kind));
        }
        partition
    }

    /// Omit every `(start, end)` pair and return the complete partition
    ///
    /// # Errors
    ///
    /// Propagates filter conflicts from [`AddressFilters::add_omit`] and
    /// partition errors from [`validate_partition`].
    pub fn set_omit_ranges(&mut self, ranges: &[(u64, u64)]) -> Result<RangeSet> {
        for &(start, end) in ranges {
            self.add_omit(Range::new(start, end, RangeKind::Omit))?;
        }
        let partition = self.map_partition(&Range::unknown(0, self.address_limit));
        validate_partition(&partition, self.address_limit)?;
        Ok(partition)
    }
}

fn add_filter(target: &mut RangeSet, other: &RangeSet, range: Range) -> Result<()> {
    if let Some(existing) = other.first_overlap_range(&range) {
        error!("Range {} is present in another filter", range);
        return Err(CapmapError::OverlappingFilterRange {
            requested: range,
            existing: *existing,
        });
    }

    let existing = target.match_overlap_range(&range);
    match existing.len() {
        0 => target.insert(range),
        1 => {
            let merged = existing.as_slice()[0];
            if let Some(idx) = target.position(&merged) {
                target.remove(idx);
            }
            target.insert(merged.envelope(&range, range.kind));
        }
        count => {
            error!("Too many overlapping ranges for {}", range);
            return Err(CapmapError::AmbiguousFilterMerge {
                requested: range,
                count,
            });
        }
    }
    Ok(())
}

/// Check that `set` is a complete KEEP/OMIT partition of `[0, limit)`
///
/// # Errors
///
/// - `UnknownRangeKind` for a member that is neither KEEP nor OMIT
/// - `IncompletePartition` for a gap, an overlap or a wrong end
pub fn validate_partition(set: &RangeSet, limit: u64) -> Result<()> {
    let mut cursor = 0u64;
    for r in set {
        if r.kind == RangeKind::Unknown {
            error!("The range {} must have a valid type", r);
            return Err(CapmapError::UnknownRangeKind(*r));
        }
        if r.start != cursor {
            let msg = format!("expected a range at {:#x}, found {}", cursor, r);
            error!("Invalid partition: {}", msg);
            return Err(CapmapError::IncompletePartition(msg));
        }
        cursor = r.end;
    }
    if cursor != limit {
        let msg = format!("partition ends at {:#x} instead of {:#x}", cursor, limit);
        error!("Invalid partition: {}", msg);
        return Err(CapmapError::IncompletePartition(msg));
    }
    Ok(())
}
