//! Incremental construction of the uninteresting address-space regions
//!
//! The builder starts by omitting the whole address space and carves out
//! every range reported as interesting. Remainders smaller than the size
//! limit are dropped, so narrow gaps between interesting ranges stay
//! expanded instead of collapsing into slivers.
//!
//! # Algorithm
//!
//! For each OMIT member `R` overlapping a new interesting range `NR`:
//!
//! ```text
//! (i)   NR inside R         R: |-----[==NR==]-----|  → split, keep halves ≥ limit
//! (ii)  R inside NR        NR: |===[--R--]===|       → remove R
//! (iii) NR crosses R.start     [==NR==|--R--|        → R.start = NR.end
//! (iv)  NR crosses R.end       |--R--|==NR==]        → R.end = NR.start
//! ```
//!
//! # Example
//!
//! ```
//! use capmap::omit_builder::OmitRangeBuilder;
//! use capmap::range::{Range, RangeKind};
//!
//! let mut builder = OmitRangeBuilder::new();
//! builder.inspect(&Range::new(1000, 2000, RangeKind::Keep));
//!
//! // [0, 1000) is narrower than the 4096 limit and is dropped
//! assert_eq!(builder.get_omit_ranges(), vec![(2000, u64::MAX)]);
//! ```

use crate::error::Result;
use crate::provenance::NodeData;
use crate::range::{Range, RangeKind, RangeSet, MAX_ADDRESS};
use crate::vmmap::VmMapEntry;
use tracing::trace;

/// Default minimum size of an omitted region
pub const DEFAULT_SIZE_LIMIT: u64 = 1 << 12;

/// Maintains the OMIT ranges complementary to the interesting ranges seen
#[derive(Debug, Clone)]
pub struct OmitRangeBuilder {
    ranges: RangeSet,
    size_limit: u64,
    address_limit: u64,
}

impl Default for OmitRangeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OmitRangeBuilder {
    /// Omit `[0, MAX_ADDRESS)` with the default size limit
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_SIZE_LIMIT, MAX_ADDRESS)
    }

    /// Omit `[0, address_limit)`, dropping remainders below `size_limit`
    pub fn with_limits(size_limit: u64, address_limit: u64) -> Self {
        let mut ranges = RangeSet::new();
        ranges.insert(Range::new(0, address_limit, RangeKind::Omit));
        Self {
            ranges,
            size_limit,
            address_limit,
        }
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    pub fn address_limit(&self) -> u64 {
        self.address_limit
    }

    pub fn ranges(&self) -> &RangeSet {
        &self.ranges
    }

    /// Mark `node_range` as interesting, shrinking the OMIT members it hits
    pub fn inspect(&mut self, node_range: &Range) {
        if node_range.is_empty() {
            trace!("Ignore empty range {}", node_range);
            return;
        }
        let overlap = self.ranges.match_overlap_range(node_range);
        for r in overlap {
            let Some(idx) = self.ranges.position(&r) else {
                continue;
            };
            self.ranges.remove(idx);

            if node_range.start >= r.start && node_range.end <= r.end {
                self.keep_if_large(Range::new(r.start, node_range.start, RangeKind::Omit));
                self.keep_if_large(Range::new(node_range.end, r.end, RangeKind::Omit));
            } else if node_range.start <= r.start && node_range.end >= r.end {
                trace!("Drop {} covered by {}", r, node_range);
            } else if node_range.start < r.start {
                self.keep_if_large(Range::new(node_range.end, r.end, RangeKind::Omit));
            } else {
                self.keep_if_large(Range::new(r.start, node_range.start, RangeKind::Omit));
            }
        }
    }

    // Empty remainders are dropped even with a zero size limit.
    fn keep_if_large(&mut self, range: Range) {
        if !range.is_empty() && range.size() >= self.size_limit {
            self.ranges.insert(range);
        } else {
            trace!("Drop sliver {}", range);
        }
    }

    /// The current OMIT ranges as `(start, end)` pairs
    pub fn get_omit_ranges(&self) -> Vec<(u64, u64)> {
        self.ranges.to_pairs()
    }

    pub fn into_ranges(self) -> RangeSet {
        self.ranges
    }
}

/// Omit builder fed with capability spans
///
/// Spans larger than twice the size limit only keep their first and last
/// `size_limit` bytes interesting, so a huge capability shows its edges
/// while its middle collapses.
#[derive(Debug, Clone)]
pub struct CapabilityOmitBuilder {
    inner: OmitRangeBuilder,
    split_size: u64,
    split_large: bool,
}

impl Default for CapabilityOmitBuilder {
    fn default() -> Self {
        Self::new(OmitRangeBuilder::new())
    }
}

impl CapabilityOmitBuilder {
    pub fn new(inner: OmitRangeBuilder) -> Self {
        let split_size = inner.size_limit().saturating_mul(2);
        Self {
            inner,
            split_size,
            split_large: true,
        }
    }

    /// Submit large spans whole instead of splitting them
    pub fn without_split(mut self) -> Self {
        self.split_large = false;
        self
    }

    pub fn split_size(&self) -> u64 {
        self.split_size
    }

    /// Mark the span of a provenance vertex as interesting
    ///
    /// # Errors
    ///
    /// Returns `OverflowedCapability` when the capability bound wrapped
    /// below its base; the builder is left untouched.
    pub fn inspect_node(&mut self, node: &NodeData) -> Result<()> {
        let keep_range = node.cap.checked_range()?;
        self.inspect_range(&keep_range);
        Ok(())
    }

    /// Mark a VM map region as interesting
    pub fn inspect_vm_entry(&mut self, entry: &VmMapEntry) {
        self.inspect_range(&entry.range());
    }

    /// Spans are never split with a zero size limit, their edges would be empty
    pub fn inspect_range(&mut self, node_range: &Range) {
        let size_limit = self.inner.size_limit();
        if self.split_large && size_limit > 0 && node_range.size() > self.split_size {
            let left = Range::new(
                node_range.start,
                node_range.start + size_limit,
                RangeKind::Keep,
            );
            let right = Range::new(node_range.end - size_limit, node_range.end, RangeKind::Keep);
            self.inner.inspect(&left);
            self.inner.inspect(&right);
        } else {
            self.inner.inspect(node_range);
        }
    }

    pub fn get_omit_ranges(&self) -> Vec<(u64, u64)> {
        self.inner.get_omit_ranges()
    }

    pub fn ranges(&self) -> &RangeSet {
        self.inner.ranges()
    }

    pub fn into_inner(self) -> OmitRangeBuilder {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CheriCap;
    use crate::error::CapmapError;
    use crate::provenance::NodeOrigin;

    fn keep(start: u64, end: u64) -> Range {
        Range::new(start, end, RangeKind::Keep)
    }

    #[test]
    fn test_initial_state_omits_everything() {
        let builder = OmitRangeBuilder::new();
        assert_eq!(builder.get_omit_ranges(), vec![(0, MAX_ADDRESS)]);
        assert_eq!(builder.size_limit(), 4096);
    }

    #[test]
    fn test_small_left_remainder_is_dropped() {
        let mut builder = OmitRangeBuilder::new();
        builder.inspect(&keep(1000, 2000));
        assert_eq!(builder.get_omit_ranges(), vec![(2000, MAX_ADDRESS)]);
    }

    #[test]
    fn test_split_keeps_both_large_halves() {
        let mut builder = OmitRangeBuilder::with_limits(0x1000, 0x10_0000);
        builder.inspect(&keep(0x8000, 0x9000));
        assert_eq!(
            builder.get_omit_ranges(),
            vec![(0, 0x8000), (0x9000, 0x10_0000)]
        );
    }

    #[test]
    fn test_covered_range_is_removed() {
        let mut builder = OmitRangeBuilder::with_limits(0x1000, 0x10_0000);
        builder.inspect(&keep(0x8000, 0x9000));
        builder.inspect(&keep(0, 0x8800));
        assert_eq!(builder.get_omit_ranges(), vec![(0x9000, 0x10_0000)]);
    }

    #[test]
    fn test_crossing_start_shrinks_range() {
        let mut builder = OmitRangeBuilder::with_limits(0x1000, 0x10_0000);
        builder.inspect(&keep(0x8000, 0x9000));
        builder.inspect(&keep(0x8800, 0xA000));
        assert_eq!(
            builder.get_omit_ranges(),
            vec![(0, 0x8000), (0xA000, 0x10_0000)]
        );
    }

    #[test]
    fn test_crossing_end_shrinks_range() {
        let mut builder = OmitRangeBuilder::with_limits(0x1000, 0x10_0000);
        builder.inspect(&keep(0x8000, 0x9000));
        builder.inspect(&keep(0x7000, 0x8800));
        assert_eq!(
            builder.get_omit_ranges(),
            vec![(0, 0x7000), (0x9000, 0x10_0000)]
        );
    }

    #[test]
    fn test_shrunk_sliver_is_dropped() {
        let mut builder = OmitRangeBuilder::with_limits(0x1000, 0x10_0000);
        builder.inspect(&keep(0x8000, 0x9000));
        builder.inspect(&keep(0xA000, 0xB000));
        // [0x9000, 0xA000) is exactly the limit and survives
        assert!(builder.get_omit_ranges().contains(&(0x9000, 0xA000)));
        builder.inspect(&keep(0x9800, 0xA000));
        assert!(!builder.get_omit_ranges().iter().any(|r| r.0 == 0x9000));
    }

    #[test]
    fn test_zero_limit_never_keeps_empty_ranges() {
        let mut builder = OmitRangeBuilder::with_limits(0, 0x10000);
        builder.inspect(&keep(0, 0x1000));
        builder.inspect(&keep(0x1000, 0x2000));
        assert_eq!(builder.get_omit_ranges(), vec![(0x2000, 0x10000)]);
    }

    #[test]
    fn test_empty_range_is_ignored() {
        let mut builder = OmitRangeBuilder::with_limits(0, 0x10000);
        builder.inspect(&keep(0x4000, 0x4000));
        assert_eq!(builder.get_omit_ranges(), vec![(0, 0x10000)]);
    }

    #[test]
    fn test_zero_limit_keeps_whole_capability() {
        let mut builder = CapabilityOmitBuilder::new(OmitRangeBuilder::with_limits(0, 0x10_0000));
        builder.inspect_range(&keep(0x1_0000, 0x1_1000));
        assert_eq!(
            builder.get_omit_ranges(),
            vec![(0, 0x1_0000), (0x1_1000, 0x10_0000)]
        );
    }

    #[test]
    fn test_omit_members_never_overlap() {
        let mut builder = OmitRangeBuilder::with_limits(0x100, 0x10_0000);
        for (start, end) in [(0x500, 0x900), (0x880, 0x2000), (0x10, 0x20), (0x3000, 0x3100)] {
            builder.inspect(&keep(start, end));
        }
        let ranges = builder.ranges();
        for (i, a) in ranges.iter().enumerate() {
            for b in ranges.iter().skip(i + 1) {
                assert!(!a.overlaps(b), "{} overlaps {}", a, b);
            }
        }
    }

    #[test]
    fn test_large_capability_keeps_only_edges() {
        let mut builder =
            CapabilityOmitBuilder::new(OmitRangeBuilder::with_limits(0x1000, 0x100_0000));
        builder.inspect_range(&keep(0x10_0000, 0x20_0000));
        assert_eq!(
            builder.get_omit_ranges(),
            vec![
                (0, 0x10_0000),
                (0x10_1000, 0x1F_F000),
                (0x20_0000, 0x100_0000)
            ]
        );
    }

    #[test]
    fn test_without_split_keeps_whole_span() {
        let mut builder =
            CapabilityOmitBuilder::new(OmitRangeBuilder::with_limits(0x1000, 0x100_0000))
                .without_split();
        builder.inspect_range(&keep(0x10_0000, 0x20_0000));
        assert_eq!(
            builder.get_omit_ranges(),
            vec![(0, 0x10_0000), (0x20_0000, 0x100_0000)]
        );
    }

    #[test]
    fn test_overflowed_node_is_rejected() {
        let mut builder = CapabilityOmitBuilder::default();
        let cap = CheriCap {
            base: u64::MAX - 0x10,
            length: 0x100,
            ..CheriCap::default()
        };
        let err = builder
            .inspect_node(&NodeData::new(cap, NodeOrigin::Root))
            .unwrap_err();
        assert!(matches!(err, CapmapError::OverflowedCapability { .. }));
        assert_eq!(builder.get_omit_ranges(), vec![(0, MAX_ADDRESS)]);
    }
}
