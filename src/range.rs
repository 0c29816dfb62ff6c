//! Half-open address ranges and ordered range sets
//!
//! Ranges are tagged KEEP (rendered at full scale), OMIT (collapsed) or
//! UNKNOWN (not yet classified). All overlap queries treat ranges as
//! half-open: `[0, 10)` and `[10, 20)` touch but do not overlap.
//!
//! # Example
//!
//! ```
//! use capmap::range::{Range, RangeKind, RangeSet};
//!
//! let mut set = RangeSet::new();
//! set.insert(Range::new(0, 0x1000, RangeKind::Omit));
//! set.insert(Range::new(0x2000, 0x3000, RangeKind::Omit));
//!
//! let hits = set.match_overlap_range(&Range::new(0x800, 0x2800, RangeKind::Keep));
//! assert_eq!(hits.len(), 2);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest representable address, used as the exclusive end of the
/// address space
pub const MAX_ADDRESS: u64 = u64::MAX;

/// Classification of an address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeKind {
    /// Rendered at full scale
    Keep,
    /// Collapsed to a small fraction of the kept space
    Omit,
    /// Not classified
    Unknown,
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RangeKind::Keep => "KEEP",
            RangeKind::Omit => "OMIT",
            RangeKind::Unknown => "UNK",
        };
        f.write_str(name)
    }
}

/// Half-open address interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: u64,
    pub end: u64,
    pub kind: RangeKind,
}

impl Range {
    /// Create a range, swapping the bounds if given in reverse order
    pub fn new(start: u64, end: u64, kind: RangeKind) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
            kind,
        }
    }

    /// Create an unclassified range
    pub fn unknown(start: u64, end: u64) -> Self {
        Self::new(start, end, RangeKind::Unknown)
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Check whether two ranges share at least one address
    pub fn overlaps(&self, other: &Range) -> bool {
        overlaps(self, other)
    }

    /// Check whether `addr` falls in `[start, end)`
    pub fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Check whether both endpoints of `other` fall in `[start, end)`
    pub fn contains_range(&self, other: &Range) -> bool {
        self.contains(other.start) && self.contains(other.end)
    }

    /// Smallest range enclosing both `self` and `other`, tagged with `kind`
    pub fn envelope(&self, other: &Range, kind: RangeKind) -> Range {
        envelope(self, other, kind)
    }

    /// Same bounds with a different classification
    pub fn with_kind(self, kind: RangeKind) -> Range {
        Range { kind, ..self }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Range s:{:#x} e:{:#x} t:{}>",
            self.start, self.end, self.kind
        )
    }
}

impl From<Range> for (u64, u64) {
    fn from(range: Range) -> Self {
        (range.start, range.end)
    }
}

/// Half-open overlap test
pub fn overlaps(a: &Range, b: &Range) -> bool {
    a.start < b.end && b.start < a.end
}

/// Enclosing envelope of two ranges with an explicit resulting kind
pub fn envelope(a: &Range, b: &Range, kind: RangeKind) -> Range {
    Range::new(a.start.min(b.start), a.end.max(b.end), kind)
}

/// Ranges ordered by start address
///
/// Members may overlap while a set is being built; overlap queries never
/// assume disjointness. Insertion keeps the members sorted by `start`, so
/// scans stop at the first member starting past the query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Build a set from arbitrary ranges, sorting them by start
    pub fn from_ranges(mut ranges: Vec<Range>) -> Self {
        ranges.sort_by_key(|r| (r.start, r.end));
        Self { ranges }
    }

    /// Insert keeping start order; equal starts keep insertion order
    pub fn insert(&mut self, range: Range) {
        let idx = self.ranges.partition_point(|r| r.start <= range.start);
        self.ranges.insert(idx, range);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Range> {
        self.ranges.iter()
    }

    pub fn as_slice(&self) -> &[Range] {
        &self.ranges
    }

    pub fn get(&self, idx: usize) -> Option<&Range> {
        self.ranges.get(idx)
    }

    pub fn remove(&mut self, idx: usize) -> Range {
        self.ranges.remove(idx)
    }

    /// Index of the first member equal to `range`
    pub fn position(&self, range: &Range) -> Option<usize> {
        self.ranges.iter().position(|r| r == range)
    }

    /// All members overlapping `target`, in start order
    pub fn match_overlap_range(&self, target: &Range) -> RangeSet {
        let ranges = self
            .ranges
            .iter()
            .take_while(|r| r.start < target.end)
            .filter(|r| overlaps(r, target))
            .copied()
            .collect();
        RangeSet { ranges }
    }

    /// All members containing `addr`
    pub fn match_overlap(&self, addr: u64) -> RangeSet {
        let ranges = self
            .ranges
            .iter()
            .take_while(|r| r.start <= addr)
            .filter(|r| r.contains(addr))
            .copied()
            .collect();
        RangeSet { ranges }
    }

    /// First member overlapping `target`
    pub fn first_overlap_range(&self, target: &Range) -> Option<&Range> {
        self.ranges
            .iter()
            .take_while(|r| r.start < target.end)
            .find(|r| overlaps(r, target))
    }

    /// Remove and return the first member overlapping `target`
    pub fn pop_overlap_range(&mut self, target: &Range) -> Option<Range> {
        let idx = self
            .ranges
            .iter()
            .take_while(|r| r.start < target.end)
            .position(|r| overlaps(r, target))?;
        Some(self.ranges.remove(idx))
    }

    /// Sum of member sizes with the given kind
    pub fn total_size(&self, kind: RangeKind) -> u128 {
        self.ranges
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.size() as u128)
            .sum()
    }

    /// Members as `(start, end)` pairs
    pub fn to_pairs(&self) -> Vec<(u64, u64)> {
        self.ranges.iter().map(|r| (r.start, r.end)).collect()
    }
}

impl FromIterator<Range> for RangeSet {
    fn from_iter<I: IntoIterator<Item = Range>>(iter: I) -> Self {
        RangeSet::from_ranges(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RangeSet {
    type Item = &'a Range;
    type IntoIter = std::slice::Iter<'a, Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

impl IntoIterator for RangeSet {
    type Item = Range;
    type IntoIter = std::vec::IntoIter<Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.into_iter()
    }
}
