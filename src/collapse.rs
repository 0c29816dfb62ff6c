//! Collapsing address-space coordinate transform
//!
//! Maps 64-bit addresses to display coordinates. KEEP ranges are drawn at
//! full scale while every OMIT range is shrunk by a common `omit_scale`,
//! chosen so that the omitted ranges together take `omit_fraction` (5% by
//! default) of the width of the kept ranges.
//!
//! # Index
//!
//! ```text
//! partition:  |--OMIT--|==KEEP==|-----OMIT-----|==KEEP==|
//! display:     |-|======|--|======|
//!             ^ origin: first KEEP start maps to 0
//!
//! index: BTreeMap<start, Segment { end, kind, offset, scale }>
//! forward(a) = offset + (a - start) * scale   for the last start <= a
//! ```
//!
//! The index is rebuilt by [`AddressSpaceCollapse::refresh`]. Changing the
//! partition or the omit fraction marks it stale and every query fails with
//! `StalePartition` until the next refresh.
//!
//! # Example
//!
//! ```
//! use capmap::collapse::AddressSpaceCollapse;
//! use capmap::range::{Range, RangeKind, RangeSet};
//!
//! let partition = RangeSet::from_ranges(vec![
//!     Range::new(0, 0x1000, RangeKind::Omit),
//!     Range::new(0x1000, 0x2000, RangeKind::Keep),
//!     Range::new(0x2000, 0x10000, RangeKind::Omit),
//! ]);
//! let mut collapse = AddressSpaceCollapse::new(0x10000);
//! collapse.update_range(partition);
//!
//! assert_eq!(collapse.forward_address(0x1000).unwrap(), 0.0);
//! assert_eq!(collapse.forward_address(0x1FFF).unwrap(), 4095.0);
//! ```

use crate::error::{CapmapError, Result};
use crate::range::{Range, RangeKind, RangeSet};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Default share of the kept width given to omitted ranges
pub const DEFAULT_OMIT_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    end: u64,
    kind: RangeKind,
    /// Display coordinate of the segment start
    offset: f64,
    scale: f64,
}

/// Piecewise-linear address to display-coordinate transform
#[derive(Debug, Clone)]
pub struct AddressSpaceCollapse {
    ranges: RangeSet,
    address_limit: u64,
    omit_fraction: f64,
    omit_scale: f64,
    index: BTreeMap<u64, Segment>,
    origin: f64,
    dirty: bool,
}

impl AddressSpaceCollapse {
    /// Identity transform: one KEEP range over `[0, address_limit)`
    pub fn new(address_limit: u64) -> Self {
        let mut ranges = RangeSet::new();
        ranges.insert(Range::new(0, address_limit, RangeKind::Keep));
        let mut collapse = Self {
            ranges,
            address_limit,
            omit_fraction: DEFAULT_OMIT_FRACTION,
            omit_scale: 1.0,
            index: BTreeMap::new(),
            origin: 0.0,
            dirty: true,
        };
        collapse.refresh();
        collapse
    }

    pub fn with_omit_fraction(mut self, fraction: f64) -> Self {
        self.set_omit_fraction(fraction);
        self.refresh();
        self
    }

    /// Replace the partition and rebuild the index
    ///
    /// The partition must cover `[0, address_limit)` with KEEP and OMIT
    /// ranges only, see [`crate::filters::validate_partition`].
    pub fn update_range(&mut self, ranges: RangeSet) {
        self.set_ranges(ranges);
        self.refresh();
    }

    /// Replace the partition, leaving the index stale
    pub fn set_ranges(&mut self, ranges: RangeSet) {
        self.ranges = ranges;
        self.update_scale();
        self.dirty = true;
    }

    /// Change the omitted share of the kept width, leaving the index stale
    pub fn set_omit_fraction(&mut self, fraction: f64) {
        self.omit_fraction = fraction;
        self.update_scale();
        self.dirty = true;
    }

    // The scale keeps its previous value when nothing is omitted.
    fn update_scale(&mut self) {
        let keep_size = self.ranges.total_size(RangeKind::Keep);
        let omit_size = self.ranges.total_size(RangeKind::Omit);
        if omit_size != 0 {
            self.omit_scale = self.omit_fraction * keep_size as f64 / omit_size as f64;
        }
    }

    /// Rebuild the lookup index from the current partition
    pub fn refresh(&mut self) {
        self.index.clear();
        let mut collapsed = 0.0;
        let mut origin = None;
        for r in &self.ranges {
            let scale = match r.kind {
                RangeKind::Keep => 1.0,
                _ => self.omit_scale,
            };
            if r.kind == RangeKind::Keep && origin.is_none() {
                origin = Some(collapsed);
            }
            self.index.insert(
                r.start,
                Segment {
                    end: r.end,
                    kind: r.kind,
                    offset: collapsed,
                    scale,
                },
            );
            collapsed += r.size() as f64 * scale;
        }

        let origin = origin.unwrap_or(0.0);
        for segment in self.index.values_mut() {
            segment.offset -= origin;
        }
        self.origin = origin;
        self.dirty = false;
        debug!(
            "Collapse index rebuilt: {} segments, omit_scale {}",
            self.index.len(),
            self.omit_scale
        );
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn omit_scale(&self) -> f64 {
        self.omit_scale
    }

    pub fn omit_fraction(&self) -> f64 {
        self.omit_fraction
    }

    pub fn address_limit(&self) -> u64 {
        self.address_limit
    }

    pub fn ranges(&self) -> &RangeSet {
        &self.ranges
    }

    /// Uncollapsed display width in front of the first KEEP range
    pub fn origin(&self) -> f64 {
        self.origin
    }

    fn segment(&self, key: u64) -> Result<(u64, &Segment)> {
        if self.dirty {
            return Err(CapmapError::StalePartition);
        }
        let (&start, segment) = self.index.range(..=key).next_back().ok_or_else(|| {
            CapmapError::IncompletePartition(format!("no range starts at or below {:#x}", key))
        })?;
        if segment.kind == RangeKind::Unknown {
            let range = Range::unknown(start, segment.end);
            error!("The range {} must have a valid type", range);
            return Err(CapmapError::UnknownRangeKind(range));
        }
        Ok((start, segment))
    }

    /// Display coordinate of an address
    ///
    /// Negative inputs are returned unchanged.
    ///
    /// # Errors
    ///
    /// - `StalePartition` if the index needs a refresh
    /// - `UnknownRangeKind` if the address lands in an unclassified range
    pub fn forward(&self, x: f64) -> Result<f64> {
        if self.dirty {
            return Err(CapmapError::StalePartition);
        }
        if x < 0.0 {
            return Ok(x);
        }
        // Saturating conversion, addresses past u64::MAX use the last segment.
        let (start, segment) = self.segment(x as u64)?;
        Ok(segment.offset + (x - start as f64) * segment.scale)
    }

    /// Display coordinate of an integer address without float rounding of
    /// the offset inside its range
    pub fn forward_address(&self, address: u64) -> Result<f64> {
        let (start, segment) = self.segment(address)?;
        Ok(segment.offset + (address - start) as f64 * segment.scale)
    }

    /// Address at a display coordinate
    ///
    /// Coordinates past the end of the partition clamp to its end. The
    /// result is an `f64`, so addresses above 2^53 only come back to within
    /// their float spacing, e.g. 2^11 for kernel addresses near 2^64.
    ///
    /// # Errors
    ///
    /// - `StalePartition` if the index needs a refresh
    /// - `UnknownRangeKind` if the scan crosses an unclassified range
    pub fn inverse(&self, x: f64) -> Result<f64> {
        if self.dirty {
            return Err(CapmapError::StalePartition);
        }
        let mut last_end = 0;
        for (&start, segment) in &self.index {
            if segment.kind == RangeKind::Unknown {
                let range = Range::unknown(start, segment.end);
                error!("The range {} must have a valid type", range);
                return Err(CapmapError::UnknownRangeKind(range));
            }
            let width = (segment.end - start) as f64 * segment.scale;
            if x > segment.offset + width {
                last_end = segment.end;
                continue;
            }
            if segment.scale == 0.0 {
                return Ok(start as f64);
            }
            return Ok(start as f64 + (x - segment.offset) / segment.scale);
        }
        Ok(last_end as f64)
    }

    /// Clamp view limits to the address space
    pub fn clamp_limits(&self, vmin: f64, vmax: f64) -> (f64, f64) {
        (vmin.max(0.0), vmax.min(self.address_limit as f64))
    }

    /// Address to display handle
    pub fn view(&self) -> CollapseView<'_> {
        CollapseView {
            collapse: self,
            direction: Direction::Forward,
        }
    }

    /// Display to address handle
    pub fn inverse_view(&self) -> CollapseView<'_> {
        self.view().inverted()
    }
}

impl Default for AddressSpaceCollapse {
    fn default() -> Self {
        Self::new(crate::range::MAX_ADDRESS)
    }
}

/// Direction of a [`CollapseView`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

/// Handle querying a collapse transform in one direction
///
/// Both directions borrow the same index, so a view never observes a
/// different partition than its inverse.
#[derive(Debug, Clone, Copy)]
pub struct CollapseView<'a> {
    collapse: &'a AddressSpaceCollapse,
    direction: Direction,
}

impl<'a> CollapseView<'a> {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn inverted(&self) -> CollapseView<'a> {
        let direction = match self.direction {
            Direction::Forward => Direction::Inverse,
            Direction::Inverse => Direction::Forward,
        };
        CollapseView {
            collapse: self.collapse,
            direction,
        }
    }

    pub fn transform_x(&self, x: f64) -> Result<f64> {
        match self.direction {
            Direction::Forward => self.collapse.forward(x),
            Direction::Inverse => self.collapse.inverse(x),
        }
    }

    /// Transform the x coordinate of every point, y is left unchanged
    pub fn transform_points(&self, points: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
        points
            .iter()
            .map(|&(x, y)| Ok((self.transform_x(x)?, y)))
            .collect()
    }
}
