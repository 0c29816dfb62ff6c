//! Axis tick placement on the collapsed address axis

use crate::collapse::AddressSpaceCollapse;
use crate::error::Result;
use crate::range::RangeKind;
use crate::vmmap::VmMapEntry;
use tracing::trace;

/// Minimum display distance between two ticks
pub const DEFAULT_TICK_SPACING: f64 = 4096.0;

/// One tick at the start of every KEEP range
///
/// A tick closer than `min_spacing` display units to the previous one is
/// skipped so labels do not pile up where omitted ranges collapse.
///
/// # Errors
///
/// Propagates transform errors, e.g. `StalePartition`.
pub fn tick_values(collapse: &AddressSpaceCollapse, min_spacing: f64) -> Result<Vec<u64>> {
    let mut values: Vec<u64> = Vec::new();
    for r in collapse.ranges() {
        if r.kind != RangeKind::Keep {
            continue;
        }
        if let Some(&prev) = values.last() {
            let prev_x = collapse.forward_address(prev)?;
            let curr_x = collapse.forward_address(r.start)?;
            if curr_x - prev_x < min_spacing {
                trace!("Skip tick {:#x}, too close to {:#x}", r.start, prev);
                continue;
            }
        }
        values.push(r.start);
    }
    Ok(values)
}

/// Hexadecimal tick label
pub fn format_address(address: u64) -> String {
    format!("{:#x}", address)
}

/// Sorted region boundaries of the VM map, used as explicit ticks
pub fn vmmap_ticks(entries: &[VmMapEntry]) -> Vec<u64> {
    let mut ticks: Vec<u64> = entries
        .iter()
        .flat_map(|e| [e.start, e.end])
        .collect();
    ticks.sort_unstable();
    ticks.dedup();
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{Range, RangeSet};

    fn collapse(ranges: &[(u64, u64, RangeKind)]) -> AddressSpaceCollapse {
        let set: RangeSet = ranges
            .iter()
            .map(|&(s, e, k)| Range::new(s, e, k))
            .collect();
        let mut collapse = AddressSpaceCollapse::new(0x100000);
        collapse.update_range(set);
        collapse
    }

    #[test]
    fn test_one_tick_per_keep_range() {
        let c = collapse(&[
            (0, 0x10000, RangeKind::Keep),
            (0x10000, 0x80000, RangeKind::Omit),
            (0x80000, 0x100000, RangeKind::Keep),
        ]);
        assert_eq!(tick_values(&c, 4096.0).unwrap(), vec![0, 0x80000]);
    }

    #[test]
    fn test_close_ticks_are_skipped() {
        let c = collapse(&[
            (0, 0x800, RangeKind::Keep),
            (0x800, 0x80000, RangeKind::Omit),
            (0x80000, 0x88000, RangeKind::Keep),
            (0x88000, 0x100000, RangeKind::Omit),
        ]);
        // 0x800 kept bytes plus the collapsed gap is below the spacing
        let ticks = tick_values(&c, 4096.0).unwrap();
        assert_eq!(ticks, vec![0]);
        assert_eq!(tick_values(&c, 1.0).unwrap(), vec![0, 0x80000]);
    }

    #[test]
    fn test_format_address() {
        assert_eq!(format_address(0x1000), "0x1000");
        assert_eq!(format_address(0), "0x0");
    }

    #[test]
    fn test_vmmap_ticks_sorted_and_unique() {
        let entries = vec![
            VmMapEntry::new(0x3000, 0x4000, "rw", ""),
            VmMapEntry::new(0x1000, 0x3000, "rx", "/bin/sh"),
        ];
        assert_eq!(vmmap_ticks(&entries), vec![0x1000, 0x3000, 0x4000]);
    }
}
