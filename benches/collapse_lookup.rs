//! Collapse transform lookup benchmark
//!
//! Measures forward and inverse queries on a partition with many KEEP
//! ranges, the shape produced by a trace with thousands of small
//! capabilities spread over the address space.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench collapse_lookup
//! ```

use capmap::collapse::AddressSpaceCollapse;
use capmap::filters::AddressFilters;
use capmap::omit_builder::OmitRangeBuilder;
use capmap::range::{Range, RangeKind};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// Collapse keeping `count` 4 KiB ranges spaced 1 MiB apart
fn build_collapse(count: u64) -> AddressSpaceCollapse {
    let mut builder = OmitRangeBuilder::new();
    for i in 0..count {
        let start = 0x1000_0000 + i * 0x10_0000;
        builder.inspect(&Range::new(start, start + 0x1000, RangeKind::Keep));
    }
    let mut filters = AddressFilters::default();
    let mut collapse = AddressSpaceCollapse::default();
    if let Ok(partition) = filters.set_omit_ranges(&builder.get_omit_ranges()) {
        collapse.update_range(partition);
    }
    collapse
}

/// Benchmark: forward lookup of kept addresses
fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("collapse_forward");

    for count in [16u64, 256, 4096] {
        let collapse = build_collapse(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut i = 0u64;
            b.iter(|| {
                let address = 0x1000_0000 + (i % count) * 0x10_0000 + 0x80;
                i += 1;
                black_box(collapse.forward_address(black_box(address)).ok());
            });
        });
    }

    group.finish();
}

/// Benchmark: inverse lookup, a linear scan over the partition
fn bench_inverse(c: &mut Criterion) {
    let mut group = c.benchmark_group("collapse_inverse");

    for count in [16u64, 256, 4096] {
        let collapse = build_collapse(count);
        let width = collapse
            .forward_address(0x1000_0000 + (count - 1) * 0x10_0000 + 0x1000)
            .unwrap_or(0.0);
        group.bench_with_input(BenchmarkId::from_parameter(count), &width, |b, &width| {
            let mut x = 0.0;
            b.iter(|| {
                x = (x + 997.0) % width.max(1.0);
                black_box(collapse.inverse(black_box(x)).ok());
            });
        });
    }

    group.finish();
}

/// Benchmark: index rebuild after a partition change
fn bench_refresh(c: &mut Criterion) {
    let mut collapse = build_collapse(4096);

    c.bench_function("collapse_refresh_4096", |b| {
        b.iter(|| {
            collapse.set_omit_fraction(black_box(0.05));
            collapse.refresh();
        });
    });
}

criterion_group!(benches, bench_forward, bench_inverse, bench_refresh);
criterion_main!(benches);
