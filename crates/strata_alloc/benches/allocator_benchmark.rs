//! # Allocator Benchmark
//!
//! Measures:
//! 1. Allocate/free cycles against the platform heap
//! 2. Interleaved allocation across affinities
//! 3. Owner lookup on deallocate as the block count grows

#![allow(missing_docs)]
#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use strata_alloc::{Affinity, AffinityConfig, Allocator, AllocatorConfig};

fn bench_config(block_size: usize) -> AllocatorConfig {
    AllocatorConfig {
        affinities: (0..Affinity::LAST.0)
            .map(|i| AffinityConfig::new(Affinity::new(i), block_size))
            .collect(),
        ..AllocatorConfig::default()
    }
}

/// Batch allocate then free, pool vs platform heap
fn bench_alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_cycle");
    let allocator = Allocator::new(bench_config(1 << 20)).unwrap();

    for size in [16usize, 64, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("pool", size), &size, |b, &size| {
            let mut live = Vec::with_capacity(256);
            b.iter(|| {
                for _ in 0..256 {
                    live.push(allocator.allocate(black_box(size), Affinity::OBJECTS).unwrap());
                }
                for ptr in live.drain(..) {
                    unsafe { allocator.deallocate(ptr, size) };
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("system", size), &size, |b, &size| {
            let layout = Layout::from_size_align(size, 8).unwrap();
            let mut live = Vec::with_capacity(256);
            b.iter(|| {
                for _ in 0..256 {
                    live.push(unsafe { alloc::alloc(black_box(layout)) });
                }
                for ptr in live.drain(..) {
                    unsafe { alloc::dealloc(ptr, layout) };
                }
            });
        });
    }

    group.finish();
}

/// Round-robin allocation over every builtin affinity
fn bench_affinity_interleave(c: &mut Criterion) {
    let allocator = Allocator::new(bench_config(1 << 20)).unwrap();
    let affinities = [
        Affinity::OBJECTS,
        Affinity::DATA,
        Affinity::NODES,
        Affinity::PHYSICS,
    ];

    c.bench_function("affinity_interleave", |b| {
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::with_capacity(1024);
        b.iter(|| {
            for i in 0..1024usize {
                let size = 16 + (i % 7) * 24;
                let affinity = affinities[i % affinities.len()];
                live.push((allocator.allocate(size, affinity).unwrap(), size));
            }
            for (ptr, size) in live.drain(..) {
                unsafe { allocator.deallocate(ptr, size) };
            }
        });
    });
}

/// Deallocate cost with many blocks in the owning chain
fn bench_owner_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("owner_lookup");

    for block_count in [1usize, 16, 256] {
        // One 4 KiB block per allocation of just over half a block.
        let allocator = Allocator::new(bench_config(4096)).unwrap();
        let pinned: Vec<NonNull<u8>> = (0..block_count)
            .map(|_| allocator.allocate(2100, Affinity::NODES).unwrap())
            .collect();

        group.bench_with_input(
            BenchmarkId::new("blocks", block_count),
            &block_count,
            |b, _| {
                b.iter(|| {
                    let ptr = allocator.allocate(64, Affinity::NODES).unwrap();
                    unsafe { allocator.deallocate(black_box(ptr), 64) };
                });
            },
        );

        for ptr in pinned {
            unsafe { allocator.deallocate(ptr, 2100) };
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_affinity_interleave,
    bench_owner_lookup,
);
criterion_main!(benches);
