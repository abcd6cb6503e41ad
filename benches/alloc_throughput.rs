use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segalloc::Heap;

const OPS: u64 = 100_000;

/// segalloc allocate/free throughput.
fn segalloc_alloc_free(heap: &mut Heap, size: usize) {
    for _ in 0..OPS {
        unsafe {
            let ptr = heap.allocate(size).unwrap().unwrap();
            black_box(ptr);
            heap.free(ptr);
        }
    }
}

/// libc alloc/free throughput.
fn libc_malloc_free(size: usize) {
    for _ in 0..OPS {
        unsafe {
            let ptr = libc::malloc(size);
            black_box(ptr);
            libc::free(ptr);
        }
    }
}

fn benchmark_alloc_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_throughput");

    for size in [16, 64, 256, 1024, 4096] {
        group.throughput(Throughput::Elements(OPS));

        group.bench_with_input(BenchmarkId::new("segalloc", size), &size, |b, &size| {
            let mut heap = Heap::init().unwrap();

            // Pin one allocation between the benchmarked block and the big
            // trailing free block, so each free lands in its class bucket
            // and the next allocate reuses it instead of growing the arena.
            unsafe {
                let first = heap.allocate(size).unwrap().unwrap();
                let _pin = heap.allocate(size).unwrap().unwrap();
                heap.free(first);
            }

            b.iter(|| segalloc_alloc_free(&mut heap, size))
        });

        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
            b.iter(|| libc_malloc_free(size))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_alloc_throughput);
criterion_main!(benches);
