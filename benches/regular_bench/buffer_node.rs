//! Benchmarks for recycling buffer nodes through the free list.

use criterion::Criterion;
use mmtk_g1::util::alloc::BufferNodeAllocator;
use std::hint::black_box;

const NODES: usize = 256;

pub fn bench(c: &mut Criterion) {
    c.bench_function("buffer_node_allocate_release", |b| {
        let allocator = BufferNodeAllocator::new("bench", 64);
        let mut nodes = Vec::with_capacity(NODES);
        b.iter(|| {
            for _ in 0..NODES {
                nodes.push(allocator.allocate());
            }
            for node in nodes.drain(..) {
                unsafe { allocator.release(node) };
            }
            black_box(allocator.pending_count());
        });
        allocator.flush();
    });
}
