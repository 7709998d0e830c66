use criterion::{BatchSize, Criterion};
use mmtk_g1::policy::g1::{G1Heap, RegionType};
use mmtk_g1::util::options::Options;
use mmtk_g1::util::test_util::mock_vm::*;

const REGION_BYTES: usize = 1 << 16;
const NUM_REGIONS: usize = 64;
const OBJECT_WORDS: usize = 64;

/// A heap with half its regions full of objects, every fourth of them kept alive through a
/// single root chain.
fn populated_heap(threads: usize) -> G1Heap<MockVM> {
    write_mockvm(|roots| *roots = MockRoots::default());
    let mut options = Options::default();
    let region_size = REGION_BYTES.to_string();
    assert!(options.set_from_str("region_size", &region_size));
    assert!(options.set_from_str("threads", &threads.to_string()));
    assert!(options.set_from_str("use_dynamic_gc_threads", "false"));
    let heap = G1Heap::new(options, NUM_REGIONS * REGION_BYTES);

    let mut live = vec![];
    for _ in 0..NUM_REGIONS / 2 {
        let r = heap
            .allocate_region(RegionType::Old)
            .unwrap_or_else(|| panic!("no free region"));
        let mut i = 0;
        while let Some(addr) = r.allocate(OBJECT_WORDS) {
            let object = MockVM::init_object(addr, OBJECT_WORDS, 1);
            if i % 4 == 0 {
                live.push(object);
            }
            i += 1;
        }
    }
    for pair in live.windows(2) {
        MockVM::set_field(pair[0], 0, pair[1]);
    }
    MockVM::add_root(live[0]);
    heap
}

pub fn bench(c: &mut Criterion) {
    for threads in [1, 4] {
        c.bench_function(&format!("full_gc_{}_workers", threads), |b| {
            b.iter_batched(
                || populated_heap(threads),
                |mut heap| {
                    heap.full_collect(true, false, false);
                    heap
                },
                BatchSize::PerIteration,
            )
        });
    }
}
