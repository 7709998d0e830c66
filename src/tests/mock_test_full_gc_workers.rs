use super::mock_test_prelude::*;
use crate::policy::g1::G1FullCollector;

fn heap_with(num_regions: usize, settings: &[(&str, &str)]) -> G1Heap<MockVM> {
    let mut options = test_options(8);
    for (name, value) in settings {
        assert!(options.set_from_str(name, value));
    }
    G1Heap::new(options, num_regions * REGION_BYTES)
}

fn use_regions(heap: &G1Heap<MockVM>, n: usize) {
    for _ in 0..n {
        fill_region(heap.allocate_region(RegionType::Old).unwrap());
    }
}

#[test]
pub fn fixed_worker_count() {
    with_mockvm(|| {
        let mut heap = heap_with(4, &[("use_dynamic_gc_threads", "false")]);
        assert_eq!(G1FullCollector::calc_active_workers(&mut heap), 8);
        assert_eq!(heap.workers().active_workers(), 8);
    })
}

#[test]
pub fn dynamic_worker_count_is_limited_by_used_heap() {
    with_mockvm(|| {
        // One adaptive worker per region's worth of used heap.
        let per_thread = REGION_BYTES.to_string();
        let mut heap = heap_with(100, &[("heap_size_per_gc_thread", per_thread.as_str())]);
        use_regions(&heap, 6);
        assert_eq!(G1FullCollector::calc_active_workers(&mut heap), 6);

        use_regions(&heap, 10);
        // The heap waste limit is 100 * 5% * 2 = 10 workers, but there are only 8.
        assert_eq!(G1FullCollector::calc_active_workers(&mut heap), 8);
    })
}

#[test]
pub fn dynamic_worker_count_is_limited_by_heap_waste() {
    with_mockvm(|| {
        let per_thread = REGION_BYTES.to_string();
        let mut heap = heap_with(
            100,
            &[
                ("heap_size_per_gc_thread", per_thread.as_str()),
                ("heap_waste_percent", "2"),
            ],
        );
        use_regions(&heap, 6);
        assert_eq!(G1FullCollector::calc_active_workers(&mut heap), 4);
    })
}

#[test]
pub fn empty_heap_gets_one_worker() {
    with_mockvm(|| {
        let mut heap = heap_with(100, &[]);
        assert_eq!(G1FullCollector::calc_active_workers(&mut heap), 1);
        // A collection of an empty heap does nothing.
        heap.full_collect(true, false, false);
        assert_eq!(heap.num_free_regions(), 100);
    })
}
