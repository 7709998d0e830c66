use super::mock_test_prelude::*;

/// Objects in a pinned region stay where they are, dead ones included, and nothing is
/// compacted into the region.
#[test]
pub fn pinned_region_is_not_compacted() {
    with_mockvm(|| {
        let mut heap = dynamic_worker_heap(4, 1);
        let pinned = fill_region(heap.allocate_region(RegionType::Old).unwrap());
        let moving = fill_region(heap.allocate_region(RegionType::Old).unwrap());
        heap.pin_region(pinned[0].to_raw_address());
        let pinned_top = heap.region_at(0).top();

        let live: Vec<ObjectReference> = pinned
            .iter()
            .step_by(4)
            .chain(moving.iter().step_by(4))
            .copied()
            .collect();
        let expected = ids(&live);
        let root = root_chain(&live);

        heap.full_collect(true, false, false);

        let survivors = follow_chain(root);
        assert_eq!(ids(&survivors), expected);
        let (in_pinned, moved) = survivors.split_at(OBJECTS_PER_REGION / 4);
        let kept: Vec<_> = pinned.iter().step_by(4).copied().collect();
        assert_eq!(in_pinned, &kept[..]);
        assert_eq!(heap.region_at(0).top(), pinned_top);
        assert_eq!(region_objects(heap.region_at(0)), pinned);
        // The survivors of R1 slide within R1.
        assert!(moved
            .iter()
            .all(|o| heap.addr_to_region(o.to_raw_address()) == 1));
        assert_eq!(moved[0].to_raw_address(), heap.region_at(1).bottom());
        assert_eq!(used_words(heap.region_at(1)), moved.len() * OBJECT_WORDS);

        heap.unpin_region(pinned[0].to_raw_address());
        heap.full_collect(true, false, false);

        // Unpinned, R0 is compacted and R1 drains into it.
        let survivors = follow_chain(root);
        assert_eq!(ids(&survivors), expected);
        assert_eq!(used_words(heap.region_at(0)), expected.len() * OBJECT_WORDS);
        assert!(heap.region_at(1).is_free());
    })
}
