use super::mock_test_prelude::*;

/// Every region is 90% live, so no worker ends up with an empty region. The tails of the
/// worker queues are compacted again by one thread.
#[test]
pub fn serial_compaction_when_no_region_is_freed() {
    with_mockvm(|| {
        let mut heap = fixed_worker_heap(5, 2);
        let mut live = vec![];
        for _ in 0..4 {
            let objects = fill_region(heap.allocate_region(RegionType::Old).unwrap());
            live.extend(
                objects
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| j % 10 != 9)
                    .map(|(_, &o)| o),
            );
        }
        let expected = ids(&live);
        let root = root_chain(&live);
        let live_words = live.len() * OBJECT_WORDS;
        assert!(live_words > 3 * REGION_WORDS);

        heap.full_collect(false, false, false);

        let survivors = follow_chain(root);
        assert_eq!(ids(&survivors), expected);
        assert_not_forwarded(&survivors);
        // R0-R2 are full. What is left ends up at the bottom of R3.
        for i in 0..3 {
            assert_eq!(used_words(heap.region_at(i)), REGION_WORDS, "region {}", i);
        }
        assert_eq!(used_words(heap.region_at(3)), live_words - 3 * REGION_WORDS);
        assert!(heap.region_at(4).is_free());
    })
}

/// A maximal compaction always compacts the tails serially, so the survivors of sparse
/// regions end up in the lowest regions even with many workers.
#[test]
pub fn maximal_compaction_packs_the_heap() {
    with_mockvm(|| {
        let mut heap = fixed_worker_heap(8, 4);
        let mut live = vec![];
        for _ in 0..8 {
            let objects = fill_region(heap.allocate_region(RegionType::Old).unwrap());
            live.extend(objects.into_iter().step_by(2));
        }
        let expected = ids(&live);
        let root = root_chain(&live);

        heap.full_collect(true, false, true);

        let survivors = follow_chain(root);
        assert_eq!(ids(&survivors), expected);
        let used: Vec<usize> = heap.regions().iter().map(used_words).collect();
        assert_eq!(used.iter().sum::<usize>(), live.len() * OBJECT_WORDS);
        assert_eq!(used[..4], [REGION_WORDS; 4]);
        assert!(heap.regions()[4..].iter().all(|r| r.is_free()));
        assert_eq!(heap.num_free_regions(), 4);
    })
}
