use crate::policy::g1::region::HeapRegion;
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};
use atomic::Atomic;
use std::sync::atomic::Ordering;

/// Where the next object forwarded into each region goes. Only meaningful for regions that
/// are compaction targets in this collection.
pub struct CompactionTops {
    tops: Box<[Atomic<Address>]>,
}

impl CompactionTops {
    pub fn new(num_regions: usize) -> Self {
        let tops = (0..num_regions).map(|_| Atomic::new(Address::ZERO));
        Self {
            tops: tops.collect(),
        }
    }

    pub fn get(&self, region: usize) -> Address {
        self.tops[region].load(Ordering::Relaxed)
    }

    pub fn set(&self, region: usize, top: Address) {
        self.tops[region].store(top, Ordering::Relaxed)
    }
}

/// A cursor that hands out destination addresses in an ordered list of regions. Objects are
/// forwarded to `compaction_top` in the current region until the next one does not fit,
/// then the cursor moves on to the next region in the list and never comes back.
#[derive(Default)]
pub struct CompactionPoint {
    regions: Vec<usize>,
    /// Position of the current region in `regions`.
    current: Option<usize>,
    compaction_top: Address,
}

impl CompactionPoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// Start at the first region of the list, at its saved compaction top.
    pub fn initialize(&mut self, tops: &CompactionTops) {
        debug_assert!(self.has_regions());
        self.current = Some(0);
        self.compaction_top = tops.get(self.regions[0]);
    }

    /// Save the compaction top of the current region.
    pub fn update(&self, tops: &CompactionTops) {
        if let Some(region) = self.current_region() {
            tops.set(region, self.compaction_top);
        }
    }

    pub fn has_regions(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn current_region(&self) -> Option<usize> {
        self.current.map(|pos| self.regions[pos])
    }

    pub fn compaction_top(&self) -> Address {
        self.compaction_top
    }

    pub fn regions(&self) -> &[usize] {
        &self.regions
    }

    pub fn add(&mut self, region: usize) {
        self.regions.push(region);
    }

    pub fn remove_last(&mut self) -> Option<usize> {
        let len = self.regions.len();
        debug_assert!(
            self.current.map_or(true, |pos| pos + 1 < len),
            "cannot remove the current region"
        );
        self.regions.pop()
    }

    /// Take the current region and every region after it out of the list. The cursor keeps
    /// nothing, so the point is uninitialized afterwards.
    pub fn remove_at_or_above(&mut self) -> Vec<usize> {
        let from = self.current.unwrap_or(0);
        self.current = None;
        self.regions.split_off(from)
    }

    /// The regions after the current one. They get nothing forwarded into them.
    pub fn regions_after_current(&self) -> &[usize] {
        match self.current {
            Some(pos) => &self.regions[pos + 1..],
            None => &self.regions,
        }
    }

    /// Whether the current region is the last one, i.e. no region of the list is left empty.
    pub fn is_at_last_region(&self) -> bool {
        matches!(self.current, Some(pos) if pos + 1 == self.regions.len())
    }

    pub fn sort_regions(&mut self) {
        debug_assert!(!self.is_initialized());
        self.regions.sort_unstable();
    }

    fn object_will_fit(&self, regions: &[HeapRegion], words: usize) -> bool {
        let end = regions[self.regions[self.current.unwrap_or(0)]].end();
        words <= end.words_from(self.compaction_top)
    }

    fn switch_region(&mut self, regions: &[HeapRegion], tops: &CompactionTops) {
        self.update(tops);
        let next = self.current.map_or(0, |pos| pos + 1);
        assert!(
            next < self.regions.len(),
            "compaction point ran out of regions at region {:?}",
            self.current_region()
        );
        self.current = Some(next);
        self.compaction_top = tops.get(self.regions[next]);
        debug_assert_eq!(self.compaction_top, regions[self.regions[next]].bottom());
    }

    /// Pick the destination of an object of `words` words and record it in the object if it
    /// moves. The destination region's block offset table learns about the object.
    pub fn forward<VM: VMBinding>(
        &mut self,
        object: ObjectReference,
        words: usize,
        regions: &[HeapRegion],
        tops: &CompactionTops,
    ) {
        debug_assert!(self.is_initialized(), "compaction point not initialized");
        while !self.object_will_fit(regions, words) {
            self.switch_region(regions, tops);
        }

        if object.to_raw_address() != self.compaction_top {
            VM::VMObjectModel::forward_to(object, self.compaction_top);
            debug_assert!(VM::VMObjectModel::is_forwarded(object));
        } else {
            VM::VMObjectModel::init_mark(object);
        }

        let start = self.compaction_top;
        self.compaction_top = start.add_words(words);
        let r = &regions[self.regions[self.current.unwrap_or(0)]];
        debug_assert!(self.compaction_top <= r.end());
        r.update_bot_for_block(start, self.compaction_top);
    }

    /// Find `n` regions with consecutive indices in the list, starting before `region`, for
    /// a humongous object of `n` regions that starts in `region` and whose regions are in
    /// the list. The run may overlap the object's own regions. Returns the position of the
    /// first region of the run.
    pub fn find_contiguous_before(&self, region: usize, n: usize) -> Option<usize> {
        debug_assert!(n > 0);
        let pos = self.regions.iter().position(|&r| r == region)?;
        if n == 1 {
            return (self.regions[0] != region).then_some(0);
        }
        let limit = (pos + n - 1).min(self.regions.len() - 1);
        let mut length = 1;
        for end in 1..=limit {
            if self.regions[end] == self.regions[end - 1] + 1 {
                length += 1;
            } else {
                length = 1;
            }
            if length == n {
                let begin = end + 1 - n;
                return (self.regions[begin] < region).then_some(begin);
            }
        }
        None
    }

    /// Move the humongous object starting at `region`, which spans `n` regions, to the
    /// lowest run of regions in the list that starts before it. Either way the regions the
    /// object ends up in leave the list. Returns the first region of the new location.
    pub fn forward_humongous<VM: VMBinding>(
        &mut self,
        region: usize,
        n: usize,
        regions: &[HeapRegion],
    ) -> Option<usize> {
        let hr = &regions[region];
        debug_assert!(hr.is_starts_humongous());
        let object = ObjectReference::from_raw_address(hr.bottom());

        match self.find_contiguous_before(region, n) {
            Some(begin) => {
                let target = self.regions[begin];
                VM::VMObjectModel::forward_to(object, regions[target].bottom());
                trace!(
                    "Forward humongous region {} to {}..={} ({} regions)",
                    region,
                    target,
                    self.regions[begin + n - 1],
                    n
                );
                self.regions.drain(begin..begin + n);
                Some(target)
            }
            None => {
                trace!("Humongous region {} does not move ({} regions)", region, n);
                if let Some(pos) = self.regions.iter().position(|&r| r == region) {
                    let end = (pos + n).min(self.regions.len());
                    self.regions.drain(pos..end);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::g1::card_set::CardSet;
    use crate::util::options::Options;
    use crate::util::test_util::mock_vm::{MockVM, TestHeapMemory};
    use std::sync::Arc;

    const REGION: usize = 1 << 16;
    const REGION_WORDS: usize = REGION / 8;

    fn regions(n: usize, mem: &TestHeapMemory) -> Vec<HeapRegion> {
        let mut options = Options::default();
        options.set_from_str("region_size", &REGION.to_string());
        let config = Arc::new(CardSet::configuration(&options));
        (0..n)
            .map(|i| HeapRegion::new(i, mem.start() + i * REGION, REGION, config.clone()))
            .collect()
    }

    fn point(list: &[usize]) -> CompactionPoint {
        let mut cp = CompactionPoint::new();
        list.iter().for_each(|&r| cp.add(r));
        cp
    }

    #[test]
    fn forward_switches_regions_when_full() {
        let mem = TestHeapMemory::new(3 * REGION);
        let rs = regions(3, &mem);
        let tops = CompactionTops::new(3);
        for r in rs.iter() {
            tops.set(r.hrm_index(), r.bottom());
        }
        let mut cp = point(&[0, 2]);
        cp.initialize(&tops);

        // Three objects of 40% of a region: two fit in region 0, the third goes to region 2.
        let words = REGION_WORDS * 2 / 5;
        let objs: Vec<_> = (0..3)
            .map(|i| MockVM::init_object(rs[1].bottom().add_words(i * words), words, 0))
            .collect();
        for o in objs.iter() {
            cp.forward::<MockVM>(*o, words, &rs, &tops);
        }
        cp.update(&tops);
        assert_eq!(MockVM::forwardee(objs[0]), Some(rs[0].bottom()));
        let second = rs[0].bottom().add_words(words);
        assert_eq!(MockVM::forwardee(objs[1]), Some(second));
        assert_eq!(MockVM::forwardee(objs[2]), Some(rs[2].bottom()));
        assert_eq!(cp.current_region(), Some(2));
        assert!(cp.is_at_last_region());
        assert_eq!(tops.get(0), rs[0].bottom().add_words(2 * words));
        assert_eq!(tops.get(2), rs[2].bottom().add_words(words));
    }

    #[test]
    fn object_in_place_is_not_forwarded() {
        let mem = TestHeapMemory::new(REGION);
        let rs = regions(1, &mem);
        let tops = CompactionTops::new(1);
        tops.set(0, rs[0].bottom());
        let mut cp = point(&[0]);
        cp.initialize(&tops);
        let o = MockVM::init_object(rs[0].bottom(), 4, 0);
        cp.forward::<MockVM>(o, 4, &rs, &tops);
        assert!(!MockVM::is_forwarded(o));
        assert_eq!(cp.compaction_top(), rs[0].bottom().add_words(4));
    }

    #[test]
    fn contiguous_runs() {
        let cp = point(&[1, 2, 4, 5, 6, 8, 9, 10]);
        assert_eq!(cp.find_contiguous_before(8, 3), Some(2));
        assert_eq!(cp.find_contiguous_before(8, 4), None);
        assert_eq!(cp.find_contiguous_before(9, 2), Some(0));
        assert_eq!(cp.find_contiguous_before(1, 1), None);
        assert_eq!(cp.find_contiguous_before(5, 1), Some(0));
        assert_eq!(cp.find_contiguous_before(3, 1), None);

        let cp = point(&[6, 7, 8, 9, 10]);
        assert_eq!(cp.find_contiguous_before(8, 3), Some(0));
        assert_eq!(cp.find_contiguous_before(6, 3), None);

        // A single free region below the object lets it slide down by one region.
        let cp = point(&[7, 8, 9, 10]);
        assert_eq!(cp.find_contiguous_before(8, 3), Some(0));
    }

    #[test]
    fn truncate_from_current() {
        let mem = TestHeapMemory::new(4 * REGION);
        let rs = regions(4, &mem);
        let tops = CompactionTops::new(4);
        for r in rs.iter() {
            tops.set(r.hrm_index(), r.bottom());
        }
        let mut cp = point(&[0, 1, 2, 3]);
        cp.initialize(&tops);
        let words = REGION_WORDS * 3 / 4;
        for i in 0..2 {
            let o = MockVM::init_object(rs[1].bottom().add_words(i * words), words, 0);
            cp.forward::<MockVM>(o, words, &rs, &tops);
        }
        assert_eq!(cp.current_region(), Some(1));
        assert_eq!(cp.regions_after_current(), &[2, 3]);
        assert_eq!(cp.remove_at_or_above(), vec![1, 2, 3]);
        assert_eq!(cp.regions(), &[0]);
        assert!(!cp.is_initialized());
    }
}
