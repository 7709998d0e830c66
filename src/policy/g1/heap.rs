use super::card_set::CardSet;
use super::collection_group::CandidateInfo;
use super::collection_set_candidates::CollectionSetCandidates;
use super::full::G1FullCollector;
use super::liveness::RegionLivenessMap;
use super::policy::{G1Policy, ProfileCostPolicy};
use super::region::{HeapRegion, RegionType};
use crate::scheduler::{HeapRegionClaimer, WorkerPool};
use crate::util::alloc::card_set_memory::CardSetConfiguration;
use crate::util::constants::LOG_BYTES_IN_WORD;
use crate::util::linked_list::IndexList;
use crate::util::logger;
use crate::util::memory::{self, MmapAnnotation};
use crate::util::options::Options;
use crate::util::Address;
use crate::vm::{ObjectModel, VMBinding};
use std::marker::PhantomData;
use std::sync::Arc;

/// A heap of equally sized regions in one reserved range of address space.
///
/// Region allocation and freeing may happen from several threads. Everything else that
/// changes the heap shape (full collections, the candidates) needs `&mut self`, i.e. a
/// safepoint.
pub struct G1Heap<VM: VMBinding> {
    options: Options,
    /// The raw mapping, which is larger than the heap so the heap can be region aligned.
    reserved_start: Address,
    reserved_bytes: usize,
    start: Address,
    log_region_bytes: usize,
    regions: Vec<HeapRegion>,
    liveness: RegionLivenessMap,
    candidates: CollectionSetCandidates,
    policy: Box<dyn G1Policy>,
    card_set_config: Arc<CardSetConfiguration>,
    workers: WorkerPool,
    /// Free regions in ascending index order.
    free_list: spin::Mutex<IndexList>,
    total_collections: usize,
    _vm: PhantomData<VM>,
}

impl<VM: VMBinding> G1Heap<VM> {
    /// A heap of at least `heap_bytes` bytes with the default cost model.
    pub fn new(options: Options, heap_bytes: usize) -> Self {
        let policy = Box::new(ProfileCostPolicy::new(&options));
        Self::with_policy(options, heap_bytes, policy)
    }

    pub fn with_policy(options: Options, heap_bytes: usize, policy: Box<dyn G1Policy>) -> Self {
        match logger::try_init() {
            Ok(_) => debug!("Installed the built-in logger."),
            Err(_) => debug!("A logger was already installed."),
        }
        let region_bytes = options.region_size;
        let num_regions = heap_bytes.div_ceil(region_bytes);
        assert!(num_regions > 0, "heap of {} bytes is empty", heap_bytes);
        let heap_size = num_regions * region_bytes;

        let reserved_bytes = heap_size + region_bytes;
        let reserved_start = memory::reserve(reserved_bytes, &MmapAnnotation::Heap)
            .unwrap_or_else(|e| memory::handle_mmap_error(e, Address::ZERO, reserved_bytes));
        let start = reserved_start.align_up(region_bytes);
        memory::commit(start, heap_size)
            .unwrap_or_else(|e| memory::handle_mmap_error(e, start, heap_size));

        let card_set_config = Arc::new(CardSet::configuration(&options));
        let regions: Vec<HeapRegion> = (0..num_regions)
            .map(|i| {
                HeapRegion::new(
                    i,
                    start + i * region_bytes,
                    region_bytes,
                    card_set_config.clone(),
                )
            })
            .collect();
        let mut free_list = IndexList::with_capacity(num_regions);
        for i in 0..num_regions {
            free_list.insert_last(i);
        }
        let mut candidates = CollectionSetCandidates::new(card_set_config.clone());
        candidates.initialize(num_regions);

        debug!("{}", crate::build_info::describe());
        info!(
            "Heap: {} regions of {} KiB at [{}, {})",
            num_regions,
            region_bytes >> 10,
            start,
            start + heap_size
        );
        Self {
            liveness: RegionLivenessMap::new(start, num_regions, region_bytes),
            workers: WorkerPool::new(&options),
            options,
            reserved_start,
            reserved_bytes,
            start,
            log_region_bytes: region_bytes.trailing_zeros() as usize,
            regions,
            candidates,
            policy,
            card_set_config,
            free_list: spin::Mutex::new(free_list),
            total_collections: 0,
            _vm: PhantomData,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + (self.num_regions() << self.log_region_bytes)
    }

    pub fn is_in_reserved(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn region_bytes(&self) -> usize {
        1 << self.log_region_bytes
    }

    pub fn region_words(&self) -> usize {
        self.region_bytes() >> LOG_BYTES_IN_WORD
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn num_free_regions(&self) -> usize {
        self.free_list.lock().len()
    }

    pub fn num_used_regions(&self) -> usize {
        self.num_regions() - self.num_free_regions()
    }

    /// Bytes below the tops of all regions.
    pub fn used(&self) -> usize {
        self.regions.iter().map(|r| r.used()).sum()
    }

    pub fn regions(&self) -> &[HeapRegion] {
        &self.regions
    }

    pub fn region_at(&self, index: usize) -> &HeapRegion {
        &self.regions[index]
    }

    /// The index of the region containing `addr`.
    pub fn addr_to_region(&self, addr: Address) -> usize {
        debug_assert!(self.is_in_reserved(addr), "{} is not in the heap", addr);
        (addr - self.start) >> self.log_region_bytes
    }

    pub fn liveness(&self) -> &RegionLivenessMap {
        &self.liveness
    }

    pub fn candidates(&self) -> &CollectionSetCandidates {
        &self.candidates
    }

    pub fn policy(&self) -> &dyn G1Policy {
        &*self.policy
    }

    pub fn card_set_config(&self) -> &Arc<CardSetConfiguration> {
        &self.card_set_config
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn total_collections(&self) -> usize {
        self.total_collections
    }

    /// Objects larger than half a region get regions of their own.
    pub fn is_humongous(&self, words: usize) -> bool {
        words > self.region_words() / 2
    }

    /// The number of regions a humongous object of `words` words spans.
    pub fn humongous_obj_size_in_regions(&self, words: usize) -> usize {
        Self::humongous_regions_for(words, self.region_words())
    }

    pub(crate) fn humongous_regions_for(words: usize, region_words: usize) -> usize {
        words.div_ceil(region_words)
    }

    /// Take the lowest free region and give it type `region_type`.
    pub fn allocate_region(&self, region_type: RegionType) -> Option<&HeapRegion> {
        let index = self.free_list.lock().remove_first()?;
        let r = &self.regions[index];
        debug_assert!(r.is_free() && r.is_empty(), "{:?} on the free list", r);
        match region_type {
            RegionType::Eden => r.set_eden(),
            RegionType::Survivor => r.set_survivor(),
            RegionType::Old => r.set_old(),
            RegionType::OpenArchive => r.set_open_archive(),
            RegionType::ClosedArchive => r.set_closed_archive(),
            t => panic!("cannot allocate a region of type {}", t.get_str()),
        }
        trace!("Allocated region {} as {}", index, region_type.get_str());
        Some(r)
    }

    /// Allocate a humongous object of `words` words in the lowest run of free regions that
    /// fits it. The space after the object in its last region becomes a filler object, or,
    /// if it is too small for one, stays above the last region's top.
    pub fn allocate_humongous(&self, words: usize) -> Option<Address> {
        let n = self.humongous_obj_size_in_regions(words);
        let mut free_list = self.free_list.lock();
        let first = self.find_contiguous_free(&free_list, n)?;
        for i in first..first + n {
            free_list.remove(i);
        }
        drop(free_list);

        let obj = self.regions[first].bottom();
        self.initialize_humongous_regions(first, n, obj, words);
        debug!(
            "Allocated humongous object of {} words at {} in regions {}..{}",
            words,
            obj,
            first,
            first + n
        );
        Some(obj)
    }

    fn find_contiguous_free(&self, free_list: &IndexList, n: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_len = 0;
        for i in free_list.iter() {
            if run_len > 0 && i == run_start + run_len {
                run_len += 1;
            } else {
                run_start = i;
                run_len = 1;
            }
            if run_len == n {
                return Some(run_start);
            }
        }
        None
    }

    /// Turn the free regions `first..first + n` into the regions of a humongous object of
    /// `words` words at `obj`, the bottom of `first`.
    pub(crate) fn initialize_humongous_regions(
        &self,
        first: usize,
        n: usize,
        obj: Address,
        words: usize,
    ) {
        Self::setup_humongous_regions(&self.regions, first, n, obj, words)
    }

    pub(crate) fn setup_humongous_regions(
        regions: &[HeapRegion],
        first: usize,
        n: usize,
        obj: Address,
        words: usize,
    ) {
        let first_hr = &regions[first];
        let last_hr = &regions[first + n - 1];
        debug_assert_eq!(obj, first_hr.bottom());
        let obj_top = obj.add_words(words);
        debug_assert!(obj_top <= last_hr.end() && obj_top > last_hr.bottom());

        let mut fill_words = last_hr.end().words_from(obj_top);
        let mut words_not_fillable = 0;
        if fill_words >= VM::VMObjectModel::MIN_FILL_WORDS {
            VM::VMObjectModel::fill_with_object(obj_top, fill_words);
        } else {
            words_not_fillable = fill_words;
            fill_words = 0;
        }

        first_hr.set_starts_humongous(obj_top, fill_words);
        for r in &regions[first + 1..first + n] {
            r.set_continues_humongous(first_hr);
        }
        if n > 1 && fill_words > 0 {
            last_hr.update_bot_for_block(obj_top, obj_top.add_words(fill_words));
        }
        for r in &regions[first..first + n - 1] {
            r.set_top(r.end());
        }
        last_hr.set_top(last_hr.end() - (words_not_fillable << LOG_BYTES_IN_WORD));
    }

    /// Give a region back to the free list.
    pub fn free_region(&self, index: usize) {
        let r = &self.regions[index];
        debug_assert!(!r.is_humongous(), "use free_humongous_region for {:?}", r);
        r.hr_clear();
        self.liveness.reset(index);
        self.insert_free(index);
    }

    /// Give one region of a humongous object back to the free list.
    pub fn free_humongous_region(&self, index: usize) {
        let r = &self.regions[index];
        debug_assert!(r.is_humongous(), "{:?} is not humongous", r);
        r.hr_clear();
        self.liveness.reset(index);
        self.insert_free(index);
    }

    fn insert_free(&self, index: usize) {
        let mut free_list = self.free_list.lock();
        debug_assert!(!free_list.contains(index), "region {} already free", index);
        let mut next = free_list.first();
        while let Some(i) = next {
            if i > index {
                free_list.insert_before(i, index);
                return;
            }
            next = free_list.next(i);
        }
        free_list.insert_last(index);
    }

    /// Rebuild the free list from the region types.
    pub(crate) fn rebuild_free_list(&self) {
        let mut free_list = self.free_list.lock();
        free_list.clear();
        for r in self.regions.iter().filter(|r| r.is_free()) {
            debug_assert!(r.is_empty(), "free {:?} is not empty", r);
            free_list.insert_last(r.hrm_index());
        }
    }

    /// Visit every region in index order.
    pub fn heap_region_iterate(&self, mut f: impl FnMut(&HeapRegion)) {
        self.regions.iter().for_each(|r| f(r));
    }

    /// Visit the regions the calling worker claims, starting at the first region.
    pub fn heap_region_par_iterate_from_start(
        &self,
        claimer: &HeapRegionClaimer,
        mut f: impl FnMut(&HeapRegion),
    ) {
        for i in 0..self.num_regions() {
            if claimer.claim_region(i) {
                f(&self.regions[i]);
            }
        }
    }

    /// Visit the regions the calling worker claims, starting at an offset that spreads the
    /// workers over the heap.
    pub fn heap_region_par_iterate_from_worker_offset(
        &self,
        claimer: &HeapRegionClaimer,
        worker_id: usize,
        mut f: impl FnMut(&HeapRegion),
    ) {
        for i in claimer.worker_order(worker_id) {
            if claimer.claim_region(i) {
                f(&self.regions[i]);
            }
        }
    }

    /// Pin the region containing `addr` so its objects do not move.
    pub fn pin_region(&self, addr: Address) {
        self.regions[self.addr_to_region(addr)].increment_pinned_object_count()
    }

    pub fn unpin_region(&self, addr: Address) {
        self.regions[self.addr_to_region(addr)].decrement_pinned_object_count()
    }

    /// Group the regions a marking selected. `infos` must be sorted by efficiency.
    pub fn set_candidates_from_marking(&mut self, infos: &[CandidateInfo]) {
        let candidates = &mut self.candidates;
        candidates.set_candidates_from_marking(infos, &self.regions, &*self.policy)
    }

    /// Make a region that failed evacuation a candidate of its own.
    pub fn add_retained_region(&mut self, index: usize) {
        let candidates = &mut self.candidates;
        candidates.add_retained_region_unsorted(&self.regions[index], &*self.policy)
    }

    pub fn sort_candidates_by_efficiency(&mut self) {
        let candidates = &mut self.candidates;
        candidates.sort_by_efficiency(&self.regions, &*self.policy)
    }

    pub fn sort_marking_candidates_by_efficiency(&mut self) {
        let candidates = &mut self.candidates;
        candidates.sort_marking_by_efficiency(&self.regions, &*self.policy)
    }

    pub(crate) fn abandon_candidates(&mut self) {
        self.candidates.clear(&self.regions)
    }

    pub(crate) fn workers_mut(&mut self) -> &mut WorkerPool {
        &mut self.workers
    }

    /// Run a stop-the-world collection that marks the whole heap and slides the live
    /// objects together. The caller must have stopped every mutator.
    pub fn full_collect(
        &mut self,
        explicit_gc: bool,
        clear_soft_refs: bool,
        maximal_compaction: bool,
    ) {
        self.total_collections += 1;
        let cause = match explicit_gc {
            true => "explicit",
            false => "allocation failure",
        };
        info!(
            "Full GC ({}): {} used regions, {} KiB used",
            cause,
            self.num_used_regions(),
            self.used() >> 10
        );
        self.abandon_candidates();
        let num_workers = G1FullCollector::<VM>::calc_active_workers(self);
        let mut collector = G1FullCollector::new(
            self,
            num_workers,
            explicit_gc,
            clear_soft_refs,
            maximal_compaction,
        );
        collector.prepare_collection();
        collector.collect();
        collector.complete_collection();
    }
}

impl<VM: VMBinding> Drop for G1Heap<VM> {
    fn drop(&mut self) {
        if let Err(e) = memory::release(self.reserved_start, self.reserved_bytes) {
            warn!("Failed to release heap at {}: {}", self.reserved_start, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::mock_vm::MockVM;
    use crate::util::ObjectReference;

    const REGION: usize = 1 << 16;

    fn heap(regions: usize) -> G1Heap<MockVM> {
        let mut options = Options::default();
        options.set_from_str("region_size", &REGION.to_string());
        options.set_from_str("threads", "2");
        G1Heap::new(options, regions * REGION)
    }

    #[test]
    fn layout() {
        let heap = heap(4);
        assert_eq!(heap.num_regions(), 4);
        assert!(heap.start().is_aligned_to(REGION));
        assert_eq!(heap.end() - heap.start(), 4 * REGION);
        assert_eq!(heap.addr_to_region(heap.start() + 2 * REGION + 8), 2);
        assert_eq!(heap.num_free_regions(), 4);
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn allocate_and_free_regions() {
        let heap = heap(4);
        let a = heap.allocate_region(RegionType::Old).unwrap().hrm_index();
        let b = heap.allocate_region(RegionType::Eden).unwrap().hrm_index();
        assert_eq!((a, b), (0, 1));
        assert!(heap.region_at(1).is_young());
        assert_eq!(heap.num_used_regions(), 2);
        heap.region_at(a).allocate(16).unwrap();
        heap.free_region(a);
        assert!(heap.region_at(a).is_free() && heap.region_at(a).is_empty());
        // The lowest free region is handed out first.
        let c = heap.allocate_region(RegionType::Old).unwrap().hrm_index();
        assert_eq!(c, 0);
    }

    #[test]
    fn humongous_allocation_fills_the_tail() {
        let heap = heap(8);
        heap.allocate_region(RegionType::Old).unwrap();
        let words = heap.region_words() * 2 + 100;
        assert_eq!(heap.humongous_obj_size_in_regions(words), 3);
        let obj = heap.allocate_humongous(words).unwrap();
        MockVM::init_object(obj, words, 0);

        let first = heap.addr_to_region(obj);
        assert_eq!(first, 1);
        assert!(heap.region_at(1).is_starts_humongous());
        assert!(heap.region_at(2).is_continues_humongous());
        assert!(heap.region_at(3).is_continues_humongous());
        assert_eq!(heap.region_at(3).humongous_start_region(), Some(1));
        assert_eq!(heap.region_at(3).top(), heap.region_at(3).end());
        let filler = ObjectReference::from_raw_address(obj.add_words(words));
        assert!(MockVM::is_filler(filler));
        assert_eq!(MockVM::size_in_words(filler), heap.region_words() - 100);
        assert_eq!(heap.num_free_regions(), 4);

        for i in 1..4 {
            heap.free_humongous_region(i);
        }
        assert_eq!(heap.num_free_regions(), 7);
    }

    #[test]
    fn humongous_allocation_needs_a_contiguous_run() {
        let heap = heap(4);
        heap.allocate_region(RegionType::Old).unwrap();
        heap.allocate_region(RegionType::Old).unwrap();
        heap.allocate_region(RegionType::Old).unwrap();
        heap.free_region(1);
        assert!(heap.allocate_humongous(heap.region_words() + 1).is_none());
        heap.free_region(2);
        let obj = heap.allocate_humongous(heap.region_words() + 1).unwrap();
        assert_eq!(heap.addr_to_region(obj), 1);
    }

    #[test]
    fn parallel_iteration_visits_every_region_once() {
        let heap = heap(16);
        let claimer = HeapRegionClaimer::new(3, heap.num_regions());
        let mut seen = vec![];
        for w in [2, 0, 1] {
            heap.heap_region_par_iterate_from_worker_offset(&claimer, w, |r| {
                seen.push(r.hrm_index())
            });
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());

        let claimer = HeapRegionClaimer::new(1, heap.num_regions());
        let mut count = 0;
        heap.heap_region_par_iterate_from_start(&claimer, |_| count += 1);
        assert_eq!(count, 16);
    }
}
