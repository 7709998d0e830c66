//! The stop-the-world full collection: mark the whole heap, compute forwarding addresses,
//! adjust references and slide the live objects towards the bottom of the heap.
//!
//! Every phase is a [`WorkerTask`](crate::scheduler::WorkerTask) run on the heap's worker
//! pool, except the parts of preparation that have to see all workers' results at once.
//! Returning from a task is the barrier between phases.

mod adjust;
mod compact;
mod compaction_point;
mod mark;
mod prepare;
mod region_attr;

pub use self::compaction_point::{CompactionPoint, CompactionTops};
pub use self::region_attr::{RegionAttr, RegionAttrTable};

use self::adjust::AdjustTask;
use self::compact::CompactionTask;
use self::mark::MarkingTask;
use self::prepare::PrepareCompactionTask;
use super::heap::G1Heap;
use super::region::{HeapRegion, RegionType};
use crate::util::constants::LOG_BYTES_IN_WORD;
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};
use atomic_refcell::AtomicRefCell;
use enum_map::EnumMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

/// What a full collection was asked to do.
#[derive(Copy, Clone, Debug)]
pub struct FullGCScope {
    pub explicit_gc: bool,
    pub clear_soft_refs: bool,
    /// Compact every region, whatever its live ratio, and move humongous objects.
    pub maximal_compaction: bool,
    /// Regions with more live words than this are left in place.
    pub region_compaction_threshold: usize,
}

impl FullGCScope {
    pub fn new(
        explicit_gc: bool,
        clear_soft_refs: bool,
        maximal_compaction: bool,
        region_words: usize,
        region_compaction_threshold: usize,
    ) -> Self {
        Self {
            explicit_gc,
            clear_soft_refs,
            maximal_compaction,
            region_compaction_threshold: if maximal_compaction {
                region_words
            } else {
                region_compaction_threshold
            },
        }
    }
}

/// A humongous object the humongous compaction point moves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct HumongousMove {
    pub from: usize,
    pub to: usize,
    pub num_regions: usize,
}

/// The state of one full collection.
pub struct G1FullCollector<'a, VM: VMBinding> {
    heap: &'a G1Heap<VM>,
    scope: FullGCScope,
    num_workers: usize,
    attrs: RegionAttrTable,
    /// Live words found by marking, per region.
    live_stats: Box<[AtomicUsize]>,
    tops: CompactionTops,
    compaction_points: Vec<AtomicRefCell<CompactionPoint>>,
    serial_compaction_point: AtomicRefCell<CompactionPoint>,
    humongous_compaction_point: AtomicRefCell<CompactionPoint>,
    /// Start regions of the live humongous objects that may move.
    humongous_start_regions: Vec<usize>,
    humongous_moves: Vec<HumongousMove>,
    /// Set when preparation freed a region.
    freed_regions: AtomicBool,
    /// The regions objects slide through and the live words they hold.
    compacted_regions: Vec<usize>,
    compacted_live_words: usize,
}

impl<'a, VM: VMBinding> G1FullCollector<'a, VM> {
    /// Choose and apply the number of workers for the next full collection: no more than the
    /// heap waste we accept allows (each worker leaves half a region unused on average), no
    /// more than the used heap justifies, and no more than there are used regions.
    pub fn calc_active_workers(heap: &mut G1Heap<VM>) -> usize {
        let max_workers = heap.workers().max_workers();
        let options = heap.options();
        if !options.use_dynamic_gc_threads {
            return heap.workers_mut().update_active_workers(max_workers);
        }
        let num_regions = heap.num_regions();
        let waste_worker_count =
            ((num_regions * options.heap_waste_percent / 100) * 2).max(1);
        let heap_waste_worker_limit = waste_worker_count.min(max_workers);
        let adaptive_worker_limit = heap
            .used()
            .div_ceil(options.heap_size_per_gc_thread)
            .clamp(1, max_workers);
        let used_regions = heap.num_used_regions();
        let worker_count = heap_waste_worker_limit
            .min(adaptive_worker_limit)
            .min(used_regions);
        debug!(
            "Full GC workers: waste limit {}, adaptive limit {}, used regions {} -> {}",
            heap_waste_worker_limit, adaptive_worker_limit, used_regions, worker_count
        );
        heap.workers_mut().update_active_workers(worker_count)
    }

    pub fn new(
        heap: &'a G1Heap<VM>,
        num_workers: usize,
        explicit_gc: bool,
        clear_soft_refs: bool,
        maximal_compaction: bool,
    ) -> Self {
        let options = heap.options();
        let num_regions = heap.num_regions();
        let scope = FullGCScope::new(
            explicit_gc,
            clear_soft_refs,
            maximal_compaction,
            heap.region_words(),
            options.region_compaction_threshold(),
        );
        Self {
            heap,
            scope,
            num_workers,
            attrs: RegionAttrTable::new(num_regions),
            live_stats: (0..num_regions).map(|_| AtomicUsize::new(0)).collect(),
            tops: CompactionTops::new(num_regions),
            compaction_points: (0..num_workers)
                .map(|_| AtomicRefCell::new(CompactionPoint::new()))
                .collect(),
            serial_compaction_point: AtomicRefCell::new(CompactionPoint::new()),
            humongous_compaction_point: AtomicRefCell::new(CompactionPoint::new()),
            humongous_start_regions: vec![],
            humongous_moves: vec![],
            freed_regions: AtomicBool::new(false),
            compacted_regions: vec![],
            compacted_live_words: 0,
        }
    }

    pub fn heap(&self) -> &'a G1Heap<VM> {
        self.heap
    }

    pub fn scope(&self) -> &FullGCScope {
        &self.scope
    }

    pub fn workers(&self) -> usize {
        self.num_workers
    }

    pub fn region_attr(&self, region: usize) -> RegionAttr {
        self.attrs.get(region)
    }

    pub fn live_words(&self, region: usize) -> usize {
        self.live_stats[region].load(Ordering::Relaxed)
    }

    pub(crate) fn attrs(&self) -> &RegionAttrTable {
        &self.attrs
    }

    pub(crate) fn tops(&self) -> &CompactionTops {
        &self.tops
    }

    pub(crate) fn compaction_point(&self, worker: usize) -> &AtomicRefCell<CompactionPoint> {
        &self.compaction_points[worker]
    }

    pub(crate) fn add_live_words(&self, region: usize, words: usize) {
        self.live_stats[region].fetch_add(words, Ordering::Relaxed);
    }

    /// An object is live if marking reached it or it lives where marking does not go.
    pub(crate) fn is_alive(&self, object: ObjectReference) -> bool {
        let region = self.heap.addr_to_region(object.to_raw_address());
        self.attrs.is_skip_marking(region) || self.heap.liveness().is_object_marked(object)
    }

    pub(crate) fn free_region(&self, region: &HeapRegion) {
        region.hr_clear();
        self.heap.liveness().reset(region.hrm_index());
        self.attrs.set_free(region.hrm_index());
        self.freed_regions.store(true, Ordering::Relaxed);
    }

    /// Set the region attributes from the region types. Closed archive regions are not
    /// marked through and pinned regions never move.
    pub fn prepare_collection(&mut self) {
        for r in self.heap.regions() {
            let i = r.hrm_index();
            if r.is_free() {
                self.attrs.set_free(i);
            } else if r.is_closed_archive() {
                self.attrs.set_skip_marking(i);
            } else if r.is_pinned() {
                self.attrs.set_skip_compacting(i);
            } else {
                self.attrs.set_compacting(i);
            }
        }
        let mut flags = String::new();
        if self.scope.clear_soft_refs {
            flags.push_str(", clearing soft references");
        }
        if self.scope.maximal_compaction {
            flags.push_str(", maximal compaction");
        }
        let threshold = self.scope.region_compaction_threshold;
        debug!(
            "Full GC with {} workers, compaction threshold {} words{}",
            self.num_workers, threshold, flags
        );
    }

    /// Run the four phases.
    pub fn collect(&mut self) {
        self.phase1_mark_live_objects();
        self.phase2_prepare_compaction();
        self.phase3_adjust_pointers();
        self.phase4_do_compaction();
    }

    fn run_task(&self, task: &dyn crate::scheduler::WorkerTask) {
        self.heap.workers().run_task_with(task, self.num_workers);
    }

    fn phase1_mark_live_objects(&mut self) {
        let start = Instant::now();
        let task = MarkingTask::new(self);
        self.run_task(&task);
        task.process_references();
        drop(task);

        let live_words: usize = self
            .live_stats
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .sum();
        info!(
            "Phase 1: Mark live objects: {} live words, {:.3} ms",
            live_words,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    fn phase2_prepare_compaction(&mut self) {
        let start = Instant::now();
        self.determine_compaction_work_lists();

        let task = PrepareCompactionTask::new(self);
        self.run_task(&task);
        let has_free_compaction_targets =
            task.has_free_compaction_targets() || self.freed_regions.load(Ordering::Relaxed);
        drop(task);

        // Without an empty region left over, the next allocation may fail right away. Let one
        // thread compact the tails of all worker queues into as few regions as it can.
        if self.scope.maximal_compaction || !has_free_compaction_targets {
            self.prepare_serial_compaction();
        }
        if self.scope.maximal_compaction && !self.humongous_start_regions.is_empty() {
            self.prepare_humongous_compaction();
        }

        self.compacted_regions = self
            .compaction_points
            .iter()
            .chain(std::iter::once(&self.serial_compaction_point))
            .flat_map(|cp| cp.borrow().regions().to_vec())
            .collect();
        self.compacted_live_words = self
            .compacted_regions
            .iter()
            .map(|&i| self.live_words(i))
            .sum();
        info!(
            "Phase 2: Prepare compaction: {:.3} ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    fn phase3_adjust_pointers(&mut self) {
        let start = Instant::now();
        let task = AdjustTask::new(self);
        self.run_task(&task);
        info!(
            "Phase 3: Adjust pointers: {:.3} ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    fn phase4_do_compaction(&mut self) {
        let start = Instant::now();
        let task = CompactionTask::new(self);
        self.run_task(&task);
        drop(task);

        if self.serial_compaction_point.borrow().has_regions() {
            self.serial_compaction();
        }
        if !self.humongous_moves.is_empty() {
            self.humongous_compaction();
        }
        info!(
            "Phase 4: Compact heap: {:.3} ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
    }

    /// Clear marking state, rebuild the free region list and report the heap shape.
    pub fn complete_collection(&mut self) {
        self.heap.liveness().reset_all();
        self.heap.rebuild_free_list();

        let mut shape: EnumMap<RegionType, usize> = EnumMap::default();
        let heap = self.heap;
        heap.heap_region_iterate(|r| shape[r.region_type()] += 1);
        for (t, n) in shape.iter().filter(|(_, n)| **n > 0) {
            debug!("  {}: {} regions", t.get_str(), n);
        }
        info!(
            "Full GC done: {} used regions, {} free regions, {} KiB used",
            self.heap.num_used_regions(),
            self.heap.num_free_regions(),
            self.heap.used() >> 10
        );

        if cfg!(debug_assertions) || self.heap.options().verify_full_gc {
            if let Err(e) = self.verify_after_compaction() {
                panic!("Heap verification after full GC failed: {}", e);
            }
        }
    }

    /// Check that every region walks as a sequence of objects, that its block offset table
    /// agrees with the walk and that compaction neither lost nor duplicated a live word.
    pub fn verify_after_compaction(&self) -> Result<(), String> {
        for r in self.heap.regions() {
            if r.is_free() {
                if !r.is_empty() {
                    return Err(format!("free {:?} is not empty", r));
                }
                continue;
            }
            if r.is_humongous() {
                continue;
            }
            let mut end = r.bottom();
            r.object_iterate::<VM>(|o| {
                let size = VM::VMObjectModel::size_in_words(o);
                end = o.to_raw_address().add_words(size);
            });
            if end != r.top() {
                return Err(format!("objects of {:?} end at {}", r, end));
            }
            r.bot().verify::<VM>(r.top())?;
        }

        let words: usize = self
            .compacted_regions
            .iter()
            .map(|&i| self.heap.region_at(i))
            .filter(|r| !r.is_humongous())
            .map(|r| r.used() >> LOG_BYTES_IN_WORD)
            .sum();
        if words != self.compacted_live_words {
            return Err(format!(
                "{} words in compacted regions, {} live words before compaction",
                words, self.compacted_live_words
            ));
        }
        Ok(())
    }
}

/// Where `object` will be after compaction.
pub(crate) fn destination<VM: VMBinding>(object: ObjectReference) -> Address {
    VM::VMObjectModel::forwardee(object).unwrap_or(object.to_raw_address())
}
