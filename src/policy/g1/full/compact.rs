use super::G1FullCollector;
use crate::policy::g1::heap::G1Heap;
use crate::scheduler::{GCWorker, HeapRegionClaimer, WorkerTask};
use crate::util::conversions::conjoint_words;
use crate::util::ObjectReference;
use crate::vm::{ObjectModel, VMBinding};

impl<VM: VMBinding> G1FullCollector<'_, VM> {
    /// Copy the live objects of `region` to their new locations and give the region the top
    /// the preparation computed for it.
    pub(super) fn compact_region(&self, region: usize) {
        let heap = self.heap;
        let r = heap.region_at(region);
        debug_assert!(!r.is_pinned(), "{:?} is pinned", r);
        debug_assert!(!r.is_humongous(), "{:?} is humongous", r);
        let liveness = heap.liveness();
        liveness.iterate(region, r.top(), |object| {
            let size = VM::VMObjectModel::size_in_words(object);
            liveness.clear(object.to_raw_address());
            if let Some(to) = VM::VMObjectModel::forwardee(object) {
                debug_assert!(to < object.to_raw_address(), "{} moves to {}", object, to);
                unsafe { conjoint_words(object.to_raw_address(), to, size) };
                VM::VMObjectModel::init_mark(ObjectReference::from_raw_address(to));
            }
            size
        });
        r.reset_compacted_after_full_gc(self.tops.get(region));
    }

    pub(super) fn serial_compaction(&mut self) {
        let regions = self.serial_compaction_point.get_mut().regions().to_vec();
        debug!("Serial compaction of {} regions", regions.len());
        for region in regions {
            self.compact_region(region);
        }
    }

    /// Move the humongous objects preparation forwarded, lowest first, and set up their new
    /// regions.
    pub(super) fn humongous_compaction(&self) {
        let heap = self.heap;
        for mv in self.humongous_moves.iter() {
            let from = heap.region_at(mv.from).bottom();
            let object = ObjectReference::from_raw_address(from);
            let size = VM::VMObjectModel::size_in_words(object);
            let to = heap.region_at(mv.to).bottom();
            debug_assert_eq!(VM::VMObjectModel::forwardee(object), Some(to));

            heap.liveness().clear(from);
            unsafe { conjoint_words(from, to, size) };
            VM::VMObjectModel::init_mark(ObjectReference::from_raw_address(to));

            let new_regions = mv.to..mv.to + mv.num_regions;
            for i in mv.from..mv.from + mv.num_regions {
                if !new_regions.contains(&i) {
                    heap.region_at(i).hr_clear();
                }
            }
            for i in new_regions {
                heap.region_at(i).hr_clear();
            }
            G1Heap::<VM>::setup_humongous_regions(heap.regions(), mv.to, mv.num_regions, to, size);
            debug!(
                "Moved humongous object of {} words from region {} to region {}",
                size, mv.from, mv.to
            );
        }
    }
}

/// Phase 4: slide the objects of every worker's regions into place, and reset the regions
/// that stay where they are.
pub(super) struct CompactionTask<'a, VM: VMBinding> {
    collector: &'a G1FullCollector<'a, VM>,
    claimer: HeapRegionClaimer,
}

impl<'a, VM: VMBinding> CompactionTask<'a, VM> {
    pub fn new(collector: &'a G1FullCollector<'a, VM>) -> Self {
        Self {
            collector,
            claimer: HeapRegionClaimer::new(collector.workers(), collector.heap().num_regions()),
        }
    }
}

impl<VM: VMBinding> WorkerTask for CompactionTask<'_, VM> {
    fn name(&self) -> &'static str {
        "Compaction task"
    }

    fn work(&self, worker: GCWorker) {
        let collector = self.collector;
        let point = collector.compaction_point(worker.ordinal);
        let regions = point.borrow().regions().to_vec();
        for &region in regions.iter() {
            collector.compact_region(region);
        }

        let mut skipped = 0;
        collector.heap().heap_region_par_iterate_from_worker_offset(
            &self.claimer,
            worker.ordinal,
            |r| {
                if collector.attrs().is_skip_compacting(r.hrm_index()) {
                    r.reset_skip_compacting_after_full_gc();
                    skipped += 1;
                }
            },
        );
        debug!(
            "Compaction task (worker {}): {} regions compacted, {} regions reset in place",
            worker.ordinal,
            regions.len(),
            skipped
        );
    }
}
