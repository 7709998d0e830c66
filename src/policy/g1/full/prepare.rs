use super::{destination, CompactionPoint, G1FullCollector, HumongousMove, RegionAttr};
use crate::scheduler::{GCWorker, HeapRegionClaimer, WorkerTask};
use crate::util::ObjectReference;
use crate::vm::{ObjectModel, VMBinding};
use std::sync::atomic::{AtomicBool, Ordering};

impl<VM: VMBinding> G1FullCollector<'_, VM> {
    /// Decide per region what preparation does with it: free it, leave it in place, or
    /// hand it to a worker's compaction point. Regions are dealt to the workers round robin
    /// in ascending order, so each worker's queue is sorted.
    pub(super) fn determine_compaction_work_lists(&mut self) {
        let heap = self.heap;
        let threshold = self.scope.region_compaction_threshold;
        let mut next_worker = 0;
        let (mut freed, mut skipped) = (0, 0);

        for r in heap.regions() {
            let i = r.hrm_index();
            match self.attrs.get(i) {
                RegionAttr::Free | RegionAttr::SkipMarking => {}
                _ if r.is_continues_humongous() => {}
                _ if r.is_starts_humongous() => {
                    let object = ObjectReference::from_raw_address(r.bottom());
                    let words = VM::VMObjectModel::size_in_words(object);
                    let n = heap.humongous_obj_size_in_regions(words);
                    if heap.liveness().is_object_marked(object) || r.is_pinned() {
                        for j in i..i + n {
                            self.attrs.set_skip_compacting(j);
                        }
                        if !r.is_pinned() {
                            self.humongous_start_regions.push(i);
                        }
                    } else {
                        trace!("Free dead humongous object in regions {}..{}", i, i + n);
                        for j in i..i + n {
                            self.free_region(heap.region_at(j));
                        }
                        freed += n;
                    }
                }
                RegionAttr::SkipCompacting => {
                    if r.is_open_archive() && self.live_words(i) == 0 {
                        self.free_region(r);
                        freed += 1;
                    }
                }
                RegionAttr::Compacting => {
                    let live = self.live_words(i);
                    if live == 0 {
                        self.free_region(r);
                        freed += 1;
                    } else if live <= threshold {
                        self.compaction_points[next_worker].get_mut().add(i);
                        next_worker = (next_worker + 1) % self.num_workers;
                    } else {
                        trace!(
                            "Skip compacting region {}: {} of {} words live",
                            i,
                            live,
                            heap.region_words()
                        );
                        self.attrs.update_from_compacting_to_skip_compacting(i);
                        skipped += 1;
                    }
                }
            }
        }
        let humongous = self.humongous_start_regions.len();
        debug!(
            "Determine work lists: {} regions freed, {} kept in place, {} humongous objects",
            freed, skipped, humongous
        );
    }

    /// Move the current region and everything after it from every worker's compaction
    /// point to the serial compaction point, and compact those regions again in ascending
    /// order. The lowest of them keeps what was forwarded into it.
    pub(super) fn prepare_serial_compaction(&mut self) {
        let heap = self.heap;
        let serial = self.serial_compaction_point.get_mut();
        for cp in self.compaction_points.iter_mut() {
            let cp = cp.get_mut();
            if cp.has_regions() {
                for r in cp.remove_at_or_above() {
                    serial.add(r);
                }
            }
        }
        if !serial.has_regions() {
            return;
        }
        serial.sort_regions();
        serial.initialize(&self.tops);
        debug!(
            "Prepare serial compaction of {} regions from region {}",
            serial.regions().len(),
            serial.regions()[0]
        );

        let rest = serial.regions()[1..].to_vec();
        let mut recompacted = vec![false; heap.num_regions()];
        for &i in rest.iter() {
            recompacted[i] = true;
        }
        for i in rest {
            let r = heap.region_at(i);
            self.tops.set(i, r.bottom());
            r.reset_bot();
            heap.liveness().iterate(i, r.top(), |object| {
                let size = VM::VMObjectModel::size_in_words(object);
                let target = heap.addr_to_region(destination::<VM>(object));
                if recompacted[target] {
                    serial.forward::<VM>(object, size, heap.regions(), &self.tops);
                }
                size
            });
        }
        serial.update(&self.tops);
    }

    /// Move live humongous objects down into runs of regions that will be empty after
    /// compaction: the untouched tail of the serial compaction point and the free regions.
    pub(super) fn prepare_humongous_compaction(&mut self) {
        let heap = self.heap;
        let serial = self.serial_compaction_point.get_mut();
        let humongous = self.humongous_compaction_point.get_mut();

        for &i in serial.regions_after_current() {
            humongous.add(i);
        }
        for i in 0..heap.num_regions() {
            if self.attrs.is_free(i) {
                humongous.add(i);
            }
        }
        let Some(&lowest) = humongous.regions().iter().min() else {
            return;
        };
        let num_regions_of = |start: usize| {
            let object = ObjectReference::from_raw_address(heap.region_at(start).bottom());
            heap.humongous_obj_size_in_regions(VM::VMObjectModel::size_in_words(object))
        };
        let candidates: Vec<usize> = self
            .humongous_start_regions
            .iter()
            .copied()
            .filter(|&start| start > lowest)
            .collect();
        for &start in candidates.iter() {
            for j in start..start + num_regions_of(start) {
                humongous.add(j);
            }
        }
        humongous.sort_regions();

        for start in candidates {
            let n = num_regions_of(start);
            if let Some(to) = humongous.forward_humongous::<VM>(start, n, heap.regions()) {
                for j in start..start + n {
                    self.attrs.set_compacting(j);
                }
                self.humongous_moves.push(HumongousMove {
                    from: start,
                    to,
                    num_regions: n,
                });
            }
        }
        debug!(
            "Prepare humongous compaction: {} of {} humongous objects move",
            self.humongous_moves.len(),
            self.humongous_start_regions.len()
        );
    }
}

/// Phase 2: compute the forwarding addresses of the live objects in each worker's regions.
pub(super) struct PrepareCompactionTask<'a, VM: VMBinding> {
    collector: &'a G1FullCollector<'a, VM>,
    claimer: HeapRegionClaimer,
    free_targets: AtomicBool,
}

impl<'a, VM: VMBinding> PrepareCompactionTask<'a, VM> {
    pub fn new(collector: &'a G1FullCollector<'a, VM>) -> Self {
        Self {
            collector,
            claimer: HeapRegionClaimer::new(collector.workers(), collector.heap().num_regions()),
            free_targets: AtomicBool::new(false),
        }
    }

    /// Whether some worker has a region left that nothing was forwarded into.
    pub fn has_free_compaction_targets(&self) -> bool {
        self.free_targets.load(Ordering::Relaxed)
    }

    fn prepare_for_compaction(&self, cp: &mut CompactionPoint, region: usize) {
        let heap = self.collector.heap();
        let tops = self.collector.tops();
        let r = heap.region_at(region);
        tops.set(region, r.bottom());
        if !cp.is_initialized() {
            cp.initialize(tops);
        }
        r.reset_bot();
        heap.liveness().iterate(region, r.top(), |object| {
            let size = VM::VMObjectModel::size_in_words(object);
            cp.forward::<VM>(object, size, heap.regions(), tops);
            size
        });
    }
}

impl<VM: VMBinding> WorkerTask for PrepareCompactionTask<'_, VM> {
    fn name(&self) -> &'static str {
        "Prepare compaction task"
    }

    fn work(&self, worker: GCWorker) {
        let collector = self.collector;
        let heap = collector.heap();

        // Remembered sets are stale after a full collection.
        heap.heap_region_par_iterate_from_start(&self.claimer, |r| {
            if !collector.attrs().is_free(r.hrm_index()) {
                r.rem_set().clear(false);
            }
        });

        let mut cp = collector.compaction_point(worker.ordinal).borrow_mut();
        for region in cp.regions().to_vec() {
            self.prepare_for_compaction(&mut cp, region);
        }
        cp.update(collector.tops());
        if cp.has_regions() && !cp.is_at_last_region() {
            self.free_targets.store(true, Ordering::Relaxed);
        }
        debug!(
            "Prepare compaction task (worker {}): {} regions, {} left empty",
            worker.ordinal,
            cp.regions().len(),
            cp.regions_after_current().len()
        );
    }
}
