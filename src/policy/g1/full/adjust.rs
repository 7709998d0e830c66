use super::G1FullCollector;
use crate::scheduler::{GCWorker, HeapRegionClaimer, WorkerTask};
use crate::util::{Address, ObjectReference};
use crate::vm::object_model::{load_slot, store_slot};
use crate::vm::{ObjectModel, Scanning, VMBinding};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point `slot` at the new location of its referent.
fn adjust_slot<VM: VMBinding>(slot: Address) -> bool {
    let object = load_slot(slot);
    if object.is_null() {
        return false;
    }
    match VM::VMObjectModel::forwardee(object) {
        Some(to) => {
            store_slot(slot, ObjectReference::from_raw_address(to));
            true
        }
        None => false,
    }
}

/// Phase 3: rewrite every reference to a moving object.
pub(super) struct AdjustTask<'a, VM: VMBinding> {
    collector: &'a G1FullCollector<'a, VM>,
    claimer: HeapRegionClaimer,
    adjusted: AtomicUsize,
}

impl<'a, VM: VMBinding> AdjustTask<'a, VM> {
    pub fn new(collector: &'a G1FullCollector<'a, VM>) -> Self {
        Self {
            collector,
            claimer: HeapRegionClaimer::new(collector.workers(), collector.heap().num_regions()),
            adjusted: AtomicUsize::new(0),
        }
    }

    fn adjust_roots(&self) -> usize {
        let mut adjusted = 0;
        let mut visitor = |slot: Address| {
            if adjust_slot::<VM>(slot) {
                adjusted += 1;
            }
        };
        VM::VMScanning::scan_roots(&mut visitor);
        VM::VMScanning::scan_soft_roots(&mut visitor);
        VM::VMScanning::scan_weak_roots(&mut visitor);
        adjusted
    }
}

impl<VM: VMBinding> WorkerTask for AdjustTask<'_, VM> {
    fn name(&self) -> &'static str {
        "Adjust task"
    }

    fn work(&self, worker: GCWorker) {
        let collector = self.collector;
        let heap = collector.heap();
        let mut adjusted = 0;
        if worker.ordinal == 0 {
            adjusted += self.adjust_roots();
        }

        heap.heap_region_par_iterate_from_worker_offset(&self.claimer, worker.ordinal, |r| {
            let i = r.hrm_index();
            // Closed archive regions only refer to each other, and a humongous object is
            // adjusted through its first region.
            if !collector.attrs().is_marked_through(i) || r.is_continues_humongous() {
                return;
            }
            heap.liveness().iterate(i, r.top(), |object| {
                VM::VMObjectModel::scan_object(object, &mut |slot: Address| {
                    if adjust_slot::<VM>(slot) {
                        adjusted += 1;
                    }
                });
                VM::VMObjectModel::size_in_words(object)
            });
        });
        self.adjusted.fetch_add(adjusted, Ordering::Relaxed);
        trace!(
            "Adjust task (worker {}): {} references adjusted",
            worker.ordinal,
            adjusted
        );
    }
}

impl<VM: VMBinding> Drop for AdjustTask<'_, VM> {
    fn drop(&mut self) {
        debug!(
            "Adjusted {} references",
            self.adjusted.load(Ordering::Relaxed)
        );
    }
}
