use super::G1FullCollector;
use crate::scheduler::{GCWorker, TaskTerminator, WorkerTask};
use crate::util::alloc::{BufferNode, BufferNodeAllocator};
use crate::util::{Address, ObjectReference};
use crate::vm::object_model::{load_slot, store_slot};
use crate::vm::{ObjectModel, Scanning, VMBinding};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Objects per chunk of the shared mark stack.
const CHUNK_CAPACITY: usize = 64;
/// A worker shares the oldest part of its local stack once it holds this many objects.
const LOCAL_STACK_LIMIT: usize = 2 * CHUNK_CAPACITY;

struct Chunk(NonNull<BufferNode>);

// A chunk is owned by whoever took it out of the stack.
unsafe impl Send for Chunk {}

/// The mark stack shared by all marking workers. Workers move whole chunks of objects in
/// and out, so the lock is taken once per chunk, not once per object.
pub(super) struct MarkStack {
    allocator: BufferNodeAllocator,
    chunks: spin::Mutex<Vec<Chunk>>,
    num_chunks: AtomicUsize,
}

impl MarkStack {
    pub fn new() -> Self {
        Self {
            allocator: BufferNodeAllocator::new("Mark Stack", CHUNK_CAPACITY),
            chunks: spin::Mutex::new(vec![]),
            num_chunks: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_chunks.load(Ordering::Acquire) == 0
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks.load(Ordering::Acquire)
    }

    /// Move up to a chunk of the oldest objects of `local` to the shared stack.
    pub fn push_chunk(&self, local: &mut Vec<ObjectReference>) {
        if local.is_empty() {
            return;
        }
        let mut node = self.allocator.allocate();
        let take = local.len().min(CHUNK_CAPACITY);
        {
            let buffer = unsafe { node.as_mut() };
            for object in local.drain(..take) {
                let pushed = buffer.push(object.to_raw_address().as_usize());
                debug_assert!(pushed);
            }
        }
        self.chunks.lock().push(Chunk(node));
        self.num_chunks.fetch_add(1, Ordering::Release);
    }

    /// Move the objects of one shared chunk to `local`. Returns false if there was none.
    pub fn pop_chunk(&self, local: &mut Vec<ObjectReference>) -> bool {
        let chunk = {
            let mut chunks = self.chunks.lock();
            match chunks.pop() {
                Some(chunk) => {
                    self.num_chunks.fetch_sub(1, Ordering::Release);
                    chunk
                }
                None => return false,
            }
        };
        let buffer = unsafe { &mut *chunk.0.as_ptr() };
        while let Some(value) = buffer.pop() {
            local.push(ObjectReference::from_raw_address(unsafe {
                Address::from_usize(value)
            }));
        }
        unsafe { self.allocator.release(chunk.0) };
        true
    }

    pub fn mem_size(&self) -> usize {
        self.allocator.mem_size()
    }
}

impl Drop for MarkStack {
    fn drop(&mut self) {
        for chunk in self.chunks.get_mut().drain(..) {
            unsafe { self.allocator.release(chunk.0) };
        }
    }
}

/// Phase 1: mark everything reachable from the roots.
pub(super) struct MarkingTask<'a, VM: VMBinding> {
    collector: &'a G1FullCollector<'a, VM>,
    stack: MarkStack,
    terminator: TaskTerminator,
    marked_objects: AtomicUsize,
}

impl<'a, VM: VMBinding> MarkingTask<'a, VM> {
    pub fn new(collector: &'a G1FullCollector<'a, VM>) -> Self {
        Self {
            collector,
            stack: MarkStack::new(),
            terminator: TaskTerminator::new(collector.workers()),
            marked_objects: AtomicUsize::new(0),
        }
    }

    /// Clear the weak roots, and the soft roots if the collection clears soft references,
    /// whose referents did not get marked.
    pub fn process_references(&self) {
        let mut cleared_soft = 0;
        if self.collector.scope().clear_soft_refs {
            VM::VMScanning::scan_soft_roots(&mut |slot: Address| {
                if self.clear_if_dead(slot) {
                    cleared_soft += 1;
                }
            });
        }
        let mut cleared_weak = 0;
        VM::VMScanning::scan_weak_roots(&mut |slot: Address| {
            if self.clear_if_dead(slot) {
                cleared_weak += 1;
            }
        });
        debug!(
            "Reference processing: {} marked, cleared {} soft and {} weak roots, stack {} bytes",
            self.marked_objects.load(Ordering::Relaxed),
            cleared_soft,
            cleared_weak,
            self.stack.mem_size()
        );
    }

    fn clear_if_dead(&self, slot: Address) -> bool {
        let object = load_slot(slot);
        if object.is_null() || self.collector.is_alive(object) {
            return false;
        }
        store_slot(slot, ObjectReference::NULL);
        true
    }
}

impl<VM: VMBinding> WorkerTask for MarkingTask<'_, VM> {
    fn name(&self) -> &'static str {
        "Marking task"
    }

    fn work(&self, worker: GCWorker) {
        let mut marker = Marker {
            task: self,
            local: Vec::with_capacity(LOCAL_STACK_LIMIT),
            marked: 0,
        };
        if worker.ordinal == 0 {
            VM::VMScanning::scan_roots(&mut |slot: Address| marker.mark_slot(slot));
            if !self.collector.scope().clear_soft_refs {
                VM::VMScanning::scan_soft_roots(&mut |slot: Address| marker.mark_slot(slot));
            }
        }
        marker.drain();
        let marked = marker.marked;
        self.marked_objects.fetch_add(marked, Ordering::Relaxed);
        debug!(
            "Marking task (worker {}): {} objects marked",
            worker.ordinal, marked
        );
    }
}

/// The per-worker side of marking.
struct Marker<'t, 'a, VM: VMBinding> {
    task: &'t MarkingTask<'a, VM>,
    local: Vec<ObjectReference>,
    marked: usize,
}

impl<VM: VMBinding> Marker<'_, '_, VM> {
    fn mark_slot(&mut self, slot: Address) {
        let object = load_slot(slot);
        if !object.is_null() {
            self.mark_and_push(object);
        }
    }

    fn mark_and_push(&mut self, object: ObjectReference) {
        let collector = self.task.collector;
        let heap = collector.heap();
        let addr = object.to_raw_address();
        debug_assert!(heap.is_in_reserved(addr), "{} is outside the heap", addr);
        let region = heap.addr_to_region(addr);
        if !collector.attrs().is_marked_through(region) {
            debug_assert!(
                !collector.attrs().is_free(region),
                "reference to {} in free region {}",
                addr,
                region
            );
            return;
        }
        if heap.liveness().par_mark(addr) {
            collector.add_live_words(region, VM::VMObjectModel::size_in_words(object));
            self.marked += 1;
            self.local.push(object);
            if self.local.len() >= LOCAL_STACK_LIMIT {
                self.task.stack.push_chunk(&mut self.local);
            }
        }
    }

    /// Trace until every worker runs out of objects.
    fn drain(&mut self) {
        loop {
            while let Some(object) = self.local.pop() {
                VM::VMObjectModel::scan_object(object, &mut |slot: Address| self.mark_slot(slot));
            }
            if self.task.stack.pop_chunk(&mut self.local) {
                continue;
            }
            let stack = &self.task.stack;
            let terminator = &self.task.terminator;
            if terminator.offer_termination(|| !stack.is_empty()) {
                debug_assert!(stack.is_empty());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(i: usize) -> ObjectReference {
        ObjectReference::from_raw_address(unsafe { Address::from_usize(0x1000_0000 + i * 16) })
    }

    #[test]
    fn chunks_move_oldest_objects() {
        let stack = MarkStack::new();
        let mut local: Vec<_> = (0..CHUNK_CAPACITY + 10).map(object).collect();
        stack.push_chunk(&mut local);
        assert_eq!(local.len(), 10);
        assert_eq!(local[0], object(CHUNK_CAPACITY));
        assert_eq!(stack.num_chunks(), 1);

        let mut other = vec![];
        assert!(stack.pop_chunk(&mut other));
        assert!(stack.is_empty());
        other.sort_by_key(|o| o.value());
        assert_eq!(other, (0..CHUNK_CAPACITY).map(object).collect::<Vec<_>>());
        assert!(!stack.pop_chunk(&mut other));
    }

    #[test]
    fn popped_chunks_go_back_to_the_allocator() {
        let stack = MarkStack::new();
        let mut local: Vec<_> = (0..3 * CHUNK_CAPACITY).map(object).collect();
        while !local.is_empty() {
            stack.push_chunk(&mut local);
        }
        assert_eq!(stack.num_chunks(), 3);
        while stack.pop_chunk(&mut local) {}
        assert_eq!(local.len(), 3 * CHUNK_CAPACITY);
        assert_eq!(
            stack.allocator.pending_count() + stack.allocator.free_count(),
            3
        );
    }
}
