//! A lock-free allocator of fixed-size nodes with an ABA-safe free list.
//!
//! Released nodes never go straight onto the free list. They are pushed onto one of two
//! pending lists. Once the active pending list grows past the transfer threshold, one thread
//! takes the transfer lock, flips the active pending list, and defers the publication of the
//! old one to the epoch after every thread currently pinned has unpinned. Pops from the free
//! list happen while pinned, so a node can only reappear on the free list after every pop
//! that might have seen it as the list head has finished.

use crossbeam::epoch;
use crossbeam::utils::{Backoff, CachePadded};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::util::options::DEFAULT_TRANSFER_THRESHOLD;

/// Where the nodes come from and where they go when the allocator shrinks.
///
/// Every block returned by `allocate` must be at least [`FreeListAllocator::node_size`] bytes
/// for the payload size the user of the allocator expects, and aligned to a word.
pub trait FreeListConfig: Send + Sync + 'static {
    fn allocate(&self) -> NonNull<u8>;

    /// # Safety
    /// `node` must have come from `allocate` on the same config and must not be used afterwards.
    unsafe fn deallocate(&self, node: NonNull<u8>);
}

/// The link word in front of every node. Users only see the bytes after it.
#[repr(C)]
struct FreeNode {
    next: AtomicPtr<FreeNode>,
}

const HEADER_BYTES: usize = std::mem::size_of::<FreeNode>();

impl FreeNode {
    fn from_payload(payload: NonNull<u8>) -> *mut FreeNode {
        unsafe { payload.as_ptr().sub(HEADER_BYTES) as *mut FreeNode }
    }

    fn payload(node: *mut FreeNode) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked((node as *mut u8).add(HEADER_BYTES)) }
    }
}

/// A multi-producer list with a single-consumer `take_all`.
struct PendingList {
    head: AtomicPtr<FreeNode>,
    tail: AtomicPtr<FreeNode>,
    count: AtomicUsize,
}

struct NodeList {
    head: *mut FreeNode,
    tail: *mut FreeNode,
    count: usize,
}

impl PendingList {
    fn new() -> Self {
        Self {
            head: AtomicPtr::new(std::ptr::null_mut()),
            tail: AtomicPtr::new(std::ptr::null_mut()),
            count: AtomicUsize::new(0),
        }
    }

    /// Add a node. Returns the number of nodes in the list. Thread-safe against other adds.
    fn add(&self, node: *mut FreeNode) -> usize {
        let old_head = self.head.swap(node, Ordering::AcqRel);
        unsafe { (*node).next.store(old_head, Ordering::Relaxed) };
        if old_head.is_null() {
            // Only the first node ever added to an empty list becomes the tail.
            self.tail.store(node, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Take every node, leaving the list empty. Not thread-safe against `add`.
    fn take_all(&self) -> NodeList {
        NodeList {
            head: self.head.swap(std::ptr::null_mut(), Ordering::AcqRel),
            tail: self.tail.swap(std::ptr::null_mut(), Ordering::Relaxed),
            count: self.count.swap(0, Ordering::Relaxed),
        }
    }
}

struct SendPtr(*mut FreeNode);
// Nodes are owned by the allocator, never by a thread.
unsafe impl Send for SendPtr {}

struct Inner<C: FreeListConfig> {
    name: String,
    config: C,
    transfer_threshold: usize,
    free_count: CachePadded<AtomicUsize>,
    free_list: CachePadded<AtomicPtr<FreeNode>>,
    transfer_lock: CachePadded<AtomicBool>,
    active_pending_list: AtomicUsize,
    pending_lists: [PendingList; 2],
}

impl<C: FreeListConfig> Inner<C> {
    fn pop_free(&self) -> Option<*mut FreeNode> {
        let backoff = Backoff::new();
        loop {
            let head = self.free_list.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            // The caller is pinned, so `head` cannot be pushed back while we read its link.
            let next = unsafe { (*head).next.load(Ordering::Relaxed) };
            if self
                .free_list
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(head);
            }
            backoff.spin();
        }
    }

    /// Publish the pending list `index` onto the free list and release the transfer lock.
    /// Runs after every thread that could have been popping at the time of the flip has
    /// unpinned.
    fn finish_transfer(&self, index: usize) {
        let list = self.pending_lists[index].take_all();
        if !list.head.is_null() {
            // Grow the count before the nodes become visible, so it never underflows.
            self.free_count.fetch_add(list.count, Ordering::AcqRel);
            let backoff = Backoff::new();
            loop {
                let old = self.free_list.load(Ordering::Acquire);
                unsafe { (*list.tail).next.store(old, Ordering::Relaxed) };
                if self
                    .free_list
                    .compare_exchange_weak(old, list.head, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
                backoff.spin();
            }
            trace!("{}: transferred {} nodes", self.name, list.count);
        }
        self.transfer_lock.store(false, Ordering::Release);
    }

    /// Deallocate a chain of nodes linked through their headers.
    ///
    /// # Safety
    /// No other thread may reach any node of the chain.
    unsafe fn delete_list(&self, mut node: *mut FreeNode) -> usize {
        let mut count = 0;
        while !node.is_null() {
            let next = (*node).next.load(Ordering::Relaxed);
            let ptr = NonNull::new_unchecked(node as *mut u8);
            self.config.deallocate(ptr);
            node = next;
            count += 1;
        }
        count
    }
}

impl<C: FreeListConfig> Drop for Inner<C> {
    fn drop(&mut self) {
        // The last `Arc` is gone, so no deferred transfer and no user is left.
        unsafe {
            for pending in self.pending_lists.iter() {
                self.delete_list(pending.take_all().head);
            }
            self.delete_list(self.free_list.swap(std::ptr::null_mut(), Ordering::Relaxed));
        }
    }
}

/// A node allocator over a [`FreeListConfig`]. Cloning gives another handle to the same
/// allocator.
pub struct FreeListAllocator<C: FreeListConfig> {
    inner: Arc<Inner<C>>,
}

impl<C: FreeListConfig> Clone for FreeListAllocator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: FreeListConfig> FreeListAllocator<C> {
    pub fn new(name: &str, config: C) -> Self {
        Self::with_transfer_threshold(name, config, DEFAULT_TRANSFER_THRESHOLD)
    }

    pub fn with_transfer_threshold(name: &str, config: C, transfer_threshold: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                config,
                transfer_threshold,
                free_count: CachePadded::new(AtomicUsize::new(0)),
                free_list: CachePadded::new(AtomicPtr::new(std::ptr::null_mut())),
                transfer_lock: CachePadded::new(AtomicBool::new(false)),
                active_pending_list: AtomicUsize::new(0),
                pending_lists: [PendingList::new(), PendingList::new()],
            }),
        }
    }

    /// The number of bytes a config must hand out per node for a payload of `payload_bytes`.
    pub const fn node_size(payload_bytes: usize) -> usize {
        HEADER_BYTES + payload_bytes
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &C {
        &self.inner.config
    }

    pub fn free_count(&self) -> usize {
        self.inner.free_count.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending_lists.iter().map(|l| l.count()).sum()
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + std::mem::size_of::<Inner<C>>()
    }

    /// Hand out a node payload, reusing a freed node when there is one.
    pub fn allocate(&self) -> NonNull<u8> {
        if self.free_count() > 0 {
            let guard = epoch::pin();
            let node = self.inner.pop_free();
            drop(guard);
            if let Some(node) = node {
                // Shrink the count only after the node left the list, so it never underflows.
                self.inner.free_count.fetch_sub(1, Ordering::AcqRel);
                return FreeNode::payload(node);
            }
        }
        let block = self.inner.config.allocate();
        let node = block.as_ptr() as *mut FreeNode;
        unsafe {
            node.write(FreeNode {
                next: AtomicPtr::new(std::ptr::null_mut()),
            })
        };
        FreeNode::payload(node)
    }

    /// Give a node payload back.
    ///
    /// # Safety
    /// `payload` must have come from `allocate` on this allocator and must not be used
    /// afterwards.
    pub unsafe fn release(&self, payload: NonNull<u8>) {
        let node = FreeNode::from_payload(payload);
        // Pinned, so a transfer that flips the active list waits for this add to finish.
        let count = {
            let _guard = epoch::pin();
            let index = self.inner.active_pending_list.load(Ordering::Acquire);
            self.inner.pending_lists[index].add(node)
        };
        if count > self.inner.transfer_threshold {
            self.try_transfer_pending();
        }
    }

    /// Start moving the active pending list to the free list. Returns false if another
    /// transfer is in progress.
    pub fn try_transfer_pending(&self) -> bool {
        // Check before the CAS.
        if self.inner.transfer_lock.load(Ordering::Relaxed)
            || self
                .inner
                .transfer_lock
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
        {
            return false;
        }
        // New releases go to the other list from now on.
        let active = &self.inner.active_pending_list;
        let index = active.fetch_xor(1, Ordering::AcqRel);
        let inner = self.inner.clone();
        let guard = epoch::pin();
        guard.defer(move || inner.finish_transfer(index));
        guard.flush();
        true
    }

    /// Wait until no transfer is in flight. Pending nodes stay pending.
    pub fn flush(&self) {
        let backoff = Backoff::new();
        while self.inner.transfer_lock.load(Ordering::Acquire) {
            epoch::pin().flush();
            backoff.snooze();
        }
    }

    /// Deallocate up to `remove_goal` free nodes. Returns how many were removed, which is less
    /// than the goal if fewer were free. Never waits for more nodes to show up.
    pub fn reduce_free_list(&self, remove_goal: usize) -> usize {
        self.try_transfer_pending();
        let guard = epoch::pin();
        let mut removed = Vec::new();
        while removed.len() < remove_goal {
            match self.inner.pop_free() {
                Some(node) => {
                    self.inner.free_count.fetch_sub(1, Ordering::AcqRel);
                    removed.push(SendPtr(node));
                }
                None => break,
            }
        }
        let count = removed.len();
        if count > 0 {
            // Another thread may still be reading the link of a popped node.
            let inner = self.inner.clone();
            guard.defer(move || {
                for node in removed {
                    unsafe {
                        inner
                            .config
                            .deallocate(NonNull::new_unchecked(node.0 as *mut u8))
                    };
                }
            });
        }
        debug!(
            "{}: reduced free list by {} of {} requested",
            self.inner.name, count, remove_goal
        );
        count
    }

    /// Deallocate every free and pending node. Must not race with any other use of the
    /// allocator.
    pub fn reset(&self) {
        self.flush();
        let inner = &self.inner;
        let mut count = 0;
        unsafe {
            for pending in inner.pending_lists.iter() {
                count += inner.delete_list(pending.take_all().head);
            }
            let free = inner.free_list.swap(std::ptr::null_mut(), Ordering::AcqRel);
            count += inner.delete_list(free);
        }
        inner.free_count.store(0, Ordering::Release);
        trace!("{}: reset, deallocated {} nodes", inner.name, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::panic_after;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::alloc::Layout;

    const PAYLOAD: usize = 16;

    /// Hands out heap blocks and counts how many are alive.
    #[derive(Default)]
    struct CountingConfig {
        live: AtomicUsize,
        total: AtomicUsize,
    }

    impl CountingConfig {
        fn layout() -> Layout {
            Layout::from_size_align(
                FreeListAllocator::<CountingConfig>::node_size(PAYLOAD),
                8,
            )
            .unwrap()
        }
    }

    impl FreeListConfig for CountingConfig {
        fn allocate(&self) -> NonNull<u8> {
            self.live.fetch_add(1, Ordering::SeqCst);
            self.total.fetch_add(1, Ordering::SeqCst);
            NonNull::new(unsafe { std::alloc::alloc(Self::layout()) }).unwrap()
        }

        unsafe fn deallocate(&self, node: NonNull<u8>) {
            self.live.fetch_sub(1, Ordering::SeqCst);
            std::alloc::dealloc(node.as_ptr(), Self::layout());
        }
    }

    fn new_allocator(threshold: usize) -> FreeListAllocator<CountingConfig> {
        FreeListAllocator::with_transfer_threshold("test", CountingConfig::default(), threshold)
    }

    #[test]
    fn released_nodes_are_reused_after_transfer() {
        let a = new_allocator(2);
        let nodes: Vec<_> = (0..3).map(|_| a.allocate()).collect();
        for n in nodes.iter() {
            unsafe { a.release(*n) };
        }
        // The third release crossed the threshold.
        a.flush();
        assert_eq!(a.free_count(), 3);
        assert_eq!(a.pending_count(), 0);

        let again = a.allocate();
        assert!(nodes.contains(&again));
        assert_eq!(a.free_count(), 2);
        assert_eq!(a.config().total.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn conservation() {
        let a = new_allocator(4);
        let mut held = Vec::new();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..1000 {
            if held.is_empty() || rng.random_bool(0.55) {
                held.push(a.allocate());
            } else {
                let i = rng.random_range(0..held.len());
                unsafe { a.release(held.swap_remove(i)) };
            }
            let total = a.config().total.load(Ordering::SeqCst);
            a.flush();
            assert_eq!(a.free_count() + a.pending_count() + held.len(), total);
        }
    }

    #[test]
    fn reduce_free_list_is_best_effort() {
        let a = new_allocator(0);
        let nodes: Vec<_> = (0..5).map(|_| a.allocate()).collect();
        for n in nodes {
            unsafe { a.release(n) };
        }
        a.try_transfer_pending();
        a.flush();
        let free = a.free_count();
        assert!(free > 0);
        assert_eq!(a.reduce_free_list(free + 10), free);
        assert_eq!(a.free_count(), 0);
        assert_eq!(a.reduce_free_list(3), 0);
    }

    #[test]
    fn reset_deallocates_everything() {
        let a = new_allocator(100);
        let nodes: Vec<_> = (0..8).map(|_| a.allocate()).collect();
        for n in nodes {
            unsafe { a.release(n) };
        }
        assert_eq!(a.pending_count(), 8);
        a.reset();
        assert_eq!(a.pending_count(), 0);
        assert_eq!(a.free_count(), 0);
        assert_eq!(a.config().live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_node_is_handed_out_twice() {
        panic_after(30_000, || {
            let a = new_allocator(10);
            crossbeam::thread::scope(|s| {
                for t in 0..8usize {
                    let a = a.clone();
                    s.spawn(move |_| {
                        let mut rng = ChaCha8Rng::seed_from_u64(t as u64);
                        let mut held: Vec<(NonNull<u8>, usize)> = Vec::new();
                        for i in 0..20_000usize {
                            if held.len() < 16 && (held.is_empty() || rng.random_bool(0.5)) {
                                let node = a.allocate();
                                let canary = (t << 32) | i;
                                unsafe { (node.as_ptr() as *mut usize).write(canary) };
                                held.push((node, canary));
                            } else {
                                let (node, canary) = held.swap_remove(0);
                                // Nobody else wrote to the node while we held it.
                                let seen = unsafe { (node.as_ptr() as *const usize).read() };
                                assert_eq!(seen, canary);
                                unsafe { a.release(node) };
                            }
                        }
                        for (node, canary) in held {
                            assert_eq!(unsafe { (node.as_ptr() as *const usize).read() }, canary);
                            unsafe { a.release(node) };
                        }
                    });
                }
            })
            .unwrap();
            a.flush();
            let total = a.config().total.load(Ordering::SeqCst);
            assert_eq!(a.free_count() + a.pending_count(), total);
        });
    }
}
