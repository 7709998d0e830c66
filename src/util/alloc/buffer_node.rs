use crate::util::alloc::free_list_allocator::{FreeListAllocator, FreeListConfig};
use crate::util::constants::BYTES_IN_WORD;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-capacity buffer of words with a small header. The words follow the header in
/// the same allocation.
#[repr(C)]
pub struct BufferNode {
    index: usize,
    capacity: usize,
    buffer: [usize; 0],
}

impl BufferNode {
    pub fn buffer_offset() -> usize {
        memoffset::offset_of!(BufferNode, buffer)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.index == 0
    }

    pub fn is_full(&self) -> bool {
        self.index == self.capacity
    }

    fn slot(&mut self, i: usize) -> *mut usize {
        debug_assert!(i < self.capacity);
        let base = self as *mut BufferNode as *mut u8;
        unsafe { base.add(Self::buffer_offset()).cast::<usize>().add(i) }
    }

    /// Append a word. Returns false if the buffer is full.
    pub fn push(&mut self, value: usize) -> bool {
        if self.is_full() {
            return false;
        }
        let i = self.index;
        unsafe { self.slot(i).write(value) };
        self.index += 1;
        true
    }

    pub fn pop(&mut self) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        self.index -= 1;
        let i = self.index;
        Some(unsafe { self.slot(i).read() })
    }
}

/// Allocates buffer nodes from the Rust heap, one allocation per node.
pub struct BufferArena {
    layout: Layout,
    live_nodes: AtomicUsize,
}

impl BufferArena {
    fn new(buffer_size: usize) -> Self {
        let bytes = FreeListAllocator::<BufferArena>::node_size(
            BufferNode::buffer_offset() + buffer_size * BYTES_IN_WORD,
        );
        Self {
            layout: Layout::from_size_align(bytes, std::mem::align_of::<BufferNode>())
                .unwrap_or_else(|_| panic!("bad buffer node size: {} words", buffer_size)),
            live_nodes: AtomicUsize::new(0),
        }
    }

    pub fn mem_size(&self) -> usize {
        self.live_nodes.load(Ordering::Relaxed) * self.layout.size()
    }

    pub fn wasted_mem_size(&self, unused_nodes: usize) -> usize {
        unused_nodes * self.layout.size()
    }
}

impl FreeListConfig for BufferArena {
    fn allocate(&self) -> NonNull<u8> {
        let ptr = unsafe { std::alloc::alloc(self.layout) };
        let Some(node) = NonNull::new(ptr) else {
            std::alloc::handle_alloc_error(self.layout)
        };
        self.live_nodes.fetch_add(1, Ordering::Relaxed);
        node
    }

    unsafe fn deallocate(&self, node: NonNull<u8>) {
        self.live_nodes.fetch_sub(1, Ordering::Relaxed);
        std::alloc::dealloc(node.as_ptr(), self.layout);
    }
}

/// Allocator of [`BufferNode`]s with `buffer_size` words each.
pub struct BufferNodeAllocator {
    buffer_size: usize,
    nodes: FreeListAllocator<BufferArena>,
}

impl BufferNodeAllocator {
    pub fn new(name: &str, buffer_size: usize) -> Self {
        Self {
            buffer_size,
            nodes: FreeListAllocator::new(name, BufferArena::new(buffer_size)),
        }
    }

    pub fn name(&self) -> &str {
        self.nodes.name()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// An empty node owned by the caller.
    pub fn allocate(&self) -> NonNull<BufferNode> {
        let node = self.nodes.allocate().cast::<BufferNode>();
        unsafe {
            node.as_ptr().write(BufferNode {
                index: 0,
                capacity: self.buffer_size,
                buffer: [],
            })
        };
        node
    }

    /// # Safety
    /// `node` must come from `allocate` on this allocator and must not be used afterwards.
    pub unsafe fn release(&self, node: NonNull<BufferNode>) {
        self.nodes.release(node.cast::<u8>())
    }

    pub fn free_count(&self) -> usize {
        self.nodes.free_count()
    }

    pub fn pending_count(&self) -> usize {
        self.nodes.pending_count()
    }

    pub fn reduce_free_list(&self, remove_goal: usize) -> usize {
        self.nodes.reduce_free_list(remove_goal)
    }

    pub fn flush(&self) {
        self.nodes.flush()
    }

    pub fn reset(&self) {
        self.nodes.reset()
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.nodes.mem_size() + self.nodes.config().mem_size()
    }

    pub fn wasted_mem_size(&self) -> usize {
        self.nodes
            .config()
            .wasted_mem_size(self.free_count() + self.pending_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop() {
        let allocator = BufferNodeAllocator::new("test buffers", 4);
        let node = allocator.allocate();
        let n = unsafe { &mut *node.as_ptr() };
        assert!(n.is_empty());
        for i in 0..4 {
            assert!(n.push(i * 10));
        }
        assert!(n.is_full());
        assert!(!n.push(99));
        assert_eq!(n.pop(), Some(30));
        assert_eq!(n.len(), 3);
        unsafe { allocator.release(node) };
        assert_eq!(allocator.pending_count(), 1);
    }

    #[test]
    fn reused_nodes_are_reinitialized() {
        let allocator = BufferNodeAllocator::new("test buffers", 2);
        let nodes: Vec<_> = (0..12).map(|_| allocator.allocate()).collect();
        for node in nodes.iter() {
            unsafe { (*node.as_ptr()).push(1) };
        }
        for node in nodes {
            unsafe { allocator.release(node) };
        }
        allocator.flush();
        assert!(allocator.free_count() > 0);
        let node = allocator.allocate();
        assert!(unsafe { node.as_ref() }.is_empty());
        assert_eq!(unsafe { node.as_ref() }.capacity(), 2);
        unsafe { allocator.release(node) };
        assert!(allocator.mem_size() > 0);
        let unused = allocator.free_count() + allocator.pending_count();
        let node_size = allocator.nodes.config().layout.size();
        assert_eq!(allocator.wasted_mem_size(), unused * node_size);
    }
}
