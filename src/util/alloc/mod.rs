//! Allocators for collector metadata: node free lists, buffer nodes and card set slots.

pub mod buffer_node;
pub mod card_set_memory;
pub mod free_list_allocator;
pub mod segmented_arena;

pub use self::buffer_node::{BufferNode, BufferNodeAllocator};
pub use self::card_set_memory::{CardSetContainerType, CardSetMemoryManager, MemoryStats};
pub use self::free_list_allocator::{FreeListAllocator, FreeListConfig};
pub use self::segmented_arena::{CardSetAllocOptions, SegmentedArena};
