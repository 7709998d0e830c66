use crate::util::alloc::free_list_allocator::FreeListAllocator;
use crate::util::alloc::segmented_arena::{CardSetAllocOptions, SegmentedArena};
use crate::util::constants::LOG_BYTES_IN_CARD;
use crate::util::options::Options;
use enum_map::{enum_map, Enum, EnumMap};
use std::ptr::NonNull;

/// The kinds of card set containers. Each kind has its own slot size and allocator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, strum_macros::IntoStaticStr)]
pub enum CardSetContainerType {
    ArrayOfCards,
    BitMap,
}

/// Slot sizes and segment sizing for every container type.
#[derive(Clone, Debug)]
pub struct CardSetConfiguration {
    alloc_options: EnumMap<CardSetContainerType, CardSetAllocOptions>,
    transfer_threshold: usize,
    log_cards_per_region: usize,
}

impl CardSetConfiguration {
    /// `payload_bytes` is the size of a container of each type as seen by the card set.
    pub fn new(options: &Options, payload_bytes: EnumMap<CardSetContainerType, usize>) -> Self {
        Self {
            alloc_options: EnumMap::from_fn(|t| {
                let initial = options.card_set_initial_slots;
                CardSetAllocOptions::new(
                    FreeListAllocator::<SegmentedArena>::node_size(payload_bytes[t]),
                    initial,
                    options.card_set_max_slots.max(initial),
                )
            }),
            transfer_threshold: options.free_list_transfer_threshold,
            log_cards_per_region: options.region_size.trailing_zeros() as usize
                - LOG_BYTES_IN_CARD as usize,
        }
    }

    pub fn log_cards_per_region(&self) -> usize {
        self.log_cards_per_region
    }

    pub fn cards_per_region(&self) -> usize {
        1 << self.log_cards_per_region
    }

    pub fn alloc_options(&self, t: CardSetContainerType) -> &CardSetAllocOptions {
        &self.alloc_options[t]
    }
}

/// Memory use of one or more card set memory managers, per container type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub num_mem_sizes: EnumMap<CardSetContainerType, usize>,
    pub num_segments: EnumMap<CardSetContainerType, usize>,
}

impl MemoryStats {
    pub fn add(&mut self, other: &MemoryStats) {
        for (t, v) in other.num_mem_sizes.iter() {
            self.num_mem_sizes[t] += v;
        }
        for (t, v) in other.num_segments.iter() {
            self.num_segments[t] += v;
        }
    }

    pub fn clear(&mut self) {
        *self = MemoryStats::default();
    }
}

/// Slot allocator for one container type: a free list over a segmented arena.
pub struct CardSetAllocator {
    free_slots: FreeListAllocator<SegmentedArena>,
}

impl CardSetAllocator {
    pub fn new(name: &str, options: CardSetAllocOptions, transfer_threshold: usize) -> Self {
        Self {
            free_slots: FreeListAllocator::with_transfer_threshold(
                name,
                SegmentedArena::new(options),
                transfer_threshold,
            ),
        }
    }

    fn arena(&self) -> &SegmentedArena {
        self.free_slots.config()
    }

    pub fn allocate(&self) -> NonNull<u8> {
        self.free_slots.allocate()
    }

    /// # Safety
    /// `slot` must come from `allocate` of this allocator and must not be used afterwards.
    pub unsafe fn free(&self, slot: NonNull<u8>) {
        self.free_slots.release(slot)
    }

    /// Return every segment to the system. Must be called when no slot is in use.
    pub fn drop_all(&self) {
        self.free_slots.reset();
        self.arena().drop_all();
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.free_slots.mem_size() + self.arena().mem_size()
    }

    /// Bytes held in arena segments, without allocator bookkeeping.
    pub fn segment_mem_size(&self) -> usize {
        self.arena().mem_size()
    }

    pub fn wasted_mem_size(&self) -> usize {
        let unused = self.free_slots.free_count() + self.free_slots.pending_count();
        self.arena().wasted_mem_size(unused)
    }

    pub fn num_segments(&self) -> usize {
        self.arena().num_segments()
    }

    pub fn free_count(&self) -> usize {
        self.free_slots.free_count()
    }

    pub fn pending_count(&self) -> usize {
        self.free_slots.pending_count()
    }
}

/// One [`CardSetAllocator`] per container type. Every card set, and every collection group
/// card set, has its own manager.
pub struct CardSetMemoryManager {
    allocators: EnumMap<CardSetContainerType, CardSetAllocator>,
}

impl CardSetMemoryManager {
    pub fn new(config: &CardSetConfiguration) -> Self {
        let transfer_threshold = config.transfer_threshold;
        Self {
            allocators: enum_map! {
                t => CardSetAllocator::new(
                    <&'static str>::from(t),
                    *config.alloc_options(t),
                    transfer_threshold,
                ),
            },
        }
    }

    pub fn allocate(&self, t: CardSetContainerType) -> NonNull<u8> {
        self.allocators[t].allocate()
    }

    /// # Safety
    /// `slot` must come from `allocate(t)` on this manager and must not be used afterwards.
    pub unsafe fn free(&self, t: CardSetContainerType, slot: NonNull<u8>) {
        self.allocators[t].free(slot)
    }

    /// Drop every container of every type. Must be called when no container is in use.
    pub fn flush(&self) {
        for (_, allocator) in self.allocators.iter() {
            allocator.drop_all();
        }
    }

    pub fn mem_size(&self) -> usize {
        self.allocators.values().map(|a| a.mem_size()).sum()
    }

    pub fn wasted_mem_size(&self) -> usize {
        self.allocators.values().map(|a| a.wasted_mem_size()).sum()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let mut result = MemoryStats::default();
        for (t, allocator) in self.allocators.iter() {
            result.num_mem_sizes[t] += allocator.segment_mem_size();
            result.num_segments[t] += allocator.num_segments();
        }
        result
    }

    pub fn allocator(&self, t: CardSetContainerType) -> &CardSetAllocator {
        &self.allocators[t]
    }
}
