use crate::util::alloc::free_list_allocator::FreeListConfig;
use crate::util::conversions::raw_align_up;
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Sizing of the segments of a [`SegmentedArena`].
#[derive(Copy, Clone, Debug)]
pub struct CardSetAllocOptions {
    slot_size: usize,
    initial_num_slots: usize,
    max_num_slots: usize,
}

impl CardSetAllocOptions {
    pub const SLOT_ALIGNMENT: usize = 8;

    pub fn new(slot_size: usize, initial_num_slots: usize, max_num_slots: usize) -> Self {
        debug_assert!(initial_num_slots > 0 && initial_num_slots <= max_num_slots);
        Self {
            slot_size: raw_align_up(slot_size, Self::SLOT_ALIGNMENT),
            initial_num_slots,
            max_num_slots,
        }
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn initial_num_slots(&self) -> usize {
        self.initial_num_slots
    }

    /// Exponential growth between the initial and the maximum number of slots.
    pub fn next_num_slots(&self, prev_num_slots: usize) -> usize {
        prev_num_slots
            .saturating_mul(2)
            .clamp(self.initial_num_slots, self.max_num_slots)
    }
}

struct Segment {
    start: NonNull<u8>,
    num_slots: usize,
    /// Index of the next slot to hand out. May run past `num_slots` when racing bumps fail.
    next_slot: AtomicUsize,
}

impl Segment {
    fn layout(num_slots: usize, slot_size: usize) -> Layout {
        // Slot sizes are small and slot counts are clamped, so this never overflows.
        Layout::from_size_align(num_slots * slot_size, CardSetAllocOptions::SLOT_ALIGNMENT)
            .unwrap_or_else(|_| panic!("bad segment layout: {} x {}", num_slots, slot_size))
    }

    fn new(num_slots: usize, slot_size: usize) -> Box<Segment> {
        let layout = Self::layout(num_slots, slot_size);
        let ptr = unsafe { std::alloc::alloc(layout) };
        let Some(start) = NonNull::new(ptr) else {
            // A collector cannot collect to satisfy its own bookkeeping.
            std::alloc::handle_alloc_error(layout)
        };
        Box::new(Segment {
            start,
            num_slots,
            next_slot: AtomicUsize::new(0),
        })
    }

    fn try_allocate(&self, slot_size: usize) -> Option<NonNull<u8>> {
        if self.next_slot.load(Ordering::Relaxed) >= self.num_slots {
            return None;
        }
        let index = self.next_slot.fetch_add(1, Ordering::AcqRel);
        if index >= self.num_slots {
            return None;
        }
        Some(unsafe { NonNull::new_unchecked(self.start.as_ptr().add(index * slot_size)) })
    }

    fn used_slots(&self) -> usize {
        self.next_slot.load(Ordering::Relaxed).min(self.num_slots)
    }
}

/// An arena of fixed-size slots carved from segments that grow exponentially. Slots are only
/// returned to the system all at once, by [`SegmentedArena::drop_all`].
pub struct SegmentedArena {
    options: CardSetAllocOptions,
    current: AtomicPtr<Segment>,
    segments: spin::Mutex<Vec<Box<Segment>>>,
}

unsafe impl Send for SegmentedArena {}
unsafe impl Sync for SegmentedArena {}

impl SegmentedArena {
    pub fn new(options: CardSetAllocOptions) -> Self {
        Self {
            options,
            current: AtomicPtr::new(std::ptr::null_mut()),
            segments: spin::Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &CardSetAllocOptions {
        &self.options
    }

    pub fn slot_size(&self) -> usize {
        self.options.slot_size
    }

    pub fn num_segments(&self) -> usize {
        self.segments.lock().len()
    }

    pub fn allocate_slot(&self) -> NonNull<u8> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if !current.is_null() {
                if let Some(slot) = unsafe { &*current }.try_allocate(self.options.slot_size) {
                    return slot;
                }
            }
            let mut segments = self.segments.lock();
            // Somebody else may have grown the arena while we waited.
            if self.current.load(Ordering::Acquire) != current {
                continue;
            }
            let prev_num_slots = segments.last().map_or(0, |s| s.num_slots);
            let num_slots = self.options.next_num_slots(prev_num_slots);
            let segment = Segment::new(num_slots, self.options.slot_size);
            let ptr = &*segment as *const Segment as *mut Segment;
            segments.push(segment);
            trace!(
                "Arena segment #{}: {} slots of {} bytes",
                segments.len(),
                num_slots,
                self.options.slot_size
            );
            self.current.store(ptr, Ordering::Release);
        }
    }

    /// Bytes held in segments.
    pub fn mem_size(&self) -> usize {
        self.segments
            .lock()
            .iter()
            .map(|s| std::mem::size_of::<Segment>() + s.num_slots * self.options.slot_size)
            .sum()
    }

    /// Bytes of slots never handed out, plus `unused_slots` slots that were handed out and
    /// came back.
    pub fn wasted_mem_size(&self, unused_slots: usize) -> usize {
        let current = self.current.load(Ordering::Acquire);
        let never_used = if current.is_null() {
            0
        } else {
            let segment = unsafe { &*current };
            segment.num_slots - segment.used_slots()
        };
        (never_used + unused_slots) * self.options.slot_size
    }

    /// Free every segment. Every slot handed out becomes invalid, so this may only be called
    /// when nothing refers to any slot.
    pub fn drop_all(&self) {
        let mut segments = self.segments.lock();
        self.current.store(std::ptr::null_mut(), Ordering::Release);
        for segment in segments.drain(..) {
            unsafe {
                std::alloc::dealloc(
                    segment.start.as_ptr(),
                    Segment::layout(segment.num_slots, self.options.slot_size),
                )
            };
        }
    }
}

impl FreeListConfig for SegmentedArena {
    fn allocate(&self) -> NonNull<u8> {
        self.allocate_slot()
    }

    unsafe fn deallocate(&self, _node: NonNull<u8>) {
        // Slots go back together with their segment.
    }
}

impl Drop for SegmentedArena {
    fn drop(&mut self) {
        self.drop_all();
    }
}
