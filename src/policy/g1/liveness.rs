use crate::util::constants::{BITS_IN_WORD, BYTES_IN_PAGE, BYTES_IN_WORD, LOG_BITS_IN_WORD};
use crate::util::conversions::raw_align_up;
use crate::util::memory::{self, MmapAnnotation};
use crate::util::rust_util::lazy_init::{LazyInit, LazyInitState};
use crate::util::{Address, ObjectReference};
use std::sync::atomic::{AtomicUsize, Ordering};

/// One bit per heap word, telling whether a live object starts at that word.
///
/// The bits of each region live in their own slice of a range reserved up front. A slice is
/// committed the first time something in its region is marked. The state of each region
/// ([`LazyInit`]) gates every bit access: a region that was not marked this cycle reads as
/// all clear without touching its storage.
pub struct RegionLivenessMap {
    heap_start: Address,
    log_region_bytes: usize,
    num_regions: usize,
    storage: Address,
    /// Bytes of storage per region, rounded up to whole pages.
    bytes_per_region: usize,
    states: Box<[LazyInit]>,
    committed: AtomicUsize,
}

impl RegionLivenessMap {
    pub fn new(heap_start: Address, num_regions: usize, region_bytes: usize) -> Self {
        debug_assert!(region_bytes.is_power_of_two());
        let bits = region_bytes / BYTES_IN_WORD;
        let bytes_per_region = raw_align_up(bits / 8, BYTES_IN_PAGE);
        let total = bytes_per_region * num_regions;
        let storage = memory::reserve(total, &MmapAnnotation::SideBitmap { name: "liveness" })
            .unwrap_or_else(|e| memory::handle_mmap_error(e, heap_start, total));
        debug!(
            "Liveness map: {} regions, {} bytes reserved at {}",
            num_regions, total, storage
        );
        Self {
            heap_start,
            log_region_bytes: region_bytes.trailing_zeros() as usize,
            num_regions,
            storage,
            bytes_per_region,
            states: (0..num_regions).map(|_| LazyInit::new()).collect(),
            committed: AtomicUsize::new(0),
        }
    }

    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    fn region_bytes(&self) -> usize {
        1 << self.log_region_bytes
    }

    fn region_start(&self, region: usize) -> Address {
        self.heap_start + (region << self.log_region_bytes)
    }

    /// The region an address is in.
    pub fn region_index(&self, addr: Address) -> usize {
        debug_assert!(addr >= self.heap_start);
        let index = (addr - self.heap_start) >> self.log_region_bytes;
        debug_assert!(index < self.num_regions, "{} is not in the heap", addr);
        index
    }

    fn storage_of(&self, region: usize) -> Address {
        self.storage + region * self.bytes_per_region
    }

    /// The word holding the bit of `addr`, and the mask of that bit.
    #[inline(always)]
    fn bit(&self, region: usize, addr: Address) -> (&AtomicUsize, usize) {
        debug_assert!(addr.is_aligned_to(BYTES_IN_WORD));
        let bit_index = addr.words_from(self.region_start(region));
        let word = self.storage_of(region) + ((bit_index >> LOG_BITS_IN_WORD) * BYTES_IN_WORD);
        let mask = 1usize << (bit_index & (BITS_IN_WORD - 1));
        (unsafe { word.as_ref::<AtomicUsize>() }, mask)
    }

    fn words_of(&self, region: usize) -> usize {
        (self.region_bytes() / BYTES_IN_WORD) / BITS_IN_WORD
    }

    fn word_at(&self, region: usize, index: usize) -> &AtomicUsize {
        debug_assert!(index < self.words_of(region));
        unsafe { (self.storage_of(region) + index * BYTES_IN_WORD).as_ref::<AtomicUsize>() }
    }

    fn commit(&self, region: usize) {
        let start = self.storage_of(region);
        memory::commit(start, self.bytes_per_region)
            .unwrap_or_else(|e| memory::handle_mmap_error(e, start, self.bytes_per_region));
        // Anonymous pages come back zeroed on Linux, even after they were uncommitted.
        if !cfg!(target_os = "linux") {
            memory::zero(start, self.bytes_per_region);
        }
        self.committed.fetch_add(1, Ordering::Relaxed);
        trace!("Liveness map: committed region {}", region);
    }

    /// Make the storage of `region` usable and mark the region. Racing threads wait for the
    /// one that commits.
    fn prepare_to_mark(&self, region: usize) {
        let state = &self.states[region];
        if state.is_marked() {
            return;
        }
        state.ensure_initialized(|| self.commit(region));
        state.try_mark();
    }

    /// Set the bit of `addr`. Returns whether it was already set.
    pub fn mark(&self, addr: Address) -> bool {
        let region = self.region_index(addr);
        self.prepare_to_mark(region);
        let (word, mask) = self.bit(region, addr);
        word.fetch_or(mask, Ordering::Relaxed) & mask != 0
    }

    /// Set the bit of `addr`. Returns true only for the one thread that set it.
    pub fn par_mark(&self, addr: Address) -> bool {
        let region = self.region_index(addr);
        self.prepare_to_mark(region);
        let (word, mask) = self.bit(region, addr);
        if word.load(Ordering::Relaxed) & mask != 0 {
            return false;
        }
        word.fetch_or(mask, Ordering::Relaxed) & mask == 0
    }

    /// Whether anything in `region` was marked since it was last reset.
    pub fn is_region_marked(&self, region: usize) -> bool {
        self.states[region].is_marked()
    }

    pub fn is_marked(&self, addr: Address) -> bool {
        let region = self.region_index(addr);
        if !self.is_region_marked(region) {
            return false;
        }
        let (word, mask) = self.bit(region, addr);
        word.load(Ordering::Relaxed) & mask != 0
    }

    pub fn is_object_marked(&self, object: ObjectReference) -> bool {
        self.is_marked(object.to_raw_address())
    }

    /// Clear the bit of `addr`. Must not race with marking in the same region.
    pub fn clear(&self, addr: Address) {
        let region = self.region_index(addr);
        if !self.is_region_marked(region) {
            return;
        }
        let (word, mask) = self.bit(region, addr);
        word.fetch_and(!mask, Ordering::Relaxed);
    }

    /// Clear every bit of `region`. The region stays marked.
    pub fn clear_range(&self, region: usize) {
        if !self.states[region].is_initialized() {
            return;
        }
        let bytes = self.words_of(region) * BYTES_IN_WORD;
        memory::zero(self.storage_of(region), bytes);
    }

    /// Clear every bit of `region` and move it back from marked to initialized.
    pub fn reset(&self, region: usize) {
        let state = &self.states[region];
        if state.state() == LazyInitState::Marked {
            self.clear_range(region);
            state.reset_to_initialized();
        }
    }

    /// Reset every region.
    pub fn reset_all(&self) {
        for region in 0..self.num_regions {
            self.reset(region);
        }
    }

    /// Give the storage of an initialized region that holds no marks back to the OS.
    pub fn uncommit_region(&self, region: usize) {
        let state = &self.states[region];
        debug_assert_eq!(
            state.state(),
            LazyInitState::Initialized,
            "region {} must be initialized and unmarked",
            region
        );
        let start = self.storage_of(region);
        memory::uncommit(start, self.bytes_per_region)
            .unwrap_or_else(|e| memory::handle_mmap_error(e, start, self.bytes_per_region));
        state.reset_to_uninitialized();
        self.committed.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn num_committed_regions(&self) -> usize {
        self.committed.load(Ordering::Relaxed)
    }

    /// The lowest marked address in `[from, limit)`, or `limit` if there is none.
    pub fn next_marked_address(&self, from: Address, limit: Address) -> Address {
        let mut cursor = from;
        while cursor < limit {
            let region = self.region_index(cursor);
            let region_end = self.region_start(region) + self.region_bytes();
            let end = limit.min(region_end);
            if self.is_region_marked(region) {
                if let Some(found) = self.next_marked_in_region(region, cursor, end) {
                    return found;
                }
            }
            cursor = region_end;
        }
        limit
    }

    fn next_marked_in_region(&self, region: usize, from: Address, end: Address) -> Option<Address> {
        let base = self.region_start(region);
        let first_bit = from.words_from(base);
        let end_bit = end.words_from(base);
        let mut index = first_bit >> LOG_BITS_IN_WORD;
        let mut word = self.word_at(region, index).load(Ordering::Relaxed)
            & (usize::MAX << (first_bit & (BITS_IN_WORD - 1)));
        loop {
            if word != 0 {
                let bit = (index << LOG_BITS_IN_WORD) + word.trailing_zeros() as usize;
                return if bit < end_bit {
                    Some(base.add_words(bit))
                } else {
                    None
                };
            }
            index += 1;
            if index << LOG_BITS_IN_WORD >= end_bit {
                return None;
            }
            word = self.word_at(region, index).load(Ordering::Relaxed);
        }
    }

    /// Visit the marked objects of `region` below `limit` in address order. `f` returns the
    /// size of the object in words; the walk resumes after it.
    pub fn iterate(
        &self,
        region: usize,
        limit: Address,
        mut f: impl FnMut(ObjectReference) -> usize,
    ) {
        if !self.is_region_marked(region) {
            return;
        }
        let mut cursor = self.region_start(region);
        loop {
            cursor = self.next_marked_address(cursor, limit);
            if cursor >= limit {
                return;
            }
            let size = f(ObjectReference::from_raw_address(cursor));
            debug_assert!(size > 0);
            cursor = cursor.add_words(size);
        }
    }

    /// The number of set bits in `region`.
    pub fn count_marked(&self, region: usize) -> usize {
        if !self.is_region_marked(region) {
            return 0;
        }
        (0..self.words_of(region))
            .map(|i| self.word_at(region, i).load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.states.len() * std::mem::size_of::<LazyInit>()
            + self.num_committed_regions() * self.bytes_per_region
    }
}

impl Drop for RegionLivenessMap {
    fn drop(&mut self) {
        let total = self.bytes_per_region * self.num_regions;
        if let Err(e) = memory::release(self.storage, total) {
            warn!("Failed to release liveness map at {}: {}", self.storage, e);
        }
    }
}
