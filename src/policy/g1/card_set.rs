use crate::util::alloc::card_set_memory::{
    CardSetConfiguration, CardSetContainerType, CardSetMemoryManager, MemoryStats,
};
use crate::util::constants::{BITS_IN_BYTE, LOG_BYTES_IN_CARD};
use crate::util::options::Options;
use crate::util::Address;
use enum_map::enum_map;
use std::collections::BTreeMap;
use std::ops::Range;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cards held by an array container before it is turned into a bitmap.
const ARRAY_CAPACITY: usize = 15;

#[repr(C)]
struct CardArray {
    len: u32,
    cards: [u32; ARRAY_CAPACITY],
}

/// The cards of one source region.
enum Container {
    Array(NonNull<CardArray>),
    BitMap(NonNull<u64>),
}

/// The card index of an address.
pub fn card_of(addr: Address) -> usize {
    addr >> LOG_BYTES_IN_CARD as usize
}

/// A set of cards, grouped by the region they are in. Each region with at least one card
/// in the set has a container: a short array of card offsets that is replaced by a bitmap
/// when it overflows. Containers live in slots of the card set's own memory manager.
pub struct CardSet {
    config: Arc<CardSetConfiguration>,
    mm: CardSetMemoryManager,
    containers: spin::Mutex<BTreeMap<usize, Container>>,
    occupied: AtomicUsize,
    /// Source regions to visit in the current parallel scan, and the next one to claim.
    scan_regions: spin::RwLock<Vec<usize>>,
    scan_cursor: AtomicUsize,
}

unsafe impl Send for CardSet {}
unsafe impl Sync for CardSet {}

impl CardSet {
    /// The slot configuration of card sets in a heap with the given options.
    pub fn configuration(options: &Options) -> CardSetConfiguration {
        let cards_per_region = options.region_size >> LOG_BYTES_IN_CARD;
        let bitmap_bytes = (cards_per_region / BITS_IN_BYTE).max(std::mem::size_of::<u64>());
        CardSetConfiguration::new(
            options,
            enum_map! {
                CardSetContainerType::ArrayOfCards => std::mem::size_of::<CardArray>(),
                CardSetContainerType::BitMap => bitmap_bytes,
            },
        )
    }

    pub fn new(config: Arc<CardSetConfiguration>) -> Self {
        let mm = CardSetMemoryManager::new(&config);
        Self {
            config,
            mm,
            containers: spin::Mutex::new(BTreeMap::new()),
            occupied: AtomicUsize::new(0),
            scan_regions: spin::RwLock::new(vec![]),
            scan_cursor: AtomicUsize::new(0),
        }
    }

    fn bitmap_words(&self) -> usize {
        (self.config.cards_per_region() / 64).max(1)
    }

    fn split(&self, card: usize) -> (usize, u32) {
        let log = self.config.log_cards_per_region();
        (card >> log, (card & ((1 << log) - 1)) as u32)
    }

    fn new_array(&self) -> Container {
        let slot = self
            .mm
            .allocate(CardSetContainerType::ArrayOfCards)
            .cast::<CardArray>();
        unsafe {
            slot.as_ptr().write(CardArray {
                len: 0,
                cards: [0; ARRAY_CAPACITY],
            })
        };
        Container::Array(slot)
    }

    fn new_bitmap(&self) -> NonNull<u64> {
        let slot = self.mm.allocate(CardSetContainerType::BitMap).cast::<u64>();
        unsafe { std::ptr::write_bytes(slot.as_ptr(), 0, self.bitmap_words()) };
        slot
    }

    fn bitmap<'a>(&self, words: NonNull<u64>) -> &'a mut [u64] {
        unsafe { std::slice::from_raw_parts_mut(words.as_ptr(), self.bitmap_words()) }
    }

    unsafe fn free_container(&self, container: Container) {
        match container {
            Container::Array(a) => self
                .mm
                .free(CardSetContainerType::ArrayOfCards, a.cast::<u8>()),
            Container::BitMap(b) => self.mm.free(CardSetContainerType::BitMap, b.cast::<u8>()),
        }
    }

    /// Add `card` to `container`. Returns false if it was already there.
    fn add_to_container(&self, container: &mut Container, offset: u32) -> bool {
        match *container {
            Container::Array(array) => {
                let a = unsafe { &mut *array.as_ptr() };
                let len = a.len as usize;
                if a.cards[..len].contains(&offset) {
                    return false;
                }
                if len < ARRAY_CAPACITY {
                    a.cards[len] = offset;
                    a.len += 1;
                    return true;
                }
                let words = self.new_bitmap();
                let bits = self.bitmap(words);
                for &c in a.cards.iter() {
                    bits[c as usize / 64] |= 1 << (c % 64);
                }
                bits[offset as usize / 64] |= 1 << (offset % 64);
                trace!("Card set container overflow: array -> bitmap");
                let array = std::mem::replace(container, Container::BitMap(words));
                unsafe { self.free_container(array) };
                true
            }
            Container::BitMap(words) => {
                let bits = self.bitmap(words);
                let mask = 1u64 << (offset % 64);
                let word = &mut bits[offset as usize / 64];
                let added = *word & mask == 0;
                *word |= mask;
                added
            }
        }
    }

    fn container_contains(&self, container: &Container, offset: u32) -> bool {
        match *container {
            Container::Array(array) => {
                let a = unsafe { array.as_ref() };
                a.cards[..a.len as usize].contains(&offset)
            }
            Container::BitMap(words) => {
                self.bitmap(words)[offset as usize / 64] & (1 << (offset % 64)) != 0
            }
        }
    }

    fn container_iterate(&self, container: &Container, base: usize, f: &mut impl FnMut(usize)) {
        match *container {
            Container::Array(array) => {
                let a = unsafe { array.as_ref() };
                for &c in a.cards[..a.len as usize].iter() {
                    f(base + c as usize);
                }
            }
            Container::BitMap(words) => {
                for (i, &word) in self.bitmap(words).iter().enumerate() {
                    let mut w = word;
                    while w != 0 {
                        let bit = w.trailing_zeros() as usize;
                        f(base + i * 64 + bit);
                        w &= w - 1;
                    }
                }
            }
        }
    }

    /// Add a card. Returns true if the card was not in the set before.
    pub fn add_card(&self, card: usize) -> bool {
        let (region, offset) = self.split(card);
        let mut containers = self.containers.lock();
        let container = containers.entry(region).or_insert_with(|| self.new_array());
        let added = self.add_to_container(container, offset);
        if added {
            self.occupied.fetch_add(1, Ordering::Relaxed);
        }
        added
    }

    pub fn contains_card(&self, card: usize) -> bool {
        let (region, offset) = self.split(card);
        self.containers
            .lock()
            .get(&region)
            .map_or(false, |c| self.container_contains(c, offset))
    }

    /// The number of cards in the set.
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// The number of regions with cards in the set.
    pub fn num_containers(&self) -> usize {
        self.containers.lock().len()
    }

    /// Visit every card, region by region in ascending order.
    pub fn iterate_cards(&self, mut f: impl FnMut(usize)) {
        let log = self.config.log_cards_per_region();
        let containers = self.containers.lock();
        for (&region, container) in containers.iter() {
            self.container_iterate(container, region << log, &mut f);
        }
    }

    /// Drop every card and give the container memory back.
    pub fn clear(&self) {
        let mut containers = self.containers.lock();
        for (_, container) in std::mem::take(&mut *containers) {
            unsafe { self.free_container(container) };
        }
        self.occupied.store(0, Ordering::Relaxed);
        self.mm.flush();
    }

    /// Start a new parallel scan over the containers present now.
    pub fn reset_table_scanner(&self) {
        let regions: Vec<usize> = self.containers.lock().keys().copied().collect();
        *self.scan_regions.write() = regions;
        self.scan_cursor.store(0, Ordering::Relaxed);
    }

    /// Claim up to `step` containers of the current scan. Returns `None` once every container
    /// has been claimed.
    pub fn claim_containers(&self, step: usize) -> Option<Range<usize>> {
        let total = self.scan_regions.read().len();
        let start = self.scan_cursor.fetch_add(step, Ordering::Relaxed);
        if start >= total {
            None
        } else {
            Some(start..(start + step).min(total))
        }
    }

    /// Visit the cards of the containers claimed with `claim_containers`.
    pub fn iterate_cards_in(&self, claimed: Range<usize>, mut f: impl FnMut(usize)) {
        let log = self.config.log_cards_per_region();
        let regions = self.scan_regions.read();
        let containers = self.containers.lock();
        for &region in regions[claimed].iter() {
            if let Some(container) = containers.get(&region) {
                self.container_iterate(container, region << log, &mut f);
            }
        }
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.mm.mem_size()
    }

    pub fn wasted_mem_size(&self) -> usize {
        self.mm.wasted_mem_size()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.mm.memory_stats()
    }
}

impl Drop for CardSet {
    fn drop(&mut self) {
        self.clear();
    }
}
