use super::bot::BlockOffsetTable;
use super::remset::HeapRegionRemSet;
use crate::util::alloc::card_set_memory::CardSetConfiguration;
use crate::util::{Address, ObjectReference};
use crate::vm::{ObjectModel, VMBinding};
use atomic::Atomic;
use bytemuck::NoUninit;
use delegate::delegate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The type of a region.
#[repr(u8)]
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    NoUninit,
    enum_map::Enum,
    strum_macros::IntoStaticStr,
    strum_macros::EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionType {
    Free,
    Eden,
    Survivor,
    Old,
    StartsHumongous,
    ContinuesHumongous,
    /// Archive regions whose objects may point into the rest of the heap.
    OpenArchive,
    /// Archive regions that only point into other closed archive regions. They are never
    /// marked through.
    ClosedArchive,
}

impl RegionType {
    pub fn is_free(self) -> bool {
        self == RegionType::Free
    }

    pub fn is_young(self) -> bool {
        matches!(self, RegionType::Eden | RegionType::Survivor)
    }

    pub fn is_old(self) -> bool {
        self == RegionType::Old
    }

    pub fn is_humongous(self) -> bool {
        matches!(
            self,
            RegionType::StartsHumongous | RegionType::ContinuesHumongous
        )
    }

    pub fn is_starts_humongous(self) -> bool {
        self == RegionType::StartsHumongous
    }

    pub fn is_continues_humongous(self) -> bool {
        self == RegionType::ContinuesHumongous
    }

    pub fn is_archive(self) -> bool {
        matches!(self, RegionType::OpenArchive | RegionType::ClosedArchive)
    }

    pub fn is_open_archive(self) -> bool {
        self == RegionType::OpenArchive
    }

    pub fn is_closed_archive(self) -> bool {
        self == RegionType::ClosedArchive
    }

    pub fn get_str(self) -> &'static str {
        self.into()
    }

    /// A two letter tag for region dumps.
    pub fn get_short_str(self) -> &'static str {
        match self {
            RegionType::Free => "F",
            RegionType::Eden => "E",
            RegionType::Survivor => "S",
            RegionType::Old => "O",
            RegionType::StartsHumongous => "HS",
            RegionType::ContinuesHumongous => "HC",
            RegionType::OpenArchive => "OA",
            RegionType::ClosedArchive => "CA",
        }
    }
}

const NO_HUMONGOUS_START: usize = usize::MAX;

/// A fixed-size slice of the heap, identified by its index. Regions never move; what is
/// in them and what they are used for changes.
pub struct HeapRegion {
    hrm_index: usize,
    bottom: Address,
    end: Address,
    top: Atomic<Address>,
    region_type: Atomic<RegionType>,
    /// Index of the starts-humongous region of the object this region belongs to.
    humongous_start: AtomicUsize,
    pinned_count: AtomicUsize,
    /// Bytes found live by the last marking.
    marked_bytes: AtomicUsize,
    rem_set: HeapRegionRemSet,
    bot: BlockOffsetTable,
}

impl HeapRegion {
    pub fn new(
        hrm_index: usize,
        bottom: Address,
        bytes: usize,
        card_set_config: Arc<CardSetConfiguration>,
    ) -> Self {
        let end = bottom + bytes;
        Self {
            hrm_index,
            bottom,
            end,
            top: Atomic::new(bottom),
            region_type: Atomic::new(RegionType::Free),
            humongous_start: AtomicUsize::new(NO_HUMONGOUS_START),
            pinned_count: AtomicUsize::new(0),
            marked_bytes: AtomicUsize::new(0),
            rem_set: HeapRegionRemSet::new(card_set_config),
            bot: BlockOffsetTable::new(bottom, end),
        }
    }

    pub fn hrm_index(&self) -> usize {
        self.hrm_index
    }

    pub fn bottom(&self) -> Address {
        self.bottom
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn top(&self) -> Address {
        self.top.load(Ordering::Acquire)
    }

    pub fn set_top(&self, top: Address) {
        debug_assert!(
            top >= self.bottom && top <= self.end,
            "region {}: top {} outside [{}, {}]",
            self.hrm_index,
            top,
            self.bottom,
            self.end
        );
        self.top.store(top, Ordering::Release)
    }

    pub fn capacity(&self) -> usize {
        self.end - self.bottom
    }

    pub fn used(&self) -> usize {
        self.top() - self.bottom
    }

    pub fn free(&self) -> usize {
        self.end - self.top()
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.bottom && addr < self.end
    }

    pub fn region_type(&self) -> RegionType {
        self.region_type.load(Ordering::Acquire)
    }

    fn set_type(&self, t: RegionType) {
        trace!(
            "Region {}: {} -> {}",
            self.hrm_index,
            self.region_type().get_str(),
            t.get_str()
        );
        self.region_type.store(t, Ordering::Release)
    }

    pub fn get_type_str(&self) -> &'static str {
        self.region_type().get_str()
    }

    pub fn get_short_type_str(&self) -> &'static str {
        self.region_type().get_short_str()
    }

    pub fn is_free(&self) -> bool {
        self.region_type().is_free()
    }

    pub fn is_young(&self) -> bool {
        self.region_type().is_young()
    }

    pub fn is_old(&self) -> bool {
        self.region_type().is_old()
    }

    pub fn is_humongous(&self) -> bool {
        self.region_type().is_humongous()
    }

    pub fn is_starts_humongous(&self) -> bool {
        self.region_type().is_starts_humongous()
    }

    pub fn is_continues_humongous(&self) -> bool {
        self.region_type().is_continues_humongous()
    }

    pub fn is_archive(&self) -> bool {
        self.region_type().is_archive()
    }

    pub fn is_open_archive(&self) -> bool {
        self.region_type().is_open_archive()
    }

    pub fn is_closed_archive(&self) -> bool {
        self.region_type().is_closed_archive()
    }

    /// Archive regions are always pinned. Other regions are pinned while someone holds a pin.
    pub fn is_pinned(&self) -> bool {
        self.is_archive() || self.pinned_count.load(Ordering::Acquire) > 0
    }

    pub fn increment_pinned_object_count(&self) {
        self.pinned_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement_pinned_object_count(&self) {
        let old = self.pinned_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "region {} was not pinned", self.hrm_index);
    }

    /// The starts-humongous region of a humongous region.
    pub fn humongous_start_region(&self) -> Option<usize> {
        match self.humongous_start.load(Ordering::Acquire) {
            NO_HUMONGOUS_START => None,
            i => Some(i),
        }
    }

    pub fn set_eden(&self) {
        debug_assert!(self.is_free());
        self.set_type(RegionType::Eden);
    }

    pub fn set_survivor(&self) {
        debug_assert!(self.is_free() || self.is_eden());
        self.set_type(RegionType::Survivor);
    }

    fn is_eden(&self) -> bool {
        self.region_type() == RegionType::Eden
    }

    pub fn set_old(&self) {
        self.set_type(RegionType::Old);
    }

    pub fn set_open_archive(&self) {
        debug_assert!(self.is_free());
        self.set_type(RegionType::OpenArchive);
    }

    pub fn set_closed_archive(&self) {
        debug_assert!(self.is_free());
        self.set_type(RegionType::ClosedArchive);
    }

    /// Make this the first region of a humongous object whose end is `obj_top`. The block
    /// offset table records the object, and the filler after it if `fill_size` is not zero.
    pub fn set_starts_humongous(&self, obj_top: Address, fill_size: usize) {
        debug_assert!(self.is_free() && self.is_empty());
        self.set_type(RegionType::StartsHumongous);
        self.set_humongous_start(self.hrm_index);
        self.bot.update_for_block(self.bottom, obj_top);
        if fill_size > 0 {
            let fill_end = obj_top.add_words(fill_size);
            self.bot.update_for_block(obj_top, fill_end);
        }
    }

    /// Make this a follow-up region of the humongous object that starts in `first`.
    pub fn set_continues_humongous(&self, first: &HeapRegion) {
        debug_assert!(first.is_starts_humongous());
        debug_assert!(self.is_free() && self.is_empty());
        self.set_type(RegionType::ContinuesHumongous);
        self.set_humongous_start(first.hrm_index);
    }

    /// Make an in-use region free again.
    pub fn set_free(&self) {
        self.set_type(RegionType::Free);
        self.set_humongous_start(NO_HUMONGOUS_START);
    }

    fn set_humongous_start(&self, index: usize) {
        self.humongous_start.store(index, Ordering::Release)
    }

    /// Reset everything a free region must not remember: its top, liveness statistics,
    /// remembered set and block offset table.
    pub fn hr_clear(&self) {
        self.set_free();
        self.set_top(self.bottom);
        self.marked_bytes.store(0, Ordering::Relaxed);
        self.rem_set.clear(false);
        self.bot.reset();
    }

    /// Bump-allocate `words` words. Returns `None` if the region is too full.
    pub fn allocate(&self, words: usize) -> Option<Address> {
        let mut old = self.top();
        loop {
            let new = old.add_words(words);
            if new > self.end {
                return None;
            }
            match self
                .top
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.bot.update_for_block(old, new);
                    return Some(old);
                }
                Err(current) => old = current,
            }
        }
    }

    pub fn marked_bytes(&self) -> usize {
        self.marked_bytes.load(Ordering::Relaxed)
    }

    pub fn set_marked_bytes(&self, bytes: usize) {
        self.marked_bytes.store(bytes, Ordering::Relaxed)
    }

    pub fn live_bytes(&self) -> usize {
        self.marked_bytes()
    }

    /// Bytes an evacuation of this region would give back.
    pub fn reclaimable_bytes(&self) -> usize {
        self.used().saturating_sub(self.live_bytes())
    }

    /// Reclaimable bytes per predicted millisecond of evacuating this region on its own.
    pub fn calc_gc_efficiency(&self, policy: &dyn super::policy::G1Policy) -> f64 {
        let time_ms = policy.predict_region_copy_time_ms(self)
            + policy.predict_region_code_root_scan_time(self)
            + policy.predict_merge_scan_time(self.rem_set.occupied())
            + policy.predict_non_young_other_time_ms(1);
        self.reclaimable_bytes() as f64 / time_ms
    }

    pub fn rem_set(&self) -> &HeapRegionRemSet {
        &self.rem_set
    }

    pub fn bot(&self) -> &BlockOffsetTable {
        &self.bot
    }

    delegate! {
        to self.rem_set {
            #[call(install_group_cardset)]
            pub fn install_group_cardset(&self, card_set: Arc<super::card_set::CardSet>);
            #[call(uninstall_group_cardset)]
            pub fn uninstall_group_cardset(&self);
        }
        to self.bot {
            #[call(update_for_block)]
            pub fn update_bot_for_block(&self, start: Address, end: Address);
            #[call(reset)]
            pub fn reset_bot(&self);
        }
    }

    /// The start of the object covering `addr`.
    pub fn block_start<VM: VMBinding>(&self, addr: Address) -> Address {
        debug_assert!(addr < self.top(), "{} is above the top of the region", addr);
        self.bot.block_start::<VM>(addr)
    }

    /// After a full GC moved objects into this region: `top` is the end of the last object
    /// moved in, the region is old, or free if nothing was moved in.
    pub fn reset_compacted_after_full_gc(&self, new_top: Address) {
        debug_assert!(!self.is_pinned());
        self.set_top(new_top);
        self.marked_bytes.store(0, Ordering::Relaxed);
        if new_top == self.bottom {
            self.hr_clear();
        } else {
            self.set_old();
        }
    }

    /// After a full GC left this region in place: young regions become old, everything else
    /// keeps its type.
    pub fn reset_skip_compacting_after_full_gc(&self) {
        debug_assert!(!self.is_free());
        self.marked_bytes.store(0, Ordering::Relaxed);
        if self.is_young() {
            self.set_old();
        }
    }

    /// Walk the objects in `[bottom, top)`, calling `f` on each.
    pub fn object_iterate<VM: VMBinding>(&self, mut f: impl FnMut(ObjectReference)) {
        let top = self.top();
        let mut cursor = self.bottom;
        while cursor < top {
            let object = ObjectReference::from_raw_address(cursor);
            f(object);
            cursor = cursor.add_words(VM::VMObjectModel::size_in_words(object));
        }
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HeapRegion({}, {} [{}, {}, {}), pinned={})",
            self.hrm_index,
            self.get_short_type_str(),
            self.bottom,
            self.top(),
            self.end,
            self.is_pinned()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::g1::card_set::CardSet;
    use crate::policy::g1::policy::ProfileCostPolicy;
    use crate::util::options::Options;
    use crate::util::test_util::mock_vm::TestHeapMemory;

    fn region(bytes: usize, mem: &TestHeapMemory) -> HeapRegion {
        let config = Arc::new(CardSet::configuration(&Options::default()));
        HeapRegion::new(3, mem.start(), bytes, config)
    }

    #[test]
    fn bump_allocation() {
        let mem = TestHeapMemory::new(1 << 16);
        let r = region(1 << 16, &mem);
        assert!(r.is_free() && r.is_empty());
        let a = r.allocate(4).unwrap();
        let b = r.allocate(4).unwrap();
        assert_eq!(a, r.bottom());
        assert_eq!(b, a.add_words(4));
        assert_eq!(r.used(), 64);
        assert!(r.allocate(1 << 16).is_none());
        assert_eq!(r.bot().entry(r.bottom()), r.bottom());
    }

    #[test]
    fn types_and_pinning() {
        let mem = TestHeapMemory::new(1 << 16);
        let r = region(1 << 16, &mem);
        r.set_eden();
        assert!(r.is_young());
        assert_eq!(r.get_type_str(), "EDEN");
        r.increment_pinned_object_count();
        assert!(r.is_pinned());
        r.decrement_pinned_object_count();
        assert!(!r.is_pinned());
        r.allocate(8);
        r.reset_skip_compacting_after_full_gc();
        assert!(r.is_old());
        r.reset_compacted_after_full_gc(r.bottom());
        assert!(r.is_free() && r.is_empty());
        assert_eq!(r.humongous_start_region(), None);
    }

    #[test]
    fn efficiency_uses_reclaimable_bytes() {
        let mem = TestHeapMemory::new(1 << 16);
        let r = region(1 << 16, &mem);
        r.set_old();
        r.set_top(r.bottom() + 4096usize);
        r.set_marked_bytes(1024);
        assert_eq!(r.reclaimable_bytes(), 3072);
        let policy = ProfileCostPolicy::default();
        let eff = r.calc_gc_efficiency(&policy);
        assert!(eff > 0.0);
        r.set_marked_bytes(4096);
        assert_eq!(r.calc_gc_efficiency(&policy), 0.0);
    }
}
