use atomic::Atomic;
use bytemuck::NoUninit;
use std::sync::atomic::Ordering;

/// What a full collection does with a region.
#[repr(u8)]
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    NoUninit,
    strum_macros::IntoStaticStr,
)]
pub enum RegionAttr {
    /// Free before the collection, or freed by it.
    Free,
    /// Not marked through. Its objects are all treated as live.
    SkipMarking,
    /// Marked, but the objects stay where they are.
    SkipCompacting,
    /// Marked, and the live objects slide to their new locations.
    Compacting,
}

/// The attribute of every region, indexed by region index.
pub struct RegionAttrTable {
    table: Box<[Atomic<RegionAttr>]>,
}

impl RegionAttrTable {
    pub fn new(num_regions: usize) -> Self {
        Self {
            table: (0..num_regions)
                .map(|_| Atomic::new(RegionAttr::Free))
                .collect(),
        }
    }

    pub fn get(&self, region: usize) -> RegionAttr {
        self.table[region].load(Ordering::Relaxed)
    }

    pub fn set(&self, region: usize, attr: RegionAttr) {
        self.table[region].store(attr, Ordering::Relaxed)
    }

    pub fn set_free(&self, region: usize) {
        self.set(region, RegionAttr::Free)
    }

    pub fn set_skip_marking(&self, region: usize) {
        self.set(region, RegionAttr::SkipMarking)
    }

    pub fn set_skip_compacting(&self, region: usize) {
        self.set(region, RegionAttr::SkipCompacting)
    }

    pub fn set_compacting(&self, region: usize) {
        self.set(region, RegionAttr::Compacting)
    }

    pub fn is_free(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::Free
    }

    pub fn is_skip_marking(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::SkipMarking
    }

    pub fn is_skip_compacting(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::SkipCompacting
    }

    pub fn is_compacting(&self, region: usize) -> bool {
        self.get(region) == RegionAttr::Compacting
    }

    /// Objects in these regions may be marked and may be pointed at by live objects.
    pub fn is_marked_through(&self, region: usize) -> bool {
        matches!(
            self.get(region),
            RegionAttr::SkipCompacting | RegionAttr::Compacting
        )
    }

    /// Change a region that was going to be compacted to stay in place.
    pub fn update_from_compacting_to_skip_compacting(&self, region: usize) {
        let attr = self.get(region);
        debug_assert!(self.is_compacting(region), "region {}: {:?}", region, attr);
        self.set_skip_compacting(region)
    }

    /// Change a region that was going to stay in place to be compacted.
    pub fn update_from_skip_compacting_to_compacting(&self, region: usize) {
        debug_assert!(
            self.is_skip_compacting(region),
            "region {} is {:?}",
            region,
            self.get(region)
        );
        self.set_compacting(region)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
