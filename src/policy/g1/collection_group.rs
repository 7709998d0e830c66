use super::card_set::CardSet;
use super::policy::G1Policy;
use super::region::HeapRegion;
use crate::util::alloc::card_set_memory::{CardSetConfiguration, MemoryStats};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// A candidate region and how worthwhile collecting it is.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CandidateInfo {
    pub region: usize,
    pub gc_efficiency: f64,
    /// Collections this region was skipped in because it was pinned.
    pub num_unreclaimed: usize,
}

impl CandidateInfo {
    pub fn new(region: usize, gc_efficiency: f64) -> Self {
        Self {
            region,
            gc_efficiency,
            num_unreclaimed: 0,
        }
    }

    /// Count one more collection that skipped this region. Returns whether the region may
    /// stay a candidate.
    pub fn update_num_unreclaimed(&mut self, num_collections_keep_pinned: usize) -> bool {
        self.num_unreclaimed += 1;
        self.num_unreclaimed < num_collections_keep_pinned
    }

    /// Descending efficiency.
    pub fn compare_gc_efficiency(a: &CandidateInfo, b: &CandidateInfo) -> Ordering {
        b.gc_efficiency
            .partial_cmp(&a.gc_efficiency)
            .unwrap_or(Ordering::Equal)
    }

    /// Descending reclaimable bytes. Entries without a region go last.
    pub fn compare_reclaimable_bytes(
        regions: &[HeapRegion],
        a: Option<&CandidateInfo>,
        b: Option<&CandidateInfo>,
    ) -> Ordering {
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => regions[b.region]
                .reclaimable_bytes()
                .cmp(&regions[a.region].reclaimable_bytes()),
        }
    }
}

/// Identity of a collection group, unique for the lifetime of the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(usize);

static NEXT_GROUP_ID: AtomicUsize = AtomicUsize::new(0);

impl GroupId {
    fn next() -> Self {
        GroupId(NEXT_GROUP_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

/// Candidate regions that are evacuated together. They share one card set, so their
/// remembered sets are merged and scanned once.
pub struct CollectionGroup {
    id: GroupId,
    candidates: Vec<CandidateInfo>,
    card_set: Arc<CardSet>,
    gc_efficiency: f64,
}

impl CollectionGroup {
    /// The number of regions in a group, except the first group built from a marking.
    pub const GROUP_SIZE: usize = 5;

    pub fn new(config: Arc<CardSetConfiguration>) -> Self {
        Self {
            id: GroupId::next(),
            candidates: Vec::with_capacity(4),
            card_set: Arc::new(CardSet::new(config)),
            gc_efficiency: 0.0,
        }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Add a candidate and make the group's card set the region's remembered set.
    pub fn add(&mut self, region: &HeapRegion, info: CandidateInfo) {
        debug_assert_eq!(region.hrm_index(), info.region);
        debug_assert!(!region.is_young(), "region {} is young", region.hrm_index());
        self.candidates.push(info);
        region.install_group_cardset(self.card_set.clone());
    }

    /// Add a region with its own efficiency.
    pub fn add_region(&mut self, region: &HeapRegion, policy: &dyn G1Policy) {
        let info = CandidateInfo::new(region.hrm_index(), region.calc_gc_efficiency(policy));
        self.add(region, info);
    }

    pub fn length(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn at(&self, index: usize) -> &CandidateInfo {
        &self.candidates[index]
    }

    pub fn at_mut(&mut self, index: usize) -> &mut CandidateInfo {
        &mut self.candidates[index]
    }

    /// The index of the `index`-th region of the group.
    pub fn region_at(&self, index: usize) -> usize {
        self.candidates[index].region
    }

    pub fn regions(&self) -> &[CandidateInfo] {
        &self.candidates
    }

    pub fn card_set(&self) -> &Arc<CardSet> {
        &self.card_set
    }

    pub fn gc_efficiency(&self) -> f64 {
        self.gc_efficiency
    }

    /// Recompute the efficiency of evacuating the whole group at once.
    pub fn calculate_efficiency(&mut self, regions: &[HeapRegion], policy: &dyn G1Policy) {
        let reclaimable_bytes: usize = self
            .candidates
            .iter()
            .map(|c| regions[c.region].reclaimable_bytes())
            .sum();
        let time_ms = self.predict_group_total_time_ms(regions, policy);
        self.gc_efficiency = reclaimable_bytes as f64 / time_ms;
    }

    fn predict_group_copy_time_ms(&self, regions: &[HeapRegion], policy: &dyn G1Policy) -> f64 {
        self.candidates
            .iter()
            .map(|c| {
                let r = &regions[c.region];
                debug_assert!(Arc::ptr_eq(&r.rem_set().card_set(), &self.card_set));
                policy.predict_region_copy_time_ms(r) + policy.predict_region_code_root_scan_time(r)
            })
            .sum()
    }

    /// Predicted pause time of evacuating this group: copying, code roots, one merge and
    /// scan of the shared card set, and the per-region fixed costs.
    pub fn predict_group_total_time_ms(
        &self,
        regions: &[HeapRegion],
        policy: &dyn G1Policy,
    ) -> f64 {
        policy.predict_merge_scan_time(self.card_set.occupied())
            + self.predict_group_copy_time_ms(regions, policy)
            + policy.predict_non_young_other_time_ms(self.length())
    }

    /// Forget the candidates after they were moved into a collection set.
    pub fn clear(&mut self) {
        self.card_set.clear();
        self.candidates.clear();
    }

    /// Forget the candidates without collecting them. Their regions get their own remembered
    /// sets back, emptied.
    pub fn abandon(&mut self, regions: &[HeapRegion]) {
        for c in self.candidates.iter() {
            let r = &regions[c.region];
            r.uninstall_group_cardset();
            r.rem_set().clear(true);
        }
        self.clear();
    }

    pub fn card_set_memory_stats(&self) -> MemoryStats {
        self.card_set.memory_stats()
    }
}

impl std::fmt::Debug for CollectionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let regions: Vec<_> = self.candidates.iter().map(|c| c.region).collect();
        f.debug_struct("CollectionGroup")
            .field("id", &self.id)
            .field("regions", &regions)
            .field("gc_efficiency", &self.gc_efficiency)
            .finish()
    }
}
