use super::collection_group::{CandidateInfo, CollectionGroup, GroupId};
use super::policy::G1Policy;
use super::region::HeapRegion;
use crate::util::alloc::card_set_memory::CardSetConfiguration;
use std::sync::Arc;

/// A list of collection groups, most efficient first.
#[derive(Default)]
pub struct CollectionCandidateGroupsList {
    groups: Vec<Box<CollectionGroup>>,
    num_regions: usize,
}

impl CollectionCandidateGroupsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, group: Box<CollectionGroup>) {
        assert!(!group.is_empty(), "Do not add empty groups");
        debug_assert!(
            self.groups.iter().all(|g| g.id() != group.id()),
            "group {:?} already added",
            group.id()
        );
        self.num_regions += group.length();
        trace!("Added group {:?}: {} regions", group.id(), group.length());
        self.groups.push(group);
    }

    pub fn at(&self, index: usize) -> &CollectionGroup {
        &self.groups[index]
    }

    pub fn at_mut(&mut self, index: usize) -> &mut CollectionGroup {
        &mut self.groups[index]
    }

    /// The number of groups.
    pub fn length(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The number of regions in all groups.
    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionGroup> {
        self.groups.iter().map(|g| &**g)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CollectionGroup> {
        self.groups.iter_mut().map(|g| &mut **g)
    }

    /// Drop every group after its regions were collected.
    pub fn clear(&mut self) {
        for group in self.groups.iter_mut() {
            group.clear();
        }
        self.groups.clear();
        self.num_regions = 0;
    }

    /// Drop every group without collecting its regions.
    pub fn abandon(&mut self, regions: &[HeapRegion]) {
        for group in self.groups.iter_mut() {
            group.abandon(regions);
            trace!("Abandoned group {:?}", group.id());
        }
        self.groups.clear();
        self.num_regions = 0;
    }

    /// Start a parallel scan of every group's card set.
    pub fn prepare_for_scan(&self) {
        for group in self.groups.iter() {
            group.card_set().reset_table_scanner();
        }
    }

    /// Take the first `count` groups out of the list.
    pub fn remove_selected(&mut self, count: usize) -> Vec<Box<CollectionGroup>> {
        let removed: Vec<_> = self.groups.drain(..count).collect();
        self.num_regions -= removed.iter().map(|g| g.length()).sum::<usize>();
        removed
    }

    /// Take the groups with the given ids out of the list. `ids` must be in list order.
    pub fn remove(&mut self, ids: &[GroupId]) -> Vec<Box<CollectionGroup>> {
        if ids.is_empty() || self.groups.is_empty() {
            return vec![];
        }
        let mut removed = Vec::with_capacity(ids.len());
        let mut kept = Vec::with_capacity(self.groups.len().saturating_sub(ids.len()));
        let mut next = 0;
        for group in self.groups.drain(..) {
            if next < ids.len() && group.id() == ids[next] {
                next += 1;
                removed.push(group);
            } else {
                kept.push(group);
            }
        }
        debug_assert_eq!(next, ids.len(), "ids must follow the list order");
        self.groups = kept;
        self.num_regions -= removed.iter().map(|g| g.length()).sum::<usize>();
        self.verify();
        removed
    }

    /// Stable sort by descending group efficiency.
    pub fn sort_by_efficiency(&mut self) {
        self.groups.sort_by(|a, b| {
            b.gc_efficiency()
                .partial_cmp(&a.gc_efficiency())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    /// Check the stored efficiencies are descending.
    pub fn verify(&self) {
        if cfg!(debug_assertions) {
            for pair in self.groups.windows(2) {
                assert!(
                    pair[0].gc_efficiency() >= pair[1].gc_efficiency(),
                    "Stored gc efficiency must be descending: {:?} before {:?}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }
}

/// Where a candidate region came from.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CandidateOrigin {
    Invalid,
    Marking,
    Retained,
    /// Only used while verifying.
    Verify,
}

/// The regions worth collecting in mixed collections: those selected by the last marking,
/// grouped by efficiency, and those retained after evacuation failures, one group each.
pub struct CollectionSetCandidates {
    contains_map: Vec<CandidateOrigin>,
    candidate_groups: CollectionCandidateGroupsList,
    retained_groups: CollectionCandidateGroupsList,
    card_set_config: Arc<CardSetConfiguration>,
    last_marking_candidates_length: usize,
}

impl CollectionSetCandidates {
    pub fn new(card_set_config: Arc<CardSetConfiguration>) -> Self {
        Self {
            contains_map: vec![],
            candidate_groups: CollectionCandidateGroupsList::new(),
            retained_groups: CollectionCandidateGroupsList::new(),
            card_set_config,
            last_marking_candidates_length: 0,
        }
    }

    pub fn initialize(&mut self, max_regions: usize) {
        assert!(self.contains_map.is_empty(), "already initialized");
        self.contains_map = vec![CandidateOrigin::Invalid; max_regions];
    }

    fn max_regions(&self) -> usize {
        self.contains_map.len()
    }

    /// Abandon every group and forget every region.
    pub fn clear(&mut self, regions: &[HeapRegion]) {
        self.retained_groups.abandon(regions);
        self.candidate_groups.abandon(regions);
        self.contains_map.fill(CandidateOrigin::Invalid);
        self.last_marking_candidates_length = 0;
    }

    pub fn candidate_groups(&self) -> &CollectionCandidateGroupsList {
        &self.candidate_groups
    }

    pub fn candidate_groups_mut(&mut self) -> &mut CollectionCandidateGroupsList {
        &mut self.candidate_groups
    }

    pub fn retained_groups(&self) -> &CollectionCandidateGroupsList {
        &self.retained_groups
    }

    pub fn retained_groups_mut(&mut self) -> &mut CollectionCandidateGroupsList {
        &mut self.retained_groups
    }

    /// Group the regions selected by a marking. `infos` is sorted by descending efficiency.
    /// The first group holds as many regions as the next mixed collection has to take, the
    /// others `GROUP_SIZE` each.
    pub fn set_candidates_from_marking(
        &mut self,
        infos: &[CandidateInfo],
        regions: &[HeapRegion],
        policy: &dyn G1Policy,
    ) {
        if infos.is_empty() {
            debug!("No regions selected from marking.");
            return;
        }
        assert!(
            self.candidate_groups.is_empty(),
            "must be empty at the start of a cycle"
        );
        self.verify();

        let mut group_limit = policy.calc_min_old_cset_length(infos.len()).max(1);
        let mut current = Box::new(CollectionGroup::new(self.card_set_config.clone()));
        for info in infos.iter() {
            let r = &regions[info.region];
            assert!(!self.contains(r), "must not contain region {}", info.region);
            self.contains_map[info.region] = CandidateOrigin::Marking;

            if current.length() == group_limit {
                group_limit = CollectionGroup::GROUP_SIZE;
                let full = std::mem::replace(
                    &mut current,
                    Box::new(CollectionGroup::new(self.card_set_config.clone())),
                );
                self.candidate_groups.append(full);
            }
            current.add(r, *info);
        }
        self.candidate_groups.append(current);
        debug_assert_eq!(self.candidate_groups.num_regions(), infos.len());

        debug!(
            "Finished creating {} collection groups from {} regions",
            self.candidate_groups.length(),
            infos.len()
        );
        self.last_marking_candidates_length = infos.len();
        self.verify();
    }

    /// Recompute every marking group's efficiency and sort them.
    pub fn sort_marking_by_efficiency(&mut self, regions: &[HeapRegion], policy: &dyn G1Policy) {
        for group in self.candidate_groups.iter_mut() {
            group.calculate_efficiency(regions, policy);
        }
        self.candidate_groups.sort_by_efficiency();
        self.candidate_groups.verify();
    }

    /// Order the retained groups. The marking groups are kept sorted already.
    pub fn sort_by_efficiency(&mut self, regions: &[HeapRegion], policy: &dyn G1Policy) {
        self.candidate_groups.verify();
        for group in self.retained_groups.iter_mut() {
            group.calculate_efficiency(regions, policy);
        }
        self.retained_groups.sort_by_efficiency();
        self.retained_groups.verify();
    }

    /// Add a region that failed evacuation, in its own group.
    pub fn add_retained_region_unsorted(&mut self, region: &HeapRegion, policy: &dyn G1Policy) {
        assert!(
            !self.contains(region),
            "must not contain region {}",
            region.hrm_index()
        );
        self.contains_map[region.hrm_index()] = CandidateOrigin::Retained;
        let mut group = Box::new(CollectionGroup::new(self.card_set_config.clone()));
        group.add_region(region, policy);
        trace!("Add to retained {:?}", group.id());
        self.retained_groups.append(group);
    }

    /// Forget a region that left the candidates.
    pub fn reset_region(&mut self, region: &HeapRegion) {
        assert!(
            self.contains(region),
            "must contain region {}",
            region.hrm_index()
        );
        self.contains_map[region.hrm_index()] = CandidateOrigin::Invalid;
    }

    pub fn contains(&self, region: &HeapRegion) -> bool {
        let index = region.hrm_index();
        debug_assert!(index < self.max_regions());
        self.contains_map[index] != CandidateOrigin::Invalid
    }

    pub fn is_from_marking(&self, region: &HeapRegion) -> bool {
        debug_assert!(self.contains(region));
        self.contains_map[region.hrm_index()] == CandidateOrigin::Marking
    }

    pub fn get_short_type_str(&self, region: &HeapRegion) -> &'static str {
        match self.contains_map[region.hrm_index()] {
            CandidateOrigin::Invalid => "Ci",
            CandidateOrigin::Marking => "Cm",
            CandidateOrigin::Retained => "Cr",
            CandidateOrigin::Verify => "Cv",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    pub fn has_more_marking_candidates(&self) -> bool {
        self.marking_groups_length() != 0
    }

    /// The number of regions in marking groups.
    pub fn marking_groups_length(&self) -> usize {
        self.candidate_groups.num_regions()
    }

    pub fn retained_regions_length(&self) -> usize {
        self.retained_groups.num_regions()
    }

    pub fn last_marking_candidates_length(&self) -> usize {
        self.last_marking_candidates_length
    }

    /// The number of candidate regions.
    pub fn length(&self) -> usize {
        self.marking_groups_length() + self.retained_regions_length()
    }

    /// Visit the index of every candidate region, marking groups first.
    pub fn iterate_regions(&self, mut f: impl FnMut(usize)) {
        let marking = self.candidate_groups.iter();
        for group in marking.chain(self.retained_groups.iter()) {
            for c in group.regions() {
                f(c.region);
            }
        }
    }

    /// Check that the origin map agrees with the group lists.
    pub fn verify(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        let mut verify_map = vec![CandidateOrigin::Invalid; self.max_regions()];
        let mut check = |groups: &CollectionCandidateGroupsList, expected: CandidateOrigin| {
            let mut from_marking = 0;
            for group in groups.iter() {
                for c in group.regions() {
                    let index = c.region;
                    assert_eq!(
                        self.contains_map[index], expected,
                        "region {}: origin {:?} but found in a {:?} group",
                        index, self.contains_map[index], expected
                    );
                    let seen = verify_map[index] != CandidateOrigin::Invalid;
                    assert!(!seen, "region {} is in two groups", index);
                    verify_map[index] = CandidateOrigin::Verify;
                    if self.contains_map[index] == CandidateOrigin::Marking {
                        from_marking += 1;
                    }
                }
            }
            from_marking
        };
        let from_marking = check(&self.candidate_groups, CandidateOrigin::Marking);
        assert_eq!(from_marking, self.marking_groups_length());
        let retained_from_marking = check(&self.retained_groups, CandidateOrigin::Retained);
        assert_eq!(retained_from_marking, 0);

        for (i, &verified) in verify_map.iter().enumerate() {
            let origin = self.contains_map[i];
            let consistent = origin == verified
                || (origin != CandidateOrigin::Invalid && verified == CandidateOrigin::Verify);
            assert!(
                consistent,
                "Candidate origin does not match for region {}, is {:?} but should be {:?}",
                i, origin, verified
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::g1::card_set::CardSet;
    use crate::policy::g1::policy::ProfileCostPolicy;
    use crate::util::options::Options;
    use crate::util::test_util::mock_vm::TestHeapMemory;

    const REGION: usize = 1 << 16;

    struct Fixture {
        _mem: TestHeapMemory,
        regions: Vec<HeapRegion>,
        candidates: CollectionSetCandidates,
    }

    fn fixture(n: usize) -> Fixture {
        let mem = TestHeapMemory::new(n * REGION);
        let mut options = Options::default();
        options.set_from_str("region_size", &REGION.to_string());
        let config = Arc::new(CardSet::configuration(&options));
        let regions: Vec<HeapRegion> = (0..n)
            .map(|i| HeapRegion::new(i, mem.start() + i * REGION, REGION, config.clone()))
            .collect();
        for (i, r) in regions.iter().enumerate() {
            r.set_old();
            r.set_top(r.end());
            // Region i has (i + 1) * 1024 live bytes, so lower indices are more efficient.
            r.set_marked_bytes((i + 1) * 1024);
        }
        let mut candidates = CollectionSetCandidates::new(config);
        candidates.initialize(n);
        Fixture {
            _mem: mem,
            regions,
            candidates,
        }
    }

    fn sorted_infos(f: &Fixture, policy: &ProfileCostPolicy, count: usize) -> Vec<CandidateInfo> {
        let mut infos: Vec<_> = f.regions[..count]
            .iter()
            .map(|r| CandidateInfo::new(r.hrm_index(), r.calc_gc_efficiency(policy)))
            .collect();
        infos.sort_by(CandidateInfo::compare_gc_efficiency);
        infos
    }

    #[test]
    fn partition_into_groups() {
        let mut f = fixture(40);
        let policy = ProfileCostPolicy {
            mixed_gc_count_target: 4,
            ..Default::default()
        };
        let infos = sorted_infos(&f, &policy, 23);
        let (regions, candidates) = (&f.regions, &mut f.candidates);
        candidates.set_candidates_from_marking(&infos, regions, &policy);

        let groups = candidates.candidate_groups();
        // ceil(23 / 4) = 6 regions in the first group, then 5, 5, 5 and 2.
        let lengths: Vec<_> = groups.iter().map(|g| g.length()).collect();
        assert_eq!(lengths, vec![6, 5, 5, 5, 2]);
        assert_eq!(groups.num_regions(), 23);
        assert_eq!(candidates.last_marking_candidates_length(), 23);
        assert!(candidates.has_more_marking_candidates());
        for info in infos.iter() {
            assert!(candidates.is_from_marking(&regions[info.region]));
        }
        assert_eq!(candidates.get_short_type_str(&regions[30]), "Ci");
        assert_eq!(candidates.get_short_type_str(&regions[0]), "Cm");
        candidates.verify();
    }

    #[test]
    fn first_group_no_larger_than_candidates() {
        let mut f = fixture(4);
        let policy = ProfileCostPolicy {
            mixed_gc_count_target: 1,
            ..Default::default()
        };
        let infos = sorted_infos(&f, &policy, 3);
        let candidates = &mut f.candidates;
        candidates.set_candidates_from_marking(&infos, &f.regions, &policy);
        assert_eq!(candidates.candidate_groups().length(), 1);
        assert_eq!(candidates.candidate_groups().at(0).length(), 3);
    }

    #[test]
    fn retained_regions_sort_by_efficiency() {
        let mut f = fixture(8);
        let policy = ProfileCostPolicy::default();
        for i in [5, 1, 7, 3] {
            let r = &f.regions[i];
            f.candidates.add_retained_region_unsorted(r, &policy);
        }
        assert_eq!(f.candidates.retained_regions_length(), 4);
        assert_eq!(f.candidates.get_short_type_str(&f.regions[5]), "Cr");
        f.candidates.sort_by_efficiency(&f.regions, &policy);
        let groups = f.candidates.retained_groups();
        let order: Vec<_> = groups.iter().map(|g| g.region_at(0)).collect();
        assert_eq!(order, vec![1, 3, 5, 7]);
        for i in 1..groups.length() {
            let (prev, next) = (groups.at(i - 1), groups.at(i));
            assert!(prev.gc_efficiency() >= next.gc_efficiency());
        }
        f.candidates.verify();
    }

    #[test]
    fn remove_groups() {
        let mut f = fixture(20);
        let policy = ProfileCostPolicy {
            mixed_gc_count_target: 4,
            ..Default::default()
        };
        let infos = sorted_infos(&f, &policy, 20);
        let candidates = &mut f.candidates;
        candidates.set_candidates_from_marking(&infos, &f.regions, &policy);
        candidates.sort_marking_by_efficiency(&f.regions, &policy);
        let groups = candidates.candidate_groups_mut();
        assert_eq!(groups.length(), 4);
        let selected = groups.remove_selected(1);
        assert_eq!(selected.len(), 1);
        assert_eq!(groups.num_regions(), 15);
        let ids = [groups.at(0).id(), groups.at(2).id()];
        let removed = groups.remove(&ids);
        assert_eq!(removed.len(), 2);
        assert_eq!(groups.length(), 1);
        assert_eq!(groups.num_regions(), 5);
        assert!(groups.remove(&[]).is_empty());
    }

    #[test]
    fn clear_abandons_everything() {
        let mut f = fixture(10);
        let policy = ProfileCostPolicy::default();
        let infos = sorted_infos(&f, &policy, 6);
        let (regions, candidates) = (&f.regions, &mut f.candidates);
        candidates.set_candidates_from_marking(&infos, regions, &policy);
        candidates.add_retained_region_unsorted(&regions[9], &policy);
        assert_eq!(candidates.length(), 7);
        let mut seen = vec![];
        candidates.iterate_regions(|r| seen.push(r));
        assert_eq!(seen.len(), 7);

        candidates.reset_region(&regions[9]);
        assert!(!candidates.contains(&regions[9]));
        candidates.retained_groups_mut().abandon(regions);

        candidates.clear(regions);
        assert!(candidates.is_empty());
        for r in regions.iter() {
            assert!(!candidates.contains(r));
            assert!(!r.rem_set().has_group_cardset());
        }
        candidates.verify();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Candidate origin does not match for region 3")]
    fn verify_catches_untracked_origin() {
        let mut f = fixture(8);
        let policy = ProfileCostPolicy::default();
        let candidates = &mut f.candidates;
        candidates.add_retained_region_unsorted(&f.regions[1], &policy);
        candidates.verify();
        candidates.contains_map[3] = CandidateOrigin::Marking;
        candidates.verify();
    }
}
