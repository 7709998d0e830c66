use super::region::HeapRegion;
use crate::util::options::Options;

/// Predictions the collector needs from the pause-time policy. They are pure functions of
/// the statistics the policy has gathered so far; none of them may fail.
pub trait G1Policy: Send + Sync {
    /// Time to copy the live objects of `region` during an evacuation.
    fn predict_region_copy_time_ms(&self, region: &HeapRegion) -> f64;

    /// Time to scan the code roots of `region`.
    fn predict_region_code_root_scan_time(&self, region: &HeapRegion) -> f64;

    /// Time to merge and scan a remembered set of `card_count` cards.
    fn predict_merge_scan_time(&self, card_count: usize) -> f64;

    /// Fixed per-region costs of `region_count` old regions.
    fn predict_non_young_other_time_ms(&self, region_count: usize) -> f64;

    /// The minimum number of old regions a mixed collection must take from
    /// `candidate_count` candidates to finish them within the configured number of mixed
    /// collections.
    fn calc_min_old_cset_length(&self, candidate_count: usize) -> usize;
}

/// A policy with constant unit costs.
#[derive(Clone, Debug)]
pub struct ProfileCostPolicy {
    pub cost_per_byte_ms: f64,
    pub cost_per_code_root_region_ms: f64,
    pub cost_per_card_ms: f64,
    pub non_young_other_cost_per_region_ms: f64,
    pub mixed_gc_count_target: usize,
}

impl Default for ProfileCostPolicy {
    fn default() -> Self {
        Self {
            // About 200 MB/s of copying.
            cost_per_byte_ms: 5.0e-6,
            cost_per_code_root_region_ms: 0.01,
            cost_per_card_ms: 0.0005,
            non_young_other_cost_per_region_ms: 0.05,
            mixed_gc_count_target: 8,
        }
    }
}

impl ProfileCostPolicy {
    pub fn new(options: &Options) -> Self {
        Self {
            mixed_gc_count_target: options.mixed_gc_count_target,
            ..Default::default()
        }
    }
}

impl G1Policy for ProfileCostPolicy {
    fn predict_region_copy_time_ms(&self, region: &HeapRegion) -> f64 {
        region.live_bytes() as f64 * self.cost_per_byte_ms
    }

    fn predict_region_code_root_scan_time(&self, _region: &HeapRegion) -> f64 {
        self.cost_per_code_root_region_ms
    }

    fn predict_merge_scan_time(&self, card_count: usize) -> f64 {
        card_count as f64 * self.cost_per_card_ms
    }

    fn predict_non_young_other_time_ms(&self, region_count: usize) -> f64 {
        region_count as f64 * self.non_young_other_cost_per_region_ms
    }

    fn calc_min_old_cset_length(&self, candidate_count: usize) -> usize {
        candidate_count.div_ceil(self.mixed_gc_count_target.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_old_cset_length_rounds_up() {
        let policy = ProfileCostPolicy::default();
        assert_eq!(policy.calc_min_old_cset_length(0), 0);
        assert_eq!(policy.calc_min_old_cset_length(1), 1);
        assert_eq!(policy.calc_min_old_cset_length(16), 2);
        assert_eq!(policy.calc_min_old_cset_length(17), 3);
    }

    #[test]
    fn costs_scale_linearly() {
        let policy = ProfileCostPolicy::default();
        assert_eq!(policy.predict_merge_scan_time(0), 0.0);
        let small = policy.predict_merge_scan_time(100);
        assert!(policy.predict_merge_scan_time(200) > small);
        assert_eq!(
            policy.predict_non_young_other_time_ms(4),
            4.0 * policy.non_young_other_cost_per_region_ms
        );
    }
}
