use std::sync::atomic::{AtomicBool, Ordering};

/// Lets the workers of a parallel region iteration claim each region exactly once. Every
/// worker starts at its own offset and wraps around, so they rarely contend for the same
/// regions.
pub struct HeapRegionClaimer {
    n_workers: usize,
    claimed: Vec<AtomicBool>,
}

impl HeapRegionClaimer {
    pub fn new(n_workers: usize, n_regions: usize) -> Self {
        assert!(n_workers > 0);
        Self {
            n_workers,
            claimed: (0..n_regions).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn n_regions(&self) -> usize {
        self.claimed.len()
    }

    /// The region index at which worker `worker_id` starts iterating.
    pub fn offset_for_worker(&self, worker_id: usize) -> usize {
        debug_assert!(worker_id < self.n_workers);
        self.n_regions() * worker_id / self.n_workers
    }

    /// Returns true if the caller claimed the region.
    pub fn claim_region(&self, index: usize) -> bool {
        !self.claimed[index].load(Ordering::Relaxed)
            && self.claimed[index]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    /// The region indices worker `worker_id` visits, starting at its offset and wrapping.
    pub fn worker_order(&self, worker_id: usize) -> impl Iterator<Item = usize> + '_ {
        let n = self.n_regions();
        let start = self.offset_for_worker(worker_id);
        (0..n).map(move |i| (start + i) % n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_region_claimed_once() {
        let claimer = HeapRegionClaimer::new(3, 10);
        assert_eq!(claimer.offset_for_worker(0), 0);
        assert_eq!(claimer.offset_for_worker(1), 3);
        assert_eq!(claimer.offset_for_worker(2), 6);
        let claimed = spin::Mutex::new(Vec::new());
        crossbeam::thread::scope(|s| {
            for w in 0..3 {
                let claimer = &claimer;
                let claimed = &claimed;
                s.spawn(move |_| {
                    for i in claimer.worker_order(w) {
                        if claimer.claim_region(i) {
                            claimed.lock().push(i);
                        }
                    }
                });
            }
        })
        .unwrap();
        let mut claimed = claimed.into_inner();
        claimed.sort_unstable();
        assert_eq!(claimed, (0..10).collect::<Vec<_>>());
        assert!(!claimer.claim_region(4));
    }
}
