use crossbeam::utils::Backoff;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Termination protocol for workers that steal from shared work. A worker that runs out of
/// work offers termination. Parallel work is over when all workers have offered at once; a
/// worker that sees new shared work while waiting withdraws its offer and goes back to work.
pub struct TaskTerminator {
    n_threads: usize,
    offered: AtomicUsize,
}

impl TaskTerminator {
    pub fn new(n_threads: usize) -> Self {
        Self {
            n_threads,
            offered: AtomicUsize::new(0),
        }
    }

    /// Returns true when every worker is out of work. Returns false if `has_work` reported
    /// new work before that happened; the caller must then look for work and offer again.
    pub fn offer_termination(&self, has_work: impl Fn() -> bool) -> bool {
        let offered = self.offered.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(offered <= self.n_threads);
        if offered == self.n_threads {
            return true;
        }
        let backoff = Backoff::new();
        loop {
            let current = self.offered.load(Ordering::Acquire);
            if current == self.n_threads {
                return true;
            }
            if has_work()
                && self
                    .offered
                    .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return false;
            }
            backoff.snooze();
        }
    }

    /// Ready the terminator for another round. Not thread-safe.
    pub fn reset(&self) {
        self.offered.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::panic_after;
    use std::sync::atomic::AtomicIsize;
    use std::sync::Arc;

    #[test]
    fn single_worker_terminates() {
        let t = TaskTerminator::new(1);
        assert!(t.offer_termination(|| true));
    }

    #[test]
    fn shared_work_is_drained_before_termination() {
        panic_after(10_000, || {
            let terminator = Arc::new(TaskTerminator::new(4));
            let work = Arc::new(AtomicIsize::new(1000));
            crossbeam::thread::scope(|s| {
                for _ in 0..4 {
                    let terminator = terminator.clone();
                    let work = work.clone();
                    s.spawn(move |_| loop {
                        while work.fetch_sub(1, Ordering::AcqRel) > 0 {}
                        work.fetch_add(1, Ordering::AcqRel);
                        if terminator.offer_termination(|| work.load(Ordering::Acquire) > 0) {
                            break;
                        }
                    });
                }
            })
            .unwrap();
            assert!(work.load(Ordering::SeqCst) <= 0);
        });
    }
}
