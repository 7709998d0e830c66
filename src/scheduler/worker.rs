use crate::util::options::Options;
use std::time::Instant;

/// The identity of a GC worker thread while it runs a task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GCWorker {
    /// The index of the worker in `0..active_workers`.
    pub ordinal: usize,
}

/// A parallel task. Every active worker calls `work` once, with its own ordinal. The task
/// is shared between the workers, so any per-worker state must be indexed by the ordinal.
pub trait WorkerTask: Sync {
    fn name(&self) -> &'static str;

    fn work(&self, worker: GCWorker);
}

/// A fixed-size gang of GC worker threads. The threads only exist while a task runs; a task
/// returns once every worker has finished it, which is the barrier between phases.
pub struct WorkerPool {
    max_workers: usize,
    active_workers: usize,
}

impl WorkerPool {
    pub fn new(options: &Options) -> Self {
        Self::with_workers(options.threads)
    }

    pub fn with_workers(max_workers: usize) -> Self {
        assert!(max_workers > 0);
        Self {
            max_workers,
            active_workers: max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers
    }

    /// Use `n` workers for the following tasks. Returns the number actually used, which is
    /// clamped to `1..=max_workers`.
    pub fn update_active_workers(&mut self, n: usize) -> usize {
        self.active_workers = n.clamp(1, self.max_workers);
        self.active_workers
    }

    /// Run `task` on every active worker and wait for all of them. The calling thread acts
    /// as worker 0.
    pub fn run_task(&self, task: &dyn WorkerTask) {
        self.run_task_with(task, self.active_workers)
    }

    /// Run `task` on `num_workers` workers, which may be fewer than the active workers.
    pub fn run_task_with(&self, task: &dyn WorkerTask, num_workers: usize) {
        let num_workers = num_workers.clamp(1, self.max_workers);
        let start = Instant::now();
        let result = crossbeam::thread::scope(|s| {
            for ordinal in 1..num_workers {
                s.spawn(move |_| run_on_worker(task, GCWorker { ordinal }));
            }
            run_on_worker(task, GCWorker { ordinal: 0 });
        });
        if let Err(e) = result {
            // A worker panicked. The heap is in an unknown state, so there is no way to go on.
            std::panic::resume_unwind(Box::new(format!(
                "GC worker panicked in task {}: {:?}",
                task.name(),
                e
            )));
        }
        debug!(
            "{}: {} workers, {:.3} ms",
            task.name(),
            num_workers,
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
}

fn run_on_worker(task: &dyn WorkerTask, worker: GCWorker) {
    probe!(mmtk_g1, task_begin, worker.ordinal);
    let start = Instant::now();
    task.work(worker);
    trace!(
        "{} (worker {}): {:.3} ms",
        task.name(),
        worker.ordinal,
        start.elapsed().as_secs_f64() * 1000.0
    );
    probe!(mmtk_g1, task_end, worker.ordinal);
}
