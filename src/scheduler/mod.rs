//! GC worker threads and the helpers parallel tasks use to split up work.

mod claimer;
mod terminator;
mod worker;

pub use self::claimer::HeapRegionClaimer;
pub use self::terminator::TaskTerminator;
pub use self::worker::{GCWorker, WorkerPool, WorkerTask};
