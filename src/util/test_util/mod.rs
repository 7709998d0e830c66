//! Helpers for tests that run collections, spawn threads or change the environment.

use std::panic;
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

#[cfg(any(test, feature = "mock_test"))]
pub mod mock_vm;

/// Run `f` on a new thread and fail the test if it does not return within `millis`
/// milliseconds. For tests whose failure mode is a livelock, such as a worker waiting for
/// termination forever.
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let result = f();
        // The receiver is gone only if the test already timed out.
        let _ = tx.send(());
        result
    });
    if let Err(e) = rx.recv_timeout(Duration::from_millis(millis)) {
        panic!("Test did not finish in {} ms: {}", millis, e);
    }
    match handle.join() {
        Ok(result) => result,
        Err(e) => panic::resume_unwind(e),
    }
}

lazy_static! {
    // The mock VM roots and the `MMTK_` environment variables are process-wide.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

/// Run `f` while no other serial test runs.
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // A failed test poisons the lock. The other tests still run.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

/// Run `test`, then `cleanup` even if `test` panicked, then re-raise the panic.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let result = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = result {
        panic::resume_unwind(e);
    }
}
