use atomic::Atomic;
use bytemuck::NoUninit;
use crossbeam::utils::Backoff;
use std::sync::atomic::Ordering;

/// The states of a lazily initialized, markable payload.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, NoUninit)]
pub enum LazyInitState {
    /// The payload has no backing storage.
    Uninitialized,
    /// One thread won the race and is setting up the payload. Everyone else waits.
    Initializing,
    /// The payload is ready and holds no data.
    Initialized,
    /// The payload is ready and someone has recorded data in it.
    Marked,
}

/// An atomic `LazyInitState`. Exactly one thread wins `try_begin_initialization` for each
/// `Uninitialized -> Initialized` transition. It says nothing about what the payload is.
pub struct LazyInit {
    state: Atomic<LazyInitState>,
}

impl Default for LazyInit {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyInit {
    pub const fn new() -> Self {
        Self {
            state: Atomic::new(LazyInitState::Uninitialized),
        }
    }

    pub fn state(&self) -> LazyInitState {
        self.state.load(Ordering::Acquire)
    }

    fn set_state(&self, state: LazyInitState) {
        self.state.store(state, Ordering::Release)
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            self.state(),
            LazyInitState::Initialized | LazyInitState::Marked
        )
    }

    pub fn is_marked(&self) -> bool {
        self.state() == LazyInitState::Marked
    }

    /// Try to move from `Uninitialized` to `Initializing`. Returns true if this thread must
    /// set up the payload and then call `complete_initialization`.
    pub fn try_begin_initialization(&self) -> bool {
        self.state
            .compare_exchange(
                LazyInitState::Uninitialized,
                LazyInitState::Initializing,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publish the payload set up after a successful `try_begin_initialization`.
    pub fn complete_initialization(&self) {
        debug_assert_eq!(self.state(), LazyInitState::Initializing);
        self.set_state(LazyInitState::Initialized);
    }

    /// Spin until another thread has finished initializing.
    pub fn wait_until_initialized(&self) {
        let backoff = Backoff::new();
        while self.state() == LazyInitState::Initializing {
            backoff.snooze();
        }
    }

    /// Make sure the payload is initialized, running `init` on this thread if it wins the race.
    /// Returns once the state is `Initialized` or `Marked`.
    pub fn ensure_initialized(&self, init: impl FnOnce()) {
        if self.is_initialized() {
            return;
        }
        if self.try_begin_initialization() {
            init();
            self.complete_initialization();
        } else {
            self.wait_until_initialized();
        }
        debug_assert!(self.is_initialized());
    }

    /// `Initialized -> Marked`. Returns true if this call made the transition. A payload that
    /// is already marked stays marked and returns false.
    pub fn try_mark(&self) -> bool {
        debug_assert!(self.is_initialized());
        self.state
            .compare_exchange(
                LazyInitState::Initialized,
                LazyInitState::Marked,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Marked -> Initialized`. The caller must already have cleared the payload, and no
    /// thread may be marking concurrently.
    pub fn reset_to_initialized(&self) {
        debug_assert!(self.is_initialized());
        self.set_state(LazyInitState::Initialized);
    }

    /// Back to `Uninitialized` after the backing storage has been released. Only legal for an
    /// initialized payload that holds no data.
    pub fn reset_to_uninitialized(&self) {
        debug_assert_eq!(self.state(), LazyInitState::Initialized);
        self.set_state(LazyInitState::Uninitialized);
    }
}
