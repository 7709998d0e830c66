use super::card_set::{card_of, CardSet};
use crate::util::alloc::card_set_memory::CardSetConfiguration;
use crate::util::Address;
use atomic::Atomic;
use bytemuck::NoUninit;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Whether the remembered set of a region is being maintained.
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
pub enum RemSetState {
    Untracked,
    Updating,
    Complete,
}

/// The remembered set of a region: the cards outside the region that may hold references
/// into it. While the region is a member of a collection group, the group's shared card
/// set is the active one.
pub struct HeapRegionRemSet {
    card_set: Arc<CardSet>,
    group_card_set: spin::Mutex<Option<Arc<CardSet>>>,
    state: Atomic<RemSetState>,
}

impl HeapRegionRemSet {
    pub fn new(config: Arc<CardSetConfiguration>) -> Self {
        Self {
            card_set: Arc::new(CardSet::new(config)),
            group_card_set: spin::Mutex::new(None),
            state: Atomic::new(RemSetState::Untracked),
        }
    }

    /// The card set that references into this region are recorded in.
    pub fn card_set(&self) -> Arc<CardSet> {
        match &*self.group_card_set.lock() {
            Some(group) => group.clone(),
            None => self.card_set.clone(),
        }
    }

    pub fn has_group_cardset(&self) -> bool {
        self.group_card_set.lock().is_some()
    }

    /// Share `card_set` with the other regions of a collection group. The cards recorded
    /// so far are moved into it.
    pub fn install_group_cardset(&self, card_set: Arc<CardSet>) {
        let mut group = self.group_card_set.lock();
        debug_assert!(group.is_none(), "a region is in at most one group");
        self.card_set.iterate_cards(|card| {
            card_set.add_card(card);
        });
        self.card_set.clear();
        *group = Some(card_set);
    }

    pub fn uninstall_group_cardset(&self) {
        *self.group_card_set.lock() = None;
    }

    /// Record a reference from the slot at `from` into this region.
    pub fn add_reference(&self, from: Address) -> bool {
        self.card_set().add_card(card_of(from))
    }

    pub fn contains_reference(&self, from: Address) -> bool {
        self.card_set().contains_card(card_of(from))
    }

    pub fn occupied(&self) -> usize {
        self.card_set().occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Drop the recorded cards of the region's own card set. Unless `only_cardset`, the
    /// region also stops being tracked.
    pub fn clear(&self, only_cardset: bool) {
        self.card_set.clear();
        if !only_cardset {
            self.set_state(RemSetState::Untracked);
        }
    }

    pub fn state(&self) -> RemSetState {
        self.state.load(Ordering::Relaxed)
    }

    pub fn set_state(&self, state: RemSetState) {
        self.state.store(state, Ordering::Relaxed)
    }

    pub fn is_tracked(&self) -> bool {
        self.state() != RemSetState::Untracked
    }

    pub fn is_complete(&self) -> bool {
        self.state() == RemSetState::Complete
    }

    pub fn get_state_str(&self) -> &'static str {
        self.state().into()
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.card_set.mem_size()
    }
}
