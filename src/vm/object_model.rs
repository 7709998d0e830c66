use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// Callback trait of functions that report slots, i.e. the addresses of words that hold an
/// object reference (or zero).
pub trait SlotVisitor {
    /// Call this function for each slot.
    fn visit_slot(&mut self, slot: Address);
}

/// This lets us use closures as SlotVisitor.
impl<F: FnMut(Address)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: Address) {
        self(slot)
    }
}

/// Read the reference held in a slot.
pub fn load_slot(slot: Address) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { slot.load::<Address>() })
}

/// Write a reference into a slot.
pub fn store_slot(slot: Address, object: ObjectReference) {
    unsafe { slot.store(object.to_raw_address()) }
}

/// The object layout of the runtime. Every object starts at a word-aligned address, is at
/// least [`ObjectModel::MIN_FILL_WORDS`] words long, and the heap between a region's bottom
/// and top is a dense sequence of objects (including filler objects).
pub trait ObjectModel<VM: VMBinding> {
    /// The smallest gap that can be turned into a filler object.
    const MIN_FILL_WORDS: usize;

    /// The size of the object in words.
    fn size_in_words(object: ObjectReference) -> usize;

    /// The class (type) word of the object. Only used for verification and logging.
    fn klass(object: ObjectReference) -> usize;

    /// Record that the object will move to `to`.
    fn forward_to(object: ObjectReference, to: Address);

    /// The address recorded by `forward_to`, if any.
    fn forwardee(object: ObjectReference) -> Option<Address>;

    fn is_forwarded(object: ObjectReference) -> bool {
        Self::forwardee(object).is_some()
    }

    /// Reset the header of an object so it is no longer forwarded. Called on every object
    /// that stays in place, and on every object after it was moved.
    fn init_mark(object: ObjectReference);

    /// Report every reference slot of the object.
    fn scan_object<SV: SlotVisitor>(object: ObjectReference, visitor: &mut SV);

    /// Format `[start, start + words)` as a dead filler object. `words` is at least
    /// `MIN_FILL_WORDS`.
    fn fill_with_object(start: Address, words: usize);
}
