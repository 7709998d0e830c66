//! A runtime with a fixed, simple object layout, for driving the collector in tests.
//!
//! Every object is at least two words:
//!
//! | word | content |
//! |---|---|
//! | 0 | forwarding address, or zero |
//! | 1 | klass: size in words (low 32 bits), number of reference fields (next 31 bits), filler flag (top bit) |
//! | 2.. | reference fields, then payload |

use crate::util::constants::BYTES_IN_WORD;
use crate::util::memory;
use crate::util::{Address, ObjectReference};
use crate::vm::object_model::{load_slot, store_slot};
use crate::vm::{ObjectModel, Scanning, SlotVisitor, VMBinding};
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

const FORWARDING_WORD: usize = 0;
const KLASS_WORD: usize = 1;
const FIRST_FIELD: usize = 2;
const SIZE_MASK: usize = u32::MAX as usize;
const NUM_REFS_SHIFT: usize = 32;
const NUM_REFS_MASK: usize = (1 << 31) - 1;
const FILLER_BIT: usize = 1 << 63;

#[derive(Default)]
pub struct MockVM;

impl VMBinding for MockVM {
    type VMObjectModel = MockVM;
    type VMScanning = MockVM;
}

/// Root slots. Each slot is boxed so its address is stable while the table grows.
#[derive(Default)]
pub struct MockRoots {
    pub strong: Vec<Box<AtomicUsize>>,
    pub weak: Vec<Box<AtomicUsize>>,
    pub soft: Vec<Box<AtomicUsize>>,
}

lazy_static! {
    // The mutex may get poisoned any time. Accessing this mutex needs to deal with the poisoned case.
    // One can use read/write_mockvm to access the roots.
    static ref MOCK_VM_ROOTS: Mutex<MockRoots> = Mutex::new(MockRoots::default());
}

pub fn read_mockvm<F, R>(func: F) -> R
where
    F: FnOnce(&MockRoots) -> R,
{
    let lock = MOCK_VM_ROOTS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&lock)
}

pub fn write_mockvm<F, R>(func: F) -> R
where
    F: FnOnce(&mut MockRoots) -> R,
{
    let mut lock = MOCK_VM_ROOTS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&mut lock)
}

/// Run `test` with an empty root table, holding the serial test lock, and empty the table
/// again afterwards.
pub fn with_mockvm<T>(test: T)
where
    T: FnOnce() + std::panic::UnwindSafe,
{
    super::serial_test(|| {
        write_mockvm(|roots| *roots = MockRoots::default());
        super::with_cleanup(test, || {
            write_mockvm(|roots| *roots = MockRoots::default());
        })
    })
}

fn word(object: ObjectReference, index: usize) -> Address {
    object.to_raw_address().add_words(index)
}

fn slot_of(root: &AtomicUsize) -> Address {
    Address::from_ref(root)
}

fn new_slot(object: ObjectReference) -> Box<AtomicUsize> {
    Box::new(AtomicUsize::new(object.to_raw_address().as_usize()))
}

impl MockVM {
    /// Format an object of `size` words with `num_refs` null reference fields at `addr`.
    pub fn init_object(addr: Address, size: usize, num_refs: usize) -> ObjectReference {
        let fits = size >= FIRST_FIELD + num_refs;
        assert!(fits, "{} words cannot hold {} fields", size, num_refs);
        let object = ObjectReference::from_raw_address(addr);
        unsafe {
            word(object, FORWARDING_WORD).store(0usize);
            word(object, KLASS_WORD).store(size | (num_refs << NUM_REFS_SHIFT));
            for i in 0..size - FIRST_FIELD {
                word(object, FIRST_FIELD + i).store(0usize);
            }
        }
        object
    }

    pub fn num_refs(object: ObjectReference) -> usize {
        (Self::klass(object) >> NUM_REFS_SHIFT) & NUM_REFS_MASK
    }

    pub fn is_filler(object: ObjectReference) -> bool {
        Self::klass(object) & FILLER_BIT != 0
    }

    pub fn set_field(object: ObjectReference, i: usize, target: ObjectReference) {
        assert!(i < Self::num_refs(object));
        store_slot(word(object, FIRST_FIELD + i), target)
    }

    pub fn field(object: ObjectReference, i: usize) -> ObjectReference {
        assert!(i < Self::num_refs(object));
        load_slot(word(object, FIRST_FIELD + i))
    }

    /// Store `id` in the last word of the object. The object must have a payload word.
    pub fn set_id(object: ObjectReference, id: usize) {
        let size = Self::size_in_words(object);
        assert!(size > FIRST_FIELD + Self::num_refs(object));
        unsafe { word(object, size - 1).store(id) }
    }

    pub fn id(object: ObjectReference) -> usize {
        unsafe { word(object, Self::size_in_words(object) - 1).load::<usize>() }
    }

    pub fn add_root(object: ObjectReference) -> usize {
        write_mockvm(|roots| {
            roots.strong.push(new_slot(object));
            roots.strong.len() - 1
        })
    }

    pub fn root(i: usize) -> ObjectReference {
        read_mockvm(|roots| load_slot(slot_of(&roots.strong[i])))
    }

    pub fn add_weak_root(object: ObjectReference) -> usize {
        write_mockvm(|roots| {
            roots.weak.push(new_slot(object));
            roots.weak.len() - 1
        })
    }

    pub fn weak_root(i: usize) -> ObjectReference {
        read_mockvm(|roots| load_slot(slot_of(&roots.weak[i])))
    }

    pub fn add_soft_root(object: ObjectReference) -> usize {
        write_mockvm(|roots| {
            roots.soft.push(new_slot(object));
            roots.soft.len() - 1
        })
    }

    pub fn soft_root(i: usize) -> ObjectReference {
        read_mockvm(|roots| load_slot(slot_of(&roots.soft[i])))
    }
}

impl ObjectModel<MockVM> for MockVM {
    const MIN_FILL_WORDS: usize = 2;

    fn size_in_words(object: ObjectReference) -> usize {
        Self::klass(object) & SIZE_MASK
    }

    fn klass(object: ObjectReference) -> usize {
        unsafe { word(object, KLASS_WORD).load::<usize>() }
    }

    fn forward_to(object: ObjectReference, to: Address) {
        unsafe { word(object, FORWARDING_WORD).store(to) }
    }

    fn forwardee(object: ObjectReference) -> Option<Address> {
        let to = unsafe { word(object, FORWARDING_WORD).load::<Address>() };
        if to.is_zero() {
            None
        } else {
            Some(to)
        }
    }

    fn init_mark(object: ObjectReference) {
        unsafe { word(object, FORWARDING_WORD).store(0usize) }
    }

    fn scan_object<SV: SlotVisitor>(object: ObjectReference, visitor: &mut SV) {
        for i in 0..Self::num_refs(object) {
            visitor.visit_slot(word(object, FIRST_FIELD + i));
        }
    }

    fn fill_with_object(start: Address, words: usize) {
        assert!(words >= Self::MIN_FILL_WORDS);
        unsafe {
            start.store(0usize);
            (start + BYTES_IN_WORD).store(words | FILLER_BIT);
        }
    }
}

impl Scanning<MockVM> for MockVM {
    fn scan_roots<SV: SlotVisitor>(visitor: &mut SV) {
        read_mockvm(|roots| {
            for r in roots.strong.iter() {
                visitor.visit_slot(slot_of(r));
            }
        })
    }

    fn scan_weak_roots<SV: SlotVisitor>(visitor: &mut SV) {
        read_mockvm(|roots| {
            for r in roots.weak.iter() {
                visitor.visit_slot(slot_of(r));
            }
        })
    }

    fn scan_soft_roots<SV: SlotVisitor>(visitor: &mut SV) {
        read_mockvm(|roots| {
            for r in roots.soft.iter() {
                visitor.visit_slot(slot_of(r));
            }
        })
    }
}

/// Committed memory for tests that need a few regions without a heap.
pub struct TestHeapMemory {
    start: Address,
    bytes: usize,
}

impl TestHeapMemory {
    pub fn new(bytes: usize) -> Self {
        let start = memory::reserve(bytes, crate::mmap_anno_test!())
            .unwrap_or_else(|e| memory::handle_mmap_error(e, Address::ZERO, bytes));
        memory::commit(start, bytes).unwrap_or_else(|e| memory::handle_mmap_error(e, start, bytes));
        Self { start, bytes }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.bytes
    }
}

impl Drop for TestHeapMemory {
    fn drop(&mut self) {
        let _ = memory::release(self.start, self.bytes);
    }
}
