use crate::policy::g1::{G1Heap, HeapRegion};
use crate::util::constants::LOG_BYTES_IN_WORD;
use crate::util::options::Options;
use crate::util::test_util::mock_vm::MockVM;
use crate::util::ObjectReference;
use crate::vm::ObjectModel;

/// The smallest region size, so a test heap of a few regions stays small.
pub const REGION_BYTES: usize = 1 << 16;
pub const REGION_WORDS: usize = REGION_BYTES >> LOG_BYTES_IN_WORD;
/// Size of the objects the fixtures allocate: one reference field and an id.
pub const OBJECT_WORDS: usize = 64;
pub const OBJECTS_PER_REGION: usize = REGION_WORDS / OBJECT_WORDS;

pub fn test_options(threads: usize) -> Options {
    let mut options = Options::default();
    let region_size = REGION_BYTES.to_string();
    assert!(options.set_from_str("region_size", &region_size));
    assert!(options.set_from_str("threads", &threads.to_string()));
    options
}

/// A heap of `num_regions` regions whose full collections use exactly `threads` workers.
pub fn fixed_worker_heap(num_regions: usize, threads: usize) -> G1Heap<MockVM> {
    let mut options = test_options(threads);
    assert!(options.set_from_str("use_dynamic_gc_threads", "false"));
    G1Heap::new(options, num_regions * REGION_BYTES)
}

/// A heap of `num_regions` regions that sizes its worker gang itself.
pub fn dynamic_worker_heap(num_regions: usize, threads: usize) -> G1Heap<MockVM> {
    G1Heap::new(test_options(threads), num_regions * REGION_BYTES)
}

/// Allocate an object with `num_refs` null fields and `id` as its last word.
pub fn alloc_object(r: &HeapRegion, words: usize, num_refs: usize, id: usize) -> ObjectReference {
    let addr = r
        .allocate(words)
        .unwrap_or_else(|| panic!("{:?} has no room for {} words", r, words));
    let object = MockVM::init_object(addr, words, num_refs);
    MockVM::set_id(object, id);
    object
}

/// Fill `r` with `OBJECTS_PER_REGION` objects. The `i`th object has id `r * 1000 + i`.
pub fn fill_region(r: &HeapRegion) -> Vec<ObjectReference> {
    (0..OBJECTS_PER_REGION)
        .map(|i| alloc_object(r, OBJECT_WORDS, 1, r.hrm_index() * 1000 + i))
        .collect()
}

/// Link `objects` through their first field and make the first one a strong root. Returns
/// the root index.
pub fn root_chain(objects: &[ObjectReference]) -> usize {
    for pair in objects.windows(2) {
        MockVM::set_field(pair[0], 0, pair[1]);
    }
    MockVM::add_root(objects[0])
}

/// The objects reachable from strong root `root` through first fields.
pub fn follow_chain(root: usize) -> Vec<ObjectReference> {
    let mut objects = vec![];
    let mut next = MockVM::root(root);
    while !next.is_null() {
        objects.push(next);
        next = if MockVM::num_refs(next) > 0 {
            MockVM::field(next, 0)
        } else {
            ObjectReference::NULL
        };
    }
    objects
}

pub fn ids(objects: &[ObjectReference]) -> Vec<usize> {
    objects.iter().map(|&o| MockVM::id(o)).collect()
}

/// The objects of `r`, walked from bottom to top.
pub fn region_objects(r: &HeapRegion) -> Vec<ObjectReference> {
    let mut objects = vec![];
    r.object_iterate::<MockVM>(|o| objects.push(o));
    objects
}

pub fn used_words(r: &HeapRegion) -> usize {
    r.used() >> LOG_BYTES_IN_WORD
}

pub fn assert_not_forwarded(objects: &[ObjectReference]) {
    for &o in objects {
        assert!(!MockVM::is_forwarded(o), "{} is still forwarded", o);
    }
}
