// Full collections on the mock VM.
//
// The mock VM keeps its roots in a process-wide table, so every test here runs inside
// `with_mockvm`, which serializes the tests and empties the table before and after each.
//
// Mock tests should have the prefix 'mock_test_' in their file name.

pub(crate) mod fixtures;

// Common includes for mock tests.
pub(crate) mod mock_test_prelude {
    pub use super::fixtures::*;
    pub use crate::policy::g1::{G1Heap, HeapRegion, RegionType};
    pub use crate::util::options::Options;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::{Address, ObjectReference};
    pub use crate::vm::*;
}

mod mock_test_full_gc_pinned;
mod mock_test_full_gc_serial;
mod mock_test_full_gc_workers;
