//! Region liveness tracking, collection set candidate selection and full-heap compaction
//! for a region-based ("garbage first") garbage collector.
//!
//! The heap is a [`G1Heap`](policy::g1::G1Heap) of equally sized regions in one reserved
//! range of address space. A runtime plugs into it by implementing
//! [`VMBinding`](vm::VMBinding), which describes its object layout
//! ([`ObjectModel`](vm::ObjectModel)) and its roots ([`Scanning`](vm::Scanning)).
//!
//! Logging goes through the `log` crate. With the default `builtin_env_logger` feature,
//! creating a heap installs `env_logger` ([`util::logger::try_init`]), so
//! `RUST_LOG=mmtk_g1=debug` shows the phases of each full collection. Options are read from `MMTK_`-prefixed
//! environment variables, see [`util::options::Options`].

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate probe;

pub mod build_info;
pub mod policy;
pub mod scheduler;
pub mod util;
pub mod vm;

#[cfg(test)]
mod tests;

pub use crate::policy::g1::{G1Heap, HeapRegion, RegionType};
pub use crate::util::options::Options;
pub use crate::util::{Address, ObjectReference};
