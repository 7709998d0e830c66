//! Heap management policies.

/// The region-based garbage-first heap: regions, their remembered sets and liveness, the
/// collection set candidates, and the full-heap compacting collector.
pub mod g1;
