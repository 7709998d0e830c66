//! Small helpers that are not specific to the collector.

pub mod lazy_init;
