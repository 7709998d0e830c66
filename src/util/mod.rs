//! Utilities shared by the heap and its collectors.

/// Address and object reference types.
pub mod address;
/// Allocators for collector metadata.
pub mod alloc;
/// Constants for sizes of words, pages, cards and regions.
pub mod constants;
/// Alignment and size conversions.
pub mod conversions;
/// An intrusive doubly linked list of indices.
pub mod linked_list;
/// Logger initialization
pub mod logger;
/// Wrappers around mmap.
pub mod memory;
/// Collector options.
pub mod options;
/// Helpers the standard library does not have.
pub mod rust_util;

/// Testing utilities, and the mock runtime.
#[cfg(any(test, feature = "test_private"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
