//! The interface between the collector and the runtime it manages.

pub mod object_model;
pub mod scanning;
mod vmbinding;

pub use self::object_model::{ObjectModel, SlotVisitor};
pub use self::scanning::Scanning;
pub use self::vmbinding::VMBinding;
