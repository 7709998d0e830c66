use crate::vm::{ObjectModel, Scanning};

/// The `VMBinding` trait ties together everything the collector needs from the runtime it
/// serves: how objects are laid out, and where the roots are.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    type VMObjectModel: ObjectModel<Self>;
    type VMScanning: Scanning<Self>;
}
