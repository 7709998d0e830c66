use crate::vm::object_model::SlotVisitor;
use crate::vm::VMBinding;

/// Where the roots of the object graph are. All functions are called at a safepoint.
pub trait Scanning<VM: VMBinding> {
    /// Report every strong root slot.
    fn scan_roots<SV: SlotVisitor>(visitor: &mut SV);

    /// Report every weak root slot. A weak root whose referent is dead is cleared after marking.
    fn scan_weak_roots<SV: SlotVisitor>(visitor: &mut SV);

    /// Report every soft root slot. Soft roots are strong unless a collection clears soft
    /// references, in which case they are treated like weak roots.
    fn scan_soft_roots<SV: SlotVisitor>(visitor: &mut SV);
}
