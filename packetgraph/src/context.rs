//! The user-context contract for cloneable segments.
//!
//! The original design calls for an explicit `copy()`/`delete()` pair on any context attached to a
//! clonable segment, with the runtime guaranteeing `delete()` fires exactly once per clone on
//! retirement. In Rust that guarantee already falls out of ordinary ownership: a
//! `Box<dyn CloneableContext>` is dropped exactly once, by whichever worker owns it, when that
//! worker's state is dropped. `clone_box` stands in for `copy()`.
use std::any::Any;

/// A context a user callable can carry across a burst, and across a scheduler-initiated clone.
///
/// Implement this only for contexts attached to a segment that the scheduler may clone (the
/// built-in [`crate::partition::PartitionContext`] always does). Contexts on non-clonable segments
/// can instead be stored directly without going through this trait.
pub trait CloneableContext: Any {
    /// Produces an independent copy for a new worker clone.
    fn clone_box(&self) -> Box<dyn CloneableContext>;

    /// Upcasts to `&dyn Any`, so callables can downcast back to their concrete context type.
    fn as_any(&self) -> &dyn Any;

    /// Upcasts to `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn CloneableContext> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Blanket impl for any `Clone + 'static` type, so most user contexts need no boilerplate.
impl<T> CloneableContext for T
where
    T: Clone + Any + 'static,
{
    fn clone_box(&self) -> Box<dyn CloneableContext> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
