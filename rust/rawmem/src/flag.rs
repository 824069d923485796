use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean that can step from its initial state to the final state exactly once.
///
/// Used for resource validity (`valid -> released`) and resource mutability
/// (`writable -> read-only`). The transition is a compare-exchange, so among concurrent
/// callers of [`StepFlag::step`] exactly one observes `true`.
#[derive(Debug, Default)]
pub struct StepFlag(AtomicBool);

impl StepFlag {
    /// Creates a flag in its initial state.
    pub const fn new() -> StepFlag {
        StepFlag(AtomicBool::new(false))
    }

    /// Creates a flag that has already stepped.
    pub const fn stepped() -> StepFlag {
        StepFlag(AtomicBool::new(true))
    }

    /// Returns `true` once the flag has stepped.
    #[inline]
    pub fn is_stepped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Performs the transition. Returns `true` only for the call that changed the state.
    #[inline]
    pub fn step(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
