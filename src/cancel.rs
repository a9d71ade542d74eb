//! Cooperative cancellation primitive threaded through the workflow, the
//! evaluator, and the progress sidecar.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply cloneable cancellation flag.
///
/// Checks occur before each loadout evaluation and at stage boundaries; there
/// is no forced abort, the coarsest cancellable unit is one loadout.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a fresh, not-yet-canceled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    #[inline]
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    /// True once [`Self::cancel`] has been called on this token or a clone of it.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }
}
