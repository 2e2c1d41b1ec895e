use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AccessError;

/// Cooperative cancellation flag shared between a caller and a running
/// transaction. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the token has been triggered.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Cancelled`] after [`Self::cancel`].
    pub fn check(&self) -> Result<(), AccessError> {
        if self.is_cancelled() {
            Err(AccessError::Cancelled)
        } else {
            Ok(())
        }
    }
}
