//! Shared shutdown signal for the event server.
//!
//! One [`Lifecycle`] is shared by the accept loop and every connection reader.
//! Each reader also holds a [`Lifecycle::child`] so it can be stopped on its
//! own without touching the others.

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    token: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the signal. Later calls have no effect.
    pub fn trip(&self) {
        self.token.cancel();
    }

    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal is tripped.
    pub fn tripped(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A signal tripped together with this one, or independently.
    pub fn child(&self) -> Lifecycle {
        Lifecycle {
            token: self.token.child_token(),
        }
    }
}
