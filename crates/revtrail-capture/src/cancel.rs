//! Stopping a save before its commit.
//!
//! A [`SaveCancellation`] is shared between the caller and the coordinator.
//! The coordinator looks at it at fixed points of the save, and the point
//! where it stopped is reported as a [`CancelPoint`]. Once the commit has
//! started a request is ignored.

use std::sync::Arc;
use strum::Display;
use tokio::sync::watch;

/// Where a cancelled save stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CancelPoint {
    /// Nothing was emitted; the started event was never sent.
    #[strum(to_string = "before emission")]
    BeforeEmission,
    /// The started event was being inserted when the request arrived.
    #[strum(to_string = "during emission")]
    DuringEmission,
    /// Mapping (and any early emission) finished, the commit did not start.
    #[strum(to_string = "before commit")]
    BeforeCommit,
}

/// Cancellation request for one or more saves.
///
/// Clones share the same request.
#[derive(Debug, Clone)]
pub struct SaveCancellation {
    requested: Arc<watch::Sender<bool>>,
}

impl SaveCancellation {
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            requested: Arc::new(requested),
        }
    }

    /// Ask every save holding this handle to stop before its commit.
    pub fn cancel(&self) {
        self.requested.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.requested.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub(crate) async fn requested(&self) {
        let mut rx = self.requested.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|requested| *requested).await;
    }
}

impl Default for SaveCancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_clones_share_the_request() {
        let cancel = SaveCancellation::new();
        let held = cancel.clone();
        assert!(!held.is_requested());

        cancel.cancel();
        assert!(held.is_requested());
        tokio_test::block_on(held.requested());
    }

    #[test]
    fn test_waiter_is_woken_by_cancel() {
        let cancel = SaveCancellation::new();
        let mut waiting = task::spawn(cancel.requested());
        assert_pending!(waiting.poll());

        cancel.cancel();
        assert!(waiting.is_woken());
        assert_ready!(waiting.poll());
    }

    #[test]
    fn test_cancel_point_messages() {
        assert_eq!(CancelPoint::BeforeEmission.to_string(), "before emission");
        assert_eq!(CancelPoint::DuringEmission.to_string(), "during emission");
        assert_eq!(CancelPoint::BeforeCommit.to_string(), "before commit");
    }
}
