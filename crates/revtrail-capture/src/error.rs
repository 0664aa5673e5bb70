//! Errors raised while auditing a save.

use crate::cancel::CancelPoint;
use crate::state::LifecycleState;
use revtrail_mapping::{ActionError, BoxError};
use thiserror::Error;

/// Errors surfaced by the lifecycle coordinator.
///
/// Errors that originate outside the engine keep the original boxed error,
/// so its message is shown unchanged and its type can be recovered with
/// [`AuditError::downcast_ref`].
#[derive(Debug, Error)]
pub enum AuditError {
    /// The audit configuration cannot work as set up.
    #[error("invalid audit configuration: {0}")]
    Configuration(String),

    /// A mapping action failed; nothing was committed.
    #[error(transparent)]
    Action(#[from] ActionError),

    /// The underlying commit failed.
    #[error("{0}")]
    Commit(BoxError),

    /// The event sink failed.
    #[error("{0}")]
    Sink(BoxError),

    /// The secondary audit store failed.
    #[error("{0}")]
    AuditStore(BoxError),

    /// The save was cancelled before the commit.
    #[error("save cancelled {0}")]
    Cancelled(CancelPoint),

    /// The coordinator was driven out of order.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl AuditError {
    /// Borrow the original error as a concrete type.
    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        match self {
            Self::Action(err) => err.downcast_ref::<T>(),
            Self::Commit(err) | Self::Sink(err) | Self::AuditStore(err) => err.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Where the save stopped, if it was cancelled.
    pub fn cancel_point(&self) -> Option<CancelPoint> {
        match self {
            Self::Cancelled(point) => Some(*point),
            _ => None,
        }
    }

    /// Whether the commit itself failed.
    pub fn is_commit(&self) -> bool {
        matches!(self, Self::Commit(_))
    }
}
