//! Action errors.

use thiserror::Error;

/// Boxed error raised by user code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while running mapping actions.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action reads the originating record, but the entry has none.
    #[error("action for `{record_type}` needs the originating record, but entity objects are not captured")]
    MissingRawRecord { record_type: String },

    /// The originating record is not of the type the action expects.
    #[error("originating record of `{record_type}` is not a `{expected}`")]
    SourceTypeMismatch {
        record_type: String,
        expected: &'static str,
    },

    /// A user callback failed.
    #[error("{0}")]
    Callback(BoxError),
}

impl ActionError {
    /// Wrap an error raised by a callback.
    pub fn callback(err: impl Into<BoxError>) -> Self {
        Self::Callback(err.into())
    }

    /// Whether the error stems from how mapping was configured rather than
    /// from the callback itself.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingRawRecord { .. } | Self::SourceTypeMismatch { .. })
    }

    /// Borrow the callback's original error as a concrete type.
    pub fn downcast_ref<T: std::error::Error + 'static>(&self) -> Option<&T> {
        match self {
            Self::Callback(err) => err.downcast_ref::<T>(),
            _ => None,
        }
    }
}
