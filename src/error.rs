//! Error taxonomy for the scheduled-call engine.
//!
//! Every variant is terminal at the boundary where it occurs: the loops and
//! the dispatcher log and degrade, nothing here unwinds into presentation.

/// Engine-level error returned by the record store, the reconciliation
/// cycle and the command layer.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Read or write failure on the persistence layer.
    #[error("storage error: {0}")]
    Storage(String),

    /// The user declined notification delivery.
    #[error("notification permission denied")]
    PermissionDenied,

    /// The notification platform rejected a request.
    #[error("dispatch failure: {0}")]
    DispatchFailure(String),

    /// Uncaught failure inside a background cycle or task registration.
    #[error("background task failure: {0}")]
    BackgroundTaskFailure(String),

    /// Caller-supplied data is incomplete or conflicts with stored data.
    #[error("invalid call: {0}")]
    Validation(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Storage(format!("{err:#}"))
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
