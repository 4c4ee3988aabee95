//! Pipeline error types

use crate::backends::BackendError;
use crate::strategy::StorageError;
use thiserror::Error;

/// Errors raised while running a pipeline
///
/// Step failures are carried through unchanged; the executor never retries
/// or cleans up partial pipeline state on this path.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configured step address has no registered step
    #[error("Pipeline step '{address}' could not be resolved")]
    Resolution { address: String },

    /// A step address does not follow the `module.name` / `module::name` grammar
    #[error("Invalid pipeline step address '{address}'")]
    InvalidAddress { address: String },

    #[error(transparent)]
    Step(#[from] StepError),
}

/// Errors a step may raise
#[derive(Debug, Error)]
pub enum StepError {
    /// The user is not allowed to authenticate with this backend
    #[error("Authentication forbidden by backend {0}")]
    Forbidden(String),

    /// The social identity already belongs to another user
    #[error("This {0} account is already in use")]
    AlreadyAssociated(String),

    /// Removing the association would lock the user out
    #[error("Not allowed to disconnect {0}")]
    NotAllowedToDisconnect(String),

    /// A required context value is absent
    #[error("Missing pipeline value: {0}")]
    MissingValue(String),

    /// A context value does not have the expected shape
    #[error("Invalid pipeline value '{key}': {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Free-form failure from a user-supplied step
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
