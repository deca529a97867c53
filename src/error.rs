use crate::matcher::MatcherError;
use thiserror::Error;

/// Error handling for verification, identification and gallery loading.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AfisError {
    /// A template failed structural validation.
    ///
    /// This variant is a caller error: the probe or candidate handed to
    /// `verify`/`identify` is malformed. It is surfaced immediately and never retried.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// No gallery entries exist for the requested partition.
    ///
    /// This is a valid outcome rather than an exceptional one. Callers normally
    /// map it to "no match".
    #[error("Gallery partition not found: {0}")]
    NotFound(String),

    /// The matcher capability itself failed.
    ///
    /// The associated string describes the systemic failure. The whole
    /// operation is aborted since its result could not be trusted.
    #[error("Matcher fault: {0}")]
    MatcherFault(String),

    /// The operation was cancelled by the caller or by the search timeout.
    #[error("Operation cancelled")]
    Cancelled,

    /// The gallery source could not be enumerated at all.
    #[error("Gallery source error: {0}")]
    Source(String),

    /// Configuration is missing or invalid.
    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    /// Work was dispatched to a worker pool that has been shut down.
    #[error("Worker pool is shut down")]
    PoolShutdown,
}

impl From<MatcherError> for AfisError {
    fn from(err: MatcherError) -> Self {
        match err {
            MatcherError::InvalidTemplate(reason) => AfisError::InvalidTemplate(reason),
            MatcherError::Fault(reason) => AfisError::MatcherFault(reason),
        }
    }
}
