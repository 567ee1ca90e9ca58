// Error types for drain orchestration
//
// Two layers:
// - ApiError: what a collaborator call (control plane, lifecycle API, queue) reports
// - BatchError: failures that abort a whole batch and hand it back to the queue

use thiserror::Error;

/// Result type alias for collaborator calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error reported by an external collaborator
///
/// The variants only differ in how they are logged. Callers that need to
/// decide between retry and drop look at the operation, not the variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The request never got a usable answer (network, timeout, SDK dispatch)
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered and refused the request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The service answered with something we could not interpret
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        ApiError::Transport(msg.into())
    }

    /// Create a rejection error
    pub fn rejected(msg: impl Into<String>) -> Self {
        ApiError::Rejected(msg.into())
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        ApiError::Malformed(msg.into())
    }
}

/// Failure that aborts processing of an entire batch
///
/// No notification can make progress without a token and a worker directory,
/// so these are surfaced to the caller, which lets the queue redeliver.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("authentication failed: {0}")]
    Authentication(#[source] ApiError),

    #[error("worker directory unavailable: {0}")]
    Directory(#[source] ApiError),
}
