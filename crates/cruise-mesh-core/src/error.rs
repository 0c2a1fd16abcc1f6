//! Error types for the Cruise Mesh core.

use thiserror::Error;

/// Errors raised when constructing core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("message id must not be empty")]
    EmptyMessageId,

    #[error("endpoint id must not be empty")]
    EmptyEndpointId,
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
