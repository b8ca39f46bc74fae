//! Error types for copro-link.

use thiserror::Error;

use crate::endpoint::EndpointHandle;
use crate::hdlc::FrameError;

/// Errors surfaced by the link API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Endpoint is in the wrong lifecycle phase for the operation.
    #[error("invalid endpoint state")]
    InvalidState,

    /// Capability mismatch or bad argument.
    #[error("invalid parameter")]
    InvalidParameter,

    /// Contention or resource exhaustion, retry later.
    #[error("busy")]
    Busy,

    /// Endpoint pool or id range exhausted.
    #[error("no more resources")]
    NoMoreResource,

    /// An open endpoint already uses this id.
    #[error("endpoint already exists")]
    AlreadyExists,

    /// The handle no longer refers to a live endpoint.
    #[error("stale endpoint handle")]
    Ownership,

    /// No data queued.
    #[error("empty")]
    Empty,

    /// Nothing available to act on.
    #[error("not available")]
    NotAvailable,

    /// A write could not be delivered before teardown or error cleanup.
    #[error("transmit incomplete")]
    TransmitIncomplete,

    /// Frame codec error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl LinkError {
    /// Check if the caller may retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::Busy | LinkError::Empty)
    }
}

/// Errors reported by a driver on transmit.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The driver cannot take a frame right now.
    #[error("driver busy")]
    Busy,

    /// The driver rejected the frame.
    #[error("driver failure")]
    Failed,
}

impl From<DriverError> for LinkError {
    fn from(_: DriverError) -> Self {
        LinkError::Busy
    }
}

/// Errors reported by a pool on acquire.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// All entries of the requested kind are in use.
    #[error("pool exhausted")]
    Exhausted,
}

impl From<PoolError> for LinkError {
    fn from(_: PoolError) -> Self {
        LinkError::Busy
    }
}

/// Error returned by a rejected close, handing the handle back for a retry.
#[derive(Debug, Error)]
#[error("close failed: {error}")]
pub struct CloseError {
    /// Why the close was rejected.
    pub error: LinkError,
    /// The handle, still valid.
    pub handle: EndpointHandle,
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(LinkError::Busy.is_retryable());
        assert!(LinkError::Empty.is_retryable());

        assert!(!LinkError::InvalidState.is_retryable());
        assert!(!LinkError::AlreadyExists.is_retryable());
    }

    #[test]
    fn test_collaborator_errors_map_to_busy() {
        assert_eq!(LinkError::from(DriverError::Busy), LinkError::Busy);
        assert_eq!(LinkError::from(DriverError::Failed), LinkError::Busy);
        assert_eq!(LinkError::from(PoolError::Exhausted), LinkError::Busy);
    }

    #[test]
    fn test_frame_error_wraps() {
        let err: LinkError = FrameError::InvalidStartMarker(0x7E).into();
        assert!(matches!(err, LinkError::Frame(FrameError::InvalidStartMarker(0x7E))));
        assert!(err.to_string().contains("0x7e"));
    }
}
