//! Routing capability error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for routing calls.
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Errors returned by a routing capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("peer not configured: {0}")]
    PeerNotFound(String),

    #[error("route {route} rejected: {reason}")]
    Rejected { route: String, reason: String },

    #[error("routing session closed")]
    SessionClosed,

    #[error("routing call timed out after {0:?}")]
    Timeout(Duration),

    #[error("speaker error: {0}")]
    Speaker(String),
}
