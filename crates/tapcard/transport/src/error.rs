//! Error types specific to card transport

use thiserror::Error;

/// Transport error type
///
/// Every physical-layer failure collapses into [`TransportError::LinkLost`].
/// The transport never retries on its own; retry is a caller decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The physical link dropped, could not be re-established, or the
    /// exchange failed mid-flight
    #[error("Tag connection lost, please hold your device still")]
    LinkLost,

    /// The transport was used after it was closed
    #[error("Transport is closed")]
    Closed,

    /// The detected tag does not speak the expected technology
    #[error("Unsupported tag: {0}")]
    Unsupported(String),
}

impl TransportError {
    /// Create a new unsupported-tag error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::Unsupported(message.into())
    }

    /// Check if this error is a lost link
    pub const fn is_link_lost(&self) -> bool {
        matches!(self, Self::LinkLost)
    }
}

/// Failure reported by a platform physical link
///
/// This carries the platform's own description. The transport logs it and
/// maps it to [`TransportError::LinkLost`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct LinkError(pub String);

impl LinkError {
    /// Create a new link error with a message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

impl From<LinkError> for TransportError {
    fn from(_: LinkError) -> Self {
        Self::LinkLost
    }
}
