//! Physical link abstraction
//!
//! A physical link is the platform's handle on a detected tag (an ISO 14443-4
//! connection on most phones). It knows nothing about APDU structure.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::LinkError;

/// Platform handle for a detected tag
#[async_trait]
pub trait PhysicalLink: Send + Sync + fmt::Debug {
    /// Check if the link is currently connected
    fn is_connected(&self) -> bool;

    /// Establish (or re-establish) the connection to the tag
    async fn connect(&mut self) -> Result<(), LinkError>;

    /// Exchange one raw command for one raw response
    ///
    /// The response includes the trailing status word.
    async fn transceive(&mut self, command: &[u8]) -> Result<Bytes, LinkError>;

    /// Close the connection
    ///
    /// Closing is synchronous so that it can run from `Drop` when a session
    /// future is cancelled. Closing an already-closed link is a no-op.
    fn close(&mut self);
}

#[async_trait]
impl<L: PhysicalLink + ?Sized> PhysicalLink for Box<L> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        (**self).connect().await
    }

    async fn transceive(&mut self, command: &[u8]) -> Result<Bytes, LinkError> {
        (**self).transceive(command).await
    }

    fn close(&mut self) {
        (**self).close()
    }
}
