//! Transport traits for raw byte exchange with a card
//!
//! A transport moves command and response buffers between a card codec and a
//! physical link, and carries progress text towards the user. It has no
//! knowledge of command structure.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::link::PhysicalLink;
use crate::progress::ProgressSink;

/// Trait for card transports
#[async_trait]
pub trait CardTransport: Send + fmt::Debug {
    /// Send raw command bytes to the card and return the response bytes
    ///
    /// Implementations attempt exactly one exchange. A failure is reported,
    /// never retried.
    async fn transmit(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit(command).await;
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = ?e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit
    /// This is the method that concrete implementations should override
    async fn do_transmit(&mut self, command: &[u8]) -> Result<Bytes, TransportError>;

    /// Replace the user-facing progress message
    fn set_message(&self, message: &str);

    /// Append to the user-facing progress message
    fn append_message(&self, message: &str);
}

/// Transport over a [`PhysicalLink`]
pub struct LinkTransport<L: PhysicalLink> {
    link: L,
    progress: ProgressSink,
    closed: bool,
    exchanges: usize,
}

impl<L: PhysicalLink> fmt::Debug for LinkTransport<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkTransport")
            .field("link", &self.link)
            .field("closed", &self.closed)
            .field("exchanges", &self.exchanges)
            .finish_non_exhaustive()
    }
}

impl<L: PhysicalLink> LinkTransport<L> {
    /// Open a transport on top of a link, connecting it if needed
    ///
    /// The link is closed if connecting fails or the returned future is
    /// dropped before it completes.
    pub async fn open(link: L, progress: ProgressSink) -> Result<Self, TransportError> {
        let mut transport = Self {
            link,
            progress,
            closed: false,
            exchanges: 0,
        };

        if !transport.link.is_connected() {
            if let Err(e) = transport.link.connect().await {
                warn!(error = %e, "Failed to connect to tag");
                transport.close();
                return Err(TransportError::LinkLost);
            }
        }

        debug!("Transport opened");
        Ok(transport)
    }

    /// Close the transport and the underlying link
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.link.close();
            debug!(exchanges = self.exchanges, "Transport closed");
        }
    }

    /// Check if the transport has been closed
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of exchanges attempted on this transport
    pub const fn exchanges(&self) -> usize {
        self.exchanges
    }

    /// Get a reference to the underlying link
    pub const fn link(&self) -> &L {
        &self.link
    }
}

#[async_trait]
impl<L: PhysicalLink> CardTransport for LinkTransport<L> {
    async fn do_transmit(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        // Re-establish a dropped connection before the single attempt
        if !self.link.is_connected() {
            debug!("Link reports disconnected, reconnecting");
            self.link.connect().await.map_err(|e| {
                warn!(error = %e, "Reconnect failed");
                TransportError::LinkLost
            })?;
        }

        self.exchanges += 1;
        self.link.transceive(command).await.map_err(|e| {
            warn!(error = %e, "Exchange failed");
            TransportError::LinkLost
        })
    }

    fn set_message(&self, message: &str) {
        self.progress.set(message);
    }

    fn append_message(&self, message: &str) {
        self.progress.append(message);
    }
}

impl<L: PhysicalLink> Drop for LinkTransport<L> {
    fn drop(&mut self) {
        self.close();
    }
}
