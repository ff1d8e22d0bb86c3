//! Byte-level transport to a contactless card
//!
//! This crate provides the lowest layer of a card session:
//!
//! - [`PhysicalLink`]: the platform's handle on a detected tag
//! - [`CardTransport`]: a request/response primitive plus a progress side channel
//! - [`LinkTransport`]: the transport implementation on top of a physical link
//! - [`ProgressSink`]: fan-out of advisory progress text
//!
//! Transports have no protocol knowledge and never retry. Any physical-layer
//! failure is reported as [`TransportError::LinkLost`].
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub use bytes::Bytes;

mod error;
mod link;
pub mod progress;
mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{LinkError, TransportError};
pub use link::PhysicalLink;
pub use progress::{ProgressMessage, ProgressReceiver, ProgressSink};
pub use transport::{CardTransport, LinkTransport};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, CardTransport, LinkError, LinkTransport, PhysicalLink, ProgressMessage,
        ProgressSink, TransportError,
    };
}
