//! Platform radio abstraction
//!
//! The radio is enabled for the duration of a single session and reports
//! detected tags through a [`TagHandler`]. Handlers may be invoked from any
//! thread, so they must be cheap and non-blocking.

use std::fmt;

use bytes::Bytes;
use tapcard_transport::PhysicalLink;

use crate::error::RadioError;

/// Radio state as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioAvailability {
    /// No contactless hardware
    Unavailable,
    /// Hardware present but switched off
    Disabled,
    /// Ready to scan
    Ready,
}

/// A tag detected by the radio
pub struct Tag {
    uid: Bytes,
    link: Box<dyn PhysicalLink>,
}

impl Tag {
    /// Create a tag from its UID and a link to it
    pub fn new(uid: impl Into<Bytes>, link: Box<dyn PhysicalLink>) -> Self {
        Self {
            uid: uid.into(),
            link,
        }
    }

    /// Tag UID as reported by the radio
    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    /// Take the physical link
    pub fn into_link(self) -> Box<dyn PhysicalLink> {
        self.link
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("uid", &hex::encode(&self.uid))
            .finish_non_exhaustive()
    }
}

/// Receiver of tag detection events
pub trait TagHandler: Send {
    /// Handle a detected tag
    fn handle_tag(&mut self, tag: Tag);
}

impl<F> TagHandler for F
where
    F: FnMut(Tag) + Send,
{
    fn handle_tag(&mut self, tag: Tag) {
        self(tag)
    }
}

/// Platform radio
///
/// `enable` and `disable` are synchronous so that teardown can run from
/// `Drop` when a session is cancelled.
pub trait RadioLayer: Send + Sync + fmt::Debug {
    /// Query whether the radio can be used right now
    fn availability(&self) -> RadioAvailability;

    /// Start scanning, reporting detected tags to `handler`
    fn enable(&self, handler: Box<dyn TagHandler>) -> Result<(), RadioError>;

    /// Stop scanning and drop the handler
    fn disable(&self);
}
