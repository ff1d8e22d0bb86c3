//! Observable session state

use tokio::sync::watch;
use tokio::time::Instant;

use crate::command::CommandKind;

/// Lifecycle of the single active session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session in progress
    Idle,
    /// Radio enabled, waiting for a card
    AwaitingTag {
        /// When the wait gives up
        deadline: Instant,
    },
    /// A card was detected and the transport is being opened
    Connected,
    /// A command is running against the card
    Executing(CommandKind),
    /// Releasing the transport and the radio
    TearingDown,
}

impl SessionState {
    /// Whether a session is in progress
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Receiver of session state changes
pub type StateReceiver = watch::Receiver<SessionState>;
