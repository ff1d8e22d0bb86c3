use tapcard_transport::TransportError;
use thiserror::Error;

use crate::identity::CardIdentity;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, CardError>;

/// Invalid user input, rejected before any card interaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// PIN length out of range
    #[error("PIN must be between 6 and 32 digits, got {0}")]
    PinLength(usize),

    /// PIN contains a non-digit character
    #[error("PIN must only contain digits")]
    PinNotNumeric,

    /// Chain code is not valid hex
    #[error("Chain code is not valid hex: {0}")]
    ChainCodeHex(String),

    /// Chain code has the wrong length
    #[error("Chain code must be 32 bytes, got {0}")]
    ChainCodeLength(usize),

    /// Card public key has the wrong length
    #[error("Card public key must be 33 bytes, got {0}")]
    CardPublicKeyLength(usize),

    /// Card identity string is malformed
    #[error("Malformed card identity: {0}")]
    CardIdentity(String),
}

/// Errors from the platform radio
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// The device has no contactless radio
    #[error("Radio hardware unavailable")]
    Unavailable,

    /// The radio exists but is switched off
    #[error("Radio disabled")]
    Disabled,

    /// The platform refused to start reader mode
    #[error("Failed to enable radio: {0}")]
    Failed(String),
}

/// Errors reported by a card codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The card rejected the PIN
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The transport failed mid-exchange
    #[error(transparent)]
    Link(#[from] TransportError),

    /// The card answered with an error status
    #[error("Card error {code:#06x}: {message}")]
    Card {
        /// Status word
        code: u16,
        /// Description of the status
        message: String,
    },

    /// The response could not be decoded
    #[error("Failed to decode card response: {0}")]
    Decode(String),

    /// The card is not of a supported kind or state
    #[error("Unsupported card: {0}")]
    UnsupportedCard(String),
}

impl CodecError {
    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Create a card status error
    pub fn card(code: u16, message: impl Into<String>) -> Self {
        Self::Card {
            code,
            message: message.into(),
        }
    }

    /// Whether the exchange was cut off by the physical link
    pub const fn is_interruption(&self) -> bool {
        matches!(
            self,
            Self::Link(TransportError::LinkLost | TransportError::Closed)
        )
    }
}

/// Errors surfaced to callers of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    /// No contactless radio on this device
    #[error("NFC hardware unavailable")]
    HardwareUnavailable,

    /// The radio is switched off
    #[error("NFC disabled")]
    HardwareDisabled,

    /// No card was presented before the deadline
    #[error("Timed out waiting for a card")]
    Timeout,

    /// The card left the field mid-exchange
    #[error("Lost connection to the card")]
    LinkLost,

    /// The card rejected the PIN
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The card returned something unusable
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The continuation state was already used
    #[error("Continuation state already consumed")]
    ContinuationConsumed,

    /// A continuation was presented to a different card
    #[error("Expected card {expected}, found {found}")]
    WrongCard {
        /// Card the continuation belongs to
        expected: CardIdentity,
        /// Card that was presented
        found: CardIdentity,
    },

    /// The command arguments were rejected
    #[error(transparent)]
    InvalidInput(#[from] ValidationError),

    /// A convenience method got a response of another kind
    #[error("Unexpected response, expected {0}")]
    UnexpectedResponse(&'static str),
}

impl CardError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            Self::HardwareUnavailable => "NFC is not available on this device".into(),
            Self::HardwareDisabled => "NFC is disabled, please enable it in Settings".into(),
            Self::Timeout | Self::LinkLost => {
                "Tag connection lost, please hold your device still".into()
            }
            Self::AuthFailed(_) => "Wrong PIN, please try again".into(),
            Self::ProtocolError(_) | Self::ContinuationConsumed => {
                "Setup failed, please start over".into()
            }
            Self::Cancelled => "Scan cancelled".into(),
            Self::WrongCard { expected, .. } => {
                format!("Wrong card, please tap card {expected}")
            }
            Self::InvalidInput(e) => e.to_string(),
            Self::UnexpectedResponse(_) => "Unexpected card response".into(),
        }
    }

    /// Whether repeating the same request may succeed
    ///
    /// Authentication failures count: the user can re-enter the PIN.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::LinkLost | Self::AuthFailed(_) | Self::WrongCard { .. }
        )
    }
}

impl From<TransportError> for CardError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::LinkLost | TransportError::Closed => Self::LinkLost,
            TransportError::Unsupported(message) => Self::ProtocolError(message),
        }
    }
}

impl From<CodecError> for CardError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Auth(message) => Self::AuthFailed(message),
            CodecError::Link(e) => e.into(),
            other => Self::ProtocolError(other.to_string()),
        }
    }
}

impl From<RadioError> for CardError {
    fn from(error: RadioError) -> Self {
        match error {
            RadioError::Unavailable | RadioError::Failed(_) => Self::HardwareUnavailable,
            RadioError::Disabled => Self::HardwareDisabled,
        }
    }
}
