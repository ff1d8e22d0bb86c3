//! Commands accepted by the orchestrator
//!
//! A [`Command`] carries everything one card presentation needs. Secrets are
//! validated when they are constructed, never on the card.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use derive_more::Display;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ValidationError;
use crate::setup::ContinuationState;

/// Minimum number of digits in a card PIN
pub const MIN_PIN_LENGTH: usize = 6;
/// Maximum number of digits in a card PIN
pub const MAX_PIN_LENGTH: usize = 32;
/// Length of a chain code in bytes
pub const CHAIN_CODE_LENGTH: usize = 32;

/// A validated card PIN
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    /// Create a PIN, checking its length and that it only contains digits
    pub fn new(pin: impl Into<String>) -> Result<Self, ValidationError> {
        let pin = pin.into();

        if !(MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&pin.len()) {
            return Err(ValidationError::PinLength(pin.len()));
        }
        if !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::PinNotNumeric);
        }

        Ok(Self(pin))
    }

    /// Get the PIN digits
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the PIN as bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(******)")
    }
}

impl FromStr for Pin {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A 32-byte chain code installed on the card during setup
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ChainCode([u8; CHAIN_CODE_LENGTH]);

impl ChainCode {
    /// Create a chain code from raw bytes
    pub const fn new(bytes: [u8; CHAIN_CODE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a chain code from 64 hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, ValidationError> {
        let hex_str = hex_str.trim();
        let bytes = hex::decode(hex_str).map_err(|e| ValidationError::ChainCodeHex(e.to_string()))?;
        let bytes: [u8; CHAIN_CODE_LENGTH] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| ValidationError::ChainCodeLength(b.len()))?;
        Ok(Self(bytes))
    }

    /// Generate a random chain code
    pub fn random() -> Self {
        let mut bytes = [0u8; CHAIN_CODE_LENGTH];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the chain code bytes
    pub const fn as_bytes(&self) -> &[u8; CHAIN_CODE_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for ChainCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChainCode(..)")
    }
}

/// A partially signed transaction, opaque to this crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Psbt(Bytes);

impl Psbt {
    /// Wrap serialized PSBT bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Get the serialized bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Parameters of a fresh card setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupParams {
    factory_pin: Pin,
    new_pin: Pin,
    chain_code: Option<ChainCode>,
}

impl SetupParams {
    /// Create setup parameters
    ///
    /// Without a chain code, a random one is generated when the card is
    /// initialised.
    pub const fn new(factory_pin: Pin, new_pin: Pin, chain_code: Option<ChainCode>) -> Self {
        Self {
            factory_pin,
            new_pin,
            chain_code,
        }
    }

    /// Validate raw user input into setup parameters
    pub fn try_new(
        factory_pin: &str,
        new_pin: &str,
        chain_code_hex: Option<&str>,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            factory_pin: Pin::new(factory_pin)?,
            new_pin: Pin::new(new_pin)?,
            chain_code: chain_code_hex.map(ChainCode::from_hex).transpose()?,
        })
    }

    /// PIN printed on the card at the factory
    pub const fn factory_pin(&self) -> &Pin {
        &self.factory_pin
    }

    /// PIN that replaces the factory PIN
    pub const fn new_pin(&self) -> &Pin {
        &self.new_pin
    }

    /// User-supplied chain code, if any
    pub const fn chain_code(&self) -> Option<&ChainCode> {
        self.chain_code.as_ref()
    }
}

/// Command kinds, safe to log and display
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Read the master extended public key
    #[display("derive")]
    Derive,
    /// Export the encrypted backup
    #[display("backup")]
    Backup,
    /// Sign a PSBT
    #[display("sign")]
    Sign,
    /// Change the card PIN
    #[display("change-pin")]
    ChangePin,
    /// Run the setup sequence
    #[display("setup")]
    Setup,
    /// Resume an interrupted setup sequence
    #[display("continue-setup")]
    ContinueSetup,
}

/// One round of card interaction
#[derive(Debug, Clone)]
pub enum Command {
    /// Read the master extended public key and fingerprint
    Derive {
        /// Card PIN
        pin: Pin,
    },
    /// Export the encrypted master key backup
    Backup {
        /// Card PIN
        pin: Pin,
    },
    /// Sign a PSBT
    Sign {
        /// Transaction to sign
        psbt: Psbt,
        /// Card PIN
        pin: Pin,
    },
    /// Replace the card PIN
    ChangePin {
        /// PIN currently set on the card
        current_pin: Pin,
        /// PIN to set
        new_pin: Pin,
    },
    /// Run the full setup sequence on a fresh card
    Setup(SetupParams),
    /// Resume a setup sequence from the state returned by `Incomplete`
    ContinueSetup(ContinuationState),
}

impl Command {
    /// Get the kind of this command
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Derive { .. } => CommandKind::Derive,
            Self::Backup { .. } => CommandKind::Backup,
            Self::Sign { .. } => CommandKind::Sign,
            Self::ChangePin { .. } => CommandKind::ChangePin,
            Self::Setup(_) => CommandKind::Setup,
            Self::ContinueSetup(_) => CommandKind::ContinueSetup,
        }
    }
}
