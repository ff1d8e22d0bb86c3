//! Results returned by the orchestrator

use std::fmt;

use bytes::Bytes;

use crate::setup::ContinuationState;

/// First four bytes of HASH160 of the master public key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 4]);

impl Fingerprint {
    /// Create a fingerprint from bytes
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the fingerprint bytes
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Master extended public key read from the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeriveInfo {
    /// Serialized extended public key
    pub extended_public_key: String,
    /// Fingerprint of the master key
    pub master_fingerprint: Fingerprint,
    /// Derivation path the key was read at, e.g. `m/84h/0h/0h`
    pub path: String,
}

/// Encrypted backup of the card's master key
#[derive(Clone, PartialEq, Eq)]
pub struct BackupBlob(Bytes);

impl BackupBlob {
    /// Wrap backup bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Get the backup bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex encoding, as written to backup files
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for BackupBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BackupBlob({} bytes)", self.0.len())
    }
}

/// A transaction signed by the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction(Bytes);

impl SignedTransaction {
    /// Wrap signed PSBT bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Get the signed PSBT bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Everything a completed setup produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupComplete {
    /// Master extended public key of the new wallet
    pub derive_info: DeriveInfo,
    /// Backup taken right after initialisation
    pub backup: BackupBlob,
}

/// Result of a setup or continue-setup command
#[derive(Debug, Clone)]
pub enum SetupOutcome {
    /// All steps ran
    Complete(SetupComplete),
    /// The card left the field partway; resume with the given state
    Incomplete(ContinuationState),
}

impl SetupOutcome {
    /// Whether all setup steps ran
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

/// Result of a successful command
#[derive(Debug, Clone)]
pub enum Response {
    /// Result of a derive command
    DeriveInfo(DeriveInfo),
    /// Result of a backup command
    Backup(BackupBlob),
    /// Result of a sign command
    Signed(SignedTransaction),
    /// Result of a change-pin command
    PinChanged,
    /// Result of a setup or continue-setup command
    Setup(SetupOutcome),
}
