//! Card command codec
//!
//! A codec turns one high-level card operation into the command exchanges of
//! a specific card protocol. It is stateless between calls and talks to the
//! card only through the [`CardTransport`] it is handed.

use std::fmt;

use async_trait::async_trait;
use tapcard_transport::CardTransport;

use crate::command::{ChainCode, Pin, Psbt};
use crate::error::CodecError;
use crate::identity::CardIdentity;
use crate::response::{BackupBlob, DeriveInfo, SignedTransaction};

/// Card protocol codec
#[async_trait]
pub trait CardCodec: Send + Sync + fmt::Debug {
    /// Read the card's identity
    async fn identify(&self, transport: &mut dyn CardTransport) -> Result<CardIdentity, CodecError>;

    /// Initialise a fresh card with a chain code
    async fn init(
        &self,
        transport: &mut dyn CardTransport,
        pin: &Pin,
        chain_code: &ChainCode,
    ) -> Result<(), CodecError>;

    /// Export the encrypted master key backup
    async fn backup(&self, transport: &mut dyn CardTransport, pin: &Pin) -> Result<BackupBlob, CodecError>;

    /// Read the master extended public key
    async fn derive(&self, transport: &mut dyn CardTransport, pin: &Pin) -> Result<DeriveInfo, CodecError>;

    /// Sign a PSBT
    async fn sign(
        &self,
        transport: &mut dyn CardTransport,
        psbt: &Psbt,
        pin: &Pin,
    ) -> Result<SignedTransaction, CodecError>;

    /// Replace the card PIN
    async fn change_pin(
        &self,
        transport: &mut dyn CardTransport,
        current_pin: &Pin,
        new_pin: &Pin,
    ) -> Result<(), CodecError>;
}
