//! Codec speaking the simulated card dialect

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tapcard_session::{
    BackupBlob, CardCodec, CardIdentity, CardTransport, ChainCode, CodecError, DeriveInfo,
    Fingerprint, Pin, Psbt, SignedTransaction,
};
use tracing::{debug, warn};

use crate::apdu::{Apdu, FrameError, Reply, ins, put_prefixed};
use crate::card::CardState;

/// Derivation path the simulated card reports keys at
pub const SIM_DERIVATION_PATH: &str = "m/84h/0h/0h";

/// Codec for [`crate::SimulatedCard`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SimCodec;

impl SimCodec {
    /// Create a new codec
    pub const fn new() -> Self {
        Self
    }

    async fn exchange(
        &self,
        transport: &mut dyn CardTransport,
        ins: u8,
        data: Bytes,
    ) -> Result<Bytes, CodecError> {
        let command = Apdu::new(ins, data).to_bytes().map_err(oversized)?;
        let raw = transport.transmit(&command).await?;
        let reply = Reply::parse(&raw).map_err(|e| CodecError::decode(e.to_string()))?;

        if reply.status.is_success() {
            debug!(ins, len = reply.data.len(), "Card command succeeded");
            return Ok(reply.data);
        }

        warn!(ins, status = %reply.status, "Card command failed");
        if reply.status.is_auth_failure() {
            Err(CodecError::Auth(reply.status.description().to_string()))
        } else {
            Err(CodecError::card(reply.status.0, reply.status.description()))
        }
    }

    async fn status(&self, transport: &mut dyn CardTransport) -> Result<(CardIdentity, CardState), CodecError> {
        let data = self.exchange(transport, ins::STATUS, Bytes::new()).await?;
        let [pubkey @ .., state] = data.as_ref() else {
            return Err(CodecError::decode("empty status response"));
        };

        let identity =
            CardIdentity::from_card_pubkey(pubkey).map_err(|e| CodecError::decode(e.to_string()))?;
        let state = CardState::from_byte(*state)
            .ok_or_else(|| CodecError::decode(format!("unknown card state {state:#04x}")))?;
        Ok((identity, state))
    }

    fn pin_data(pin: &Pin) -> Result<BytesMut, CodecError> {
        let mut data = BytesMut::new();
        put_prefixed(&mut data, pin.as_bytes()).map_err(oversized)?;
        Ok(data)
    }
}

fn oversized(e: FrameError) -> CodecError {
    CodecError::UnsupportedCard(format!("command does not fit a short frame: {e}"))
}

#[async_trait]
impl CardCodec for SimCodec {
    async fn identify(&self, transport: &mut dyn CardTransport) -> Result<CardIdentity, CodecError> {
        let (identity, state) = self.status(transport).await?;
        debug!(card = %identity, ?state, "Read card status");
        Ok(identity)
    }

    async fn init(
        &self,
        transport: &mut dyn CardTransport,
        pin: &Pin,
        chain_code: &ChainCode,
    ) -> Result<(), CodecError> {
        transport.append_message(".");
        let mut data = Self::pin_data(pin)?;
        data.put_slice(chain_code.as_bytes());
        self.exchange(transport, ins::INIT, data.freeze()).await?;
        Ok(())
    }

    async fn backup(&self, transport: &mut dyn CardTransport, pin: &Pin) -> Result<BackupBlob, CodecError> {
        let data = self
            .exchange(transport, ins::BACKUP, Self::pin_data(pin)?.freeze())
            .await?;
        Ok(BackupBlob::new(data))
    }

    async fn derive(&self, transport: &mut dyn CardTransport, pin: &Pin) -> Result<DeriveInfo, CodecError> {
        let data = self
            .exchange(transport, ins::DERIVE, Self::pin_data(pin)?.freeze())
            .await?;
        if data.len() <= 4 {
            return Err(CodecError::decode("derive response too short"));
        }

        let (fingerprint, xpub) = data.split_at(4);
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(fingerprint);
        let extended_public_key = String::from_utf8(xpub.to_vec())
            .map_err(|_| CodecError::decode("extended public key is not UTF-8"))?;

        Ok(DeriveInfo {
            extended_public_key,
            master_fingerprint: Fingerprint::new(bytes),
            path: SIM_DERIVATION_PATH.to_string(),
        })
    }

    async fn sign(
        &self,
        transport: &mut dyn CardTransport,
        psbt: &Psbt,
        pin: &Pin,
    ) -> Result<SignedTransaction, CodecError> {
        let mut data = Self::pin_data(pin)?;
        data.put_slice(psbt.as_bytes());
        let signed = self.exchange(transport, ins::SIGN, data.freeze()).await?;
        Ok(SignedTransaction::new(signed))
    }

    async fn change_pin(
        &self,
        transport: &mut dyn CardTransport,
        current_pin: &Pin,
        new_pin: &Pin,
    ) -> Result<(), CodecError> {
        let mut data = Self::pin_data(current_pin)?;
        put_prefixed(&mut data, new_pin.as_bytes()).map_err(oversized)?;
        self.exchange(transport, ins::CHANGE_PIN, data.freeze()).await?;
        Ok(())
    }
}
