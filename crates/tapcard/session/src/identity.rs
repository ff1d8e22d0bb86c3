//! Human-readable card identity
//!
//! The identity is derived from the card's public key: the SHA-256 of the
//! compressed key with its first 8 bytes skipped (those are already revealed
//! by the card's NFC URL), base32 encoded and cut into four dash-separated
//! groups of five characters.

use std::str::FromStr;

use data_encoding::BASE32;
use derive_more::Display;
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Length of a compressed secp256k1 public key
pub const CARD_PUBKEY_LENGTH: usize = 33;

const GROUPS: usize = 4;
const GROUP_LEN: usize = 5;

/// Stable identifier of a physical card, e.g. `ABCDE-FGHIJ-KLMNO-PQRST`
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
pub struct CardIdentity(String);

impl CardIdentity {
    /// Derive the identity from the card's compressed public key
    pub fn from_card_pubkey(pubkey: &[u8]) -> Result<Self, ValidationError> {
        if pubkey.len() != CARD_PUBKEY_LENGTH {
            return Err(ValidationError::CardPublicKeyLength(pubkey.len()));
        }

        let digest = Sha256::digest(pubkey);
        let encoded = BASE32.encode(&digest[8..]);
        let groups: Vec<&str> = (0..GROUPS)
            .map(|i| &encoded[i * GROUP_LEN..(i + 1) * GROUP_LEN])
            .collect();

        Ok(Self(groups.join("-")))
    }

    /// Get the identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity without dashes, lowercased, for use in file names
    pub fn file_name_prefix(&self) -> String {
        self.0.replace('-', "").to_ascii_lowercase()
    }

    /// Name of the file a backup of this card is exported to
    pub fn backup_file_name(&self) -> String {
        format!("{}_backup.txt", self.file_name_prefix())
    }
}

impl FromStr for CardIdentity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let groups: Vec<&str> = s.split('-').collect();
        let well_formed = groups.len() == GROUPS
            && groups.iter().all(|group| {
                group.len() == GROUP_LEN
                    && group
                        .bytes()
                        .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
            });

        if !well_formed {
            return Err(ValidationError::CardIdentity(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}
