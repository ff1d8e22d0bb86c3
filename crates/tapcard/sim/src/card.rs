//! Simulated signing card
//!
//! The card keeps a factory PIN until setup replaces it. It starts
//! [`CardState::Unused`], becomes [`CardState::Sealed`] once initialised, and
//! records every state-changing or secret-revealing operation it completes in
//! an [`CardOp`] journal so tests can check that nothing ran twice.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::apdu::{Apdu, FieldReader, FrameError, Reply, StatusWord, ins};

/// PIN printed on a fresh simulated card
pub const DEFAULT_FACTORY_PIN: &str = "123456";

/// Card lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    /// Fresh from the factory, no master key yet
    Unused,
    /// Initialised with a master key
    Sealed,
}

impl CardState {
    const fn to_byte(self) -> u8 {
        match self {
            Self::Unused => 0x00,
            Self::Sealed => 0x01,
        }
    }

    /// Decode the state byte of a status response
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Unused),
            0x01 => Some(Self::Sealed),
            _ => None,
        }
    }
}

/// An operation the card completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardOp {
    /// Master key created
    Init,
    /// Backup exported
    Backup,
    /// Extended public key read
    Derive,
    /// Transaction signed
    Sign,
    /// PIN replaced
    ChangePin,
}

/// In-memory card model
#[derive(Debug)]
pub struct SimulatedCard {
    seed: [u8; 32],
    pin: String,
    state: CardState,
    chain_code: Option<[u8; 32]>,
    auth_failures: u8,
    ops: Vec<CardOp>,
}

impl SimulatedCard {
    /// Create a fresh card with a random key and the default factory PIN
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self::with_seed(seed)
    }

    /// Create a fresh card with a fixed key
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            seed,
            pin: DEFAULT_FACTORY_PIN.to_string(),
            state: CardState::Unused,
            chain_code: None,
            auth_failures: 0,
            ops: Vec::new(),
        }
    }

    /// Replace the factory PIN
    pub fn with_pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = pin.into();
        self
    }

    /// Skip setup: the card is already initialised with `chain_code`
    pub fn sealed(mut self, chain_code: [u8; 32]) -> Self {
        self.state = CardState::Sealed;
        self.chain_code = Some(chain_code);
        self
    }

    /// Compressed public key identifying the card
    pub fn pubkey(&self) -> [u8; 33] {
        let mut key = [0u8; 33];
        key[0] = 0x02;
        key[1..].copy_from_slice(&Sha256::digest(self.seed));
        key
    }

    /// Current lifecycle state
    pub const fn state(&self) -> CardState {
        self.state
    }

    /// Current PIN
    pub fn pin(&self) -> &str {
        &self.pin
    }

    /// Chain code installed by setup
    pub const fn chain_code(&self) -> Option<&[u8; 32]> {
        self.chain_code.as_ref()
    }

    /// Operations completed so far, in order
    pub fn ops(&self) -> &[CardOp] {
        &self.ops
    }

    /// Number of times `op` completed
    pub fn count(&self, op: CardOp) -> usize {
        self.ops.iter().filter(|done| **done == op).count()
    }

    /// Process one raw command and return the raw response
    pub fn process(&mut self, command: &[u8]) -> Bytes {
        let reply = match Apdu::parse(command) {
            Ok(apdu) => {
                trace!(ins = apdu.ins, "Card processing command");
                self.dispatch(&apdu)
                    .unwrap_or_else(|_| Reply::status(StatusWord::WRONG_DATA))
            }
            Err(e) => {
                debug!(error = %e, "Card rejected malformed frame");
                Reply::status(StatusWord::WRONG_DATA)
            }
        };
        reply.to_bytes()
    }

    fn dispatch(&mut self, apdu: &Apdu) -> Result<Reply, FrameError> {
        let mut reader = FieldReader::new(&apdu.data);

        let reply = match apdu.ins {
            ins::STATUS => {
                let mut data = BytesMut::with_capacity(34);
                data.put_slice(&self.pubkey());
                data.put_u8(self.state.to_byte());
                Reply::ok(data.freeze())
            }
            ins::INIT => {
                let pin = reader.prefixed("pin")?;
                let chain_code = reader.fixed(32, "chain code")?;
                self.with_auth(pin, |card| {
                    if card.state != CardState::Unused {
                        return Reply::status(StatusWord::CONDITIONS_NOT_SATISFIED);
                    }
                    let mut code = [0u8; 32];
                    code.copy_from_slice(chain_code);
                    card.chain_code = Some(code);
                    card.state = CardState::Sealed;
                    card.ops.push(CardOp::Init);
                    Reply::ok(Bytes::new())
                })
            }
            ins::BACKUP => {
                let pin = reader.prefixed("pin")?;
                self.with_sealed_auth(pin, |card| {
                    card.ops.push(CardOp::Backup);
                    Reply::ok(card.tagged_digest(b"backup", &[]))
                })
            }
            ins::DERIVE => {
                let pin = reader.prefixed("pin")?;
                self.with_sealed_auth(pin, |card| {
                    card.ops.push(CardOp::Derive);
                    let xpub = card.tagged_digest(b"xpub", &[]);
                    let fingerprint = card.tagged_digest(b"fingerprint", &[]);

                    let mut data = BytesMut::new();
                    data.put_slice(&fingerprint[..4]);
                    data.put_slice(format!("xpubSIM{}", hex::encode(xpub)).as_bytes());
                    Reply::ok(data.freeze())
                })
            }
            ins::SIGN => {
                let pin = reader.prefixed("pin")?;
                let psbt = reader.rest();
                self.with_sealed_auth(pin, |card| {
                    card.ops.push(CardOp::Sign);
                    let mut data = BytesMut::from(psbt);
                    data.put_slice(&card.tagged_digest(b"sign", psbt));
                    Reply::ok(data.freeze())
                })
            }
            ins::CHANGE_PIN => {
                let current = reader.prefixed("current pin")?;
                let new = reader.prefixed("new pin")?;
                let new = std::str::from_utf8(new).map_err(|_| FrameError::Field("new pin"))?;
                self.with_auth(current, |card| {
                    card.pin = new.to_string();
                    card.ops.push(CardOp::ChangePin);
                    Reply::ok(Bytes::new())
                })
            }
            _ => Reply::status(StatusWord::INS_NOT_SUPPORTED),
        };

        Ok(reply)
    }

    fn with_auth(&mut self, pin: &[u8], action: impl FnOnce(&mut Self) -> Reply) -> Reply {
        if pin != self.pin.as_bytes() {
            self.auth_failures = self.auth_failures.saturating_add(1);
            debug!(failures = self.auth_failures, "Card rejected PIN");
            return Reply::status(StatusWord::BAD_AUTH);
        }
        self.auth_failures = 0;
        action(self)
    }

    fn with_sealed_auth(&mut self, pin: &[u8], action: impl FnOnce(&mut Self) -> Reply) -> Reply {
        if self.state != CardState::Sealed {
            return Reply::status(StatusWord::CONDITIONS_NOT_SATISFIED);
        }
        self.with_auth(pin, action)
    }

    fn tagged_digest(&self, tag: &[u8], data: &[u8]) -> Bytes {
        let mut hasher = Sha256::new();
        hasher.update(tag);
        hasher.update(self.seed);
        hasher.update(self.chain_code.unwrap_or_default());
        hasher.update(data);
        Bytes::copy_from_slice(&hasher.finalize())
    }
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new()
    }
}

/// A card shared between the radio, its links and the test
#[derive(Debug, Clone)]
pub struct SharedCard(Arc<Mutex<SimulatedCard>>);

impl SharedCard {
    /// Share `card`
    pub fn new(card: SimulatedCard) -> Self {
        Self(Arc::new(Mutex::new(card)))
    }

    /// Run `f` with the card locked
    pub fn with<T>(&self, f: impl FnOnce(&mut SimulatedCard) -> T) -> T {
        f(&mut self.0.lock())
    }

    /// Operations completed so far
    pub fn ops(&self) -> Vec<CardOp> {
        self.0.lock().ops().to_vec()
    }

    /// Number of times `op` completed
    pub fn count(&self, op: CardOp) -> usize {
        self.0.lock().count(op)
    }

    pub(crate) fn process(&self, command: &[u8]) -> Bytes {
        self.0.lock().process(command)
    }
}
