//! Session orchestration for contactless signing cards
//!
//! An [`Orchestrator`] turns one [`Command`] into one card session: it checks
//! the platform radio, waits a bounded time for a tag, opens a transport,
//! identifies the card, runs the command through a [`CardCodec`] and tears
//! everything down again, whatever the outcome.
//!
//! Card setup is resumable. When the card leaves the field partway through,
//! [`SetupOutcome::Incomplete`] carries a single-use [`ContinuationState`]
//! that picks up where the card left off on the next tap. [`SetupDriver`]
//! wraps that loop for callers that just want a finished card.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

mod codec;
mod command;
mod config;
mod driver;
mod error;
mod executor;
mod identity;
mod orchestrator;
mod radio;
mod response;
mod setup;
mod state;

#[cfg(test)]
mod testing;

pub use codec::CardCodec;
pub use command::{
    CHAIN_CODE_LENGTH, ChainCode, Command, CommandKind, MAX_PIN_LENGTH, MIN_PIN_LENGTH, Pin, Psbt,
    SetupParams,
};
pub use config::{DEFAULT_SETUP_RETRY_LIMIT, DEFAULT_TAG_TIMEOUT, SessionConfig};
pub use driver::SetupDriver;
pub use error::{CardError, CodecError, RadioError, Result, ValidationError};
pub use executor::CommandExecutor;
pub use identity::{CARD_PUBKEY_LENGTH, CardIdentity};
pub use orchestrator::{MESSAGE_AWAITING_TAG, MESSAGE_TAG_DETECTED, Orchestrator};
pub use radio::{RadioAvailability, RadioLayer, Tag, TagHandler};
pub use response::{
    BackupBlob, DeriveInfo, Fingerprint, Response, SetupComplete, SetupOutcome, SignedTransaction,
};
pub use setup::{ContinuationState, SetupStep};
pub use state::{SessionState, StateReceiver};

pub use tapcard_transport::{
    CardTransport, LinkError, PhysicalLink, ProgressMessage, ProgressReceiver, TransportError,
};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        CardCodec, CardError, CardIdentity, Command, Orchestrator, Pin, RadioLayer, Response,
        SessionConfig, SetupDriver, SetupOutcome, SetupParams,
    };
}
