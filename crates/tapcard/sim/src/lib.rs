//! Simulated hardware for tapcard sessions
//!
//! A [`SimulatedCard`] speaks a small APDU dialect. [`SimRadio`] presents it
//! to an orchestrator over [`SimLink`]s that can be scripted to arrive late,
//! never arrive, or leave the field after a number of commands. Every radio
//! and link event lands in a shared [`Timeline`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tapcard_session::{Orchestrator, Pin, SessionConfig};
//! use tapcard_sim::{Presentation, SharedCard, SimCodec, SimRadio, SimulatedCard, Timeline};
//!
//! # async fn example() -> Result<(), tapcard_session::CardError> {
//! let card = SharedCard::new(SimulatedCard::new().sealed([0; 32]));
//! let radio = SimRadio::new(card, Timeline::new()).fallback(Presentation::immediate());
//! let orchestrator = Orchestrator::new(Arc::new(radio), Arc::new(SimCodec), SessionConfig::default());
//!
//! let info = orchestrator.derive(Pin::new("123456")?).await?;
//! println!("{}", info.extended_public_key);
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod apdu;
mod card;
mod codec;
mod link;
mod radio;

pub use card::{CardOp, CardState, DEFAULT_FACTORY_PIN, SharedCard, SimulatedCard};
pub use codec::{SIM_DERIVATION_PATH, SimCodec};
pub use link::{SimEvent, SimLink, Timeline};
pub use radio::{Presentation, SimRadio};
