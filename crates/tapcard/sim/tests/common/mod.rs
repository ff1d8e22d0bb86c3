//! Shared fixtures for simulated session tests
#![allow(dead_code)]

use std::sync::{Arc, Once};

use tapcard_session::{Orchestrator, Pin, SessionConfig, SetupParams};
use tapcard_sim::{Presentation, SharedCard, SimCodec, SimRadio, SimulatedCard, Timeline};
use tracing_subscriber::EnvFilter;

pub const FACTORY_PIN: &str = "000000";
pub const NEW_PIN: &str = "111111";
pub const CARD_PIN: &str = "123456";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn pin(digits: &str) -> Pin {
    Pin::new(digits).unwrap()
}

pub fn setup_params() -> SetupParams {
    SetupParams::try_new(FACTORY_PIN, NEW_PIN, None).unwrap()
}

/// A fresh card carrying the factory PIN used by setup tests
pub fn fresh_card(seed: u8) -> SharedCard {
    SharedCard::new(SimulatedCard::with_seed([seed; 32]).with_pin(FACTORY_PIN))
}

/// A card that has already been set up with `CARD_PIN`
pub fn sealed_card(seed: u8) -> SharedCard {
    SharedCard::new(
        SimulatedCard::with_seed([seed; 32])
            .with_pin(CARD_PIN)
            .sealed([0x42; 32]),
    )
}

pub struct Harness {
    pub radio: SimRadio,
    pub card: SharedCard,
    pub orchestrator: Arc<Orchestrator<SimRadio, SimCodec>>,
}

impl Harness {
    pub fn new(card: SharedCard, presentations: Vec<Presentation>) -> Self {
        Self::with_config(card, presentations, SessionConfig::default())
    }

    pub fn with_config(
        card: SharedCard,
        presentations: Vec<Presentation>,
        config: SessionConfig,
    ) -> Self {
        init_tracing();
        let radio = SimRadio::new(card.clone(), Timeline::new())
            .script(presentations)
            .fallback(Presentation::immediate());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(radio.clone()),
            Arc::new(SimCodec::new()),
            config,
        ));

        Self {
            radio,
            card,
            orchestrator,
        }
    }

    pub fn timeline(&self) -> &Timeline {
        self.radio.timeline()
    }
}
