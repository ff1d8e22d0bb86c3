//! Simulated platform radio
//!
//! Each time the radio is enabled it takes the next [`Presentation`] from its
//! script (or the fallback) and, after the scripted delay, hands a fresh
//! [`SimLink`] to the session's tag handler. Disabling the radio cancels any
//! presentation that has not happened yet.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tapcard_session::{RadioAvailability, RadioError, RadioLayer, Tag, TagHandler};
use tracing::{debug, trace};

use crate::card::SharedCard;
use crate::link::{SimEvent, SimLink, Timeline};

/// How the card shows up after the radio is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// The card is presented after `delay`
    After {
        /// Delay after the radio is enabled
        delay: Duration,
        /// Drop the link after this many delivered commands
        drop_after: Option<usize>,
    },
    /// The card never shows up
    Never,
    /// The card is presented when [`SimRadio::present`] is called
    Manual,
}

impl Presentation {
    /// Card presented right away
    pub const fn immediate() -> Self {
        Self::After {
            delay: Duration::ZERO,
            drop_after: None,
        }
    }

    /// Card presented right away that leaves after `count` commands
    pub const fn dropping_after(count: usize) -> Self {
        Self::After {
            delay: Duration::ZERO,
            drop_after: Some(count),
        }
    }
}

#[derive(Default)]
struct RadioInner {
    availability: Option<RadioAvailability>,
    handler: Option<Box<dyn TagHandler>>,
    script: VecDeque<Presentation>,
    fallback: Option<Presentation>,
    generation: u64,
    enables: usize,
    disables: usize,
}

/// Radio presenting a [`SharedCard`] according to a script
#[derive(Clone)]
pub struct SimRadio {
    inner: Arc<Mutex<RadioInner>>,
    card: SharedCard,
    timeline: Timeline,
}

impl fmt::Debug for SimRadio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SimRadio")
            .field("availability", &inner.availability)
            .field("scripted", &inner.script.len())
            .field("enables", &inner.enables)
            .field("disables", &inner.disables)
            .finish_non_exhaustive()
    }
}

impl SimRadio {
    /// Create a radio that never presents the card unless scripted to
    pub fn new(card: SharedCard, timeline: Timeline) -> Self {
        Self {
            inner: Arc::default(),
            card,
            timeline,
        }
    }

    /// Append presentations to the script
    pub fn script(self, presentations: impl IntoIterator<Item = Presentation>) -> Self {
        self.inner.lock().script.extend(presentations);
        self
    }

    /// Presentation used once the script runs out
    pub fn fallback(self, presentation: Presentation) -> Self {
        self.inner.lock().fallback = Some(presentation);
        self
    }

    /// Override the reported availability
    pub fn set_availability(&self, availability: RadioAvailability) {
        self.inner.lock().availability = Some(availability);
    }

    /// Present the card now, if the radio is enabled
    ///
    /// Returns whether a handler received the tag.
    pub fn present(&self, drop_after: Option<usize>) -> bool {
        let mut inner = self.inner.lock();
        let Some(handler) = inner.handler.as_mut() else {
            return false;
        };
        handler.handle_tag(self.tag(drop_after));
        true
    }

    /// Times the radio was enabled
    pub fn enables(&self) -> usize {
        self.inner.lock().enables
    }

    /// Times the radio was disabled
    pub fn disables(&self) -> usize {
        self.inner.lock().disables
    }

    /// Whether a session currently has the radio enabled
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().handler.is_some()
    }

    /// The event timeline
    pub const fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// The card behind the radio
    pub const fn card(&self) -> &SharedCard {
        &self.card
    }

    fn tag(&self, drop_after: Option<usize>) -> Tag {
        let mut link = SimLink::new(self.card.clone(), self.timeline.clone());
        if let Some(count) = drop_after {
            link = link.dropping_after(count);
        }
        self.timeline.record(SimEvent::TagPresented { link: link.id() });
        let uid = self.card.with(|card| card.pubkey()[1..8].to_vec());
        Tag::new(uid, Box::new(link))
    }

    fn deliver_later(&self, generation: u64, delay: Duration, drop_after: Option<usize>) {
        let radio = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = radio.inner.lock();
            if inner.generation != generation {
                trace!("Radio was disabled before the card arrived");
                return;
            }
            if let Some(handler) = inner.handler.as_mut() {
                handler.handle_tag(radio.tag(drop_after));
            }
        });
    }
}

impl RadioLayer for SimRadio {
    fn availability(&self) -> RadioAvailability {
        self.inner
            .lock()
            .availability
            .unwrap_or(RadioAvailability::Ready)
    }

    fn enable(&self, handler: Box<dyn TagHandler>) -> Result<(), RadioError> {
        let (generation, presentation) = {
            let mut inner = self.inner.lock();
            match inner.availability {
                Some(RadioAvailability::Unavailable) => return Err(RadioError::Unavailable),
                Some(RadioAvailability::Disabled) => return Err(RadioError::Disabled),
                _ => {}
            }
            if inner.handler.is_some() {
                return Err(RadioError::Failed("reader mode already active".into()));
            }

            inner.enables += 1;
            inner.generation += 1;
            inner.handler = Some(handler);
            let presentation = inner
                .script
                .pop_front()
                .or(inner.fallback)
                .unwrap_or(Presentation::Never);
            (inner.generation, presentation)
        };

        self.timeline.record(SimEvent::RadioEnabled);
        debug!(?presentation, "Simulated radio enabled");

        if let Presentation::After { delay, drop_after } = presentation {
            self.deliver_later(generation, delay, drop_after);
        }
        Ok(())
    }

    fn disable(&self) {
        {
            let mut inner = self.inner.lock();
            inner.disables += 1;
            inner.generation += 1;
            inner.handler = None;
        }
        self.timeline.record(SimEvent::RadioDisabled);
        debug!("Simulated radio disabled");
    }
}
