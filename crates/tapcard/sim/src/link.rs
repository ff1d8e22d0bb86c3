//! Simulated physical link and event timeline

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tapcard_transport::{LinkError, PhysicalLink};
use tokio::time::Instant;
use tracing::debug;

use crate::card::SharedCard;

/// Something observable that happened during a simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// The radio started scanning
    RadioEnabled,
    /// The radio stopped scanning
    RadioDisabled,
    /// A tag was handed to the session
    TagPresented {
        /// Link number
        link: usize,
    },
    /// A link connected to the card
    LinkOpened {
        /// Link number
        link: usize,
    },
    /// A command reached the card
    Exchange {
        /// Link number
        link: usize,
        /// Instruction byte
        ins: u8,
    },
    /// The card left the field
    LinkDropped {
        /// Link number
        link: usize,
    },
    /// A link was closed by the session
    LinkClosed {
        /// Link number
        link: usize,
    },
}

/// Ordered record of simulation events
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Arc<Mutex<Vec<(Instant, SimEvent)>>>,
    next_link: Arc<AtomicUsize>,
}

impl Timeline {
    /// Create an empty timeline
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: SimEvent) {
        self.events.lock().push((Instant::now(), event));
    }

    pub(crate) fn next_link_id(&self) -> usize {
        self.next_link.fetch_add(1, Ordering::Relaxed)
    }

    /// All events in order
    pub fn events(&self) -> Vec<SimEvent> {
        self.events.lock().iter().map(|(_, event)| *event).collect()
    }

    /// All events with the instant they happened
    pub fn timed_events(&self) -> Vec<(Instant, SimEvent)> {
        self.events.lock().clone()
    }

    /// Number of events equal to `event`
    pub fn count(&self, event: SimEvent) -> usize {
        self.events.lock().iter().filter(|(_, e)| *e == event).count()
    }

    /// Number of events matching `predicate`
    pub fn count_matching(&self, predicate: impl Fn(&SimEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|(_, e)| predicate(e)).count()
    }
}

/// Link to a [`SharedCard`] that can be scripted to drop
#[derive(Debug)]
pub struct SimLink {
    id: usize,
    card: SharedCard,
    timeline: Timeline,
    drop_after: Option<usize>,
    exchanges: usize,
    connected: bool,
    opened: bool,
    gone: bool,
    closed: bool,
}

impl SimLink {
    /// Create a link that stays up
    pub fn new(card: SharedCard, timeline: Timeline) -> Self {
        Self {
            id: timeline.next_link_id(),
            card,
            timeline,
            drop_after: None,
            exchanges: 0,
            connected: false,
            opened: false,
            gone: false,
            closed: false,
        }
    }

    /// Drop the link instead of delivering command number `count + 1`
    pub const fn dropping_after(mut self, count: usize) -> Self {
        self.drop_after = Some(count);
        self
    }

    /// Link number in the timeline
    pub const fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl PhysicalLink for SimLink {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        if self.gone || self.closed {
            return Err(LinkError::new("tag is out of range"));
        }
        self.connected = true;
        if !self.opened {
            self.opened = true;
            self.timeline.record(SimEvent::LinkOpened { link: self.id });
        }
        Ok(())
    }

    async fn transceive(&mut self, command: &[u8]) -> Result<Bytes, LinkError> {
        if !self.connected {
            return Err(LinkError::new("not connected"));
        }
        if self.drop_after == Some(self.exchanges) {
            debug!(link = self.id, exchanges = self.exchanges, "Simulated tag left the field");
            self.connected = false;
            self.gone = true;
            self.timeline.record(SimEvent::LinkDropped { link: self.id });
            return Err(LinkError::new("tag was lost"));
        }

        self.exchanges += 1;
        let ins = command.get(1).copied().unwrap_or_default();
        self.timeline.record(SimEvent::Exchange { link: self.id, ins });
        Ok(self.card.process(command))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.connected = false;
            self.timeline.record(SimEvent::LinkClosed { link: self.id });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::{Apdu, Reply, ins};
    use crate::card::SimulatedCard;

    fn status_command() -> Bytes {
        Apdu::new(ins::STATUS, Bytes::new()).to_bytes().unwrap()
    }

    #[tokio::test]
    async fn exchanges_reach_the_card() {
        let timeline = Timeline::new();
        let card = SharedCard::new(SimulatedCard::with_seed([3; 32]));
        let mut link = SimLink::new(card, timeline.clone());

        link.connect().await.unwrap();
        let response = link.transceive(&status_command()).await.unwrap();
        assert!(Reply::parse(&response).unwrap().status.is_success());

        link.close();
        link.close();
        assert_eq!(
            timeline.events(),
            vec![
                SimEvent::LinkOpened { link: 0 },
                SimEvent::Exchange { link: 0, ins: ins::STATUS },
                SimEvent::LinkClosed { link: 0 },
            ]
        );
    }

    #[tokio::test]
    async fn scripted_drop_is_permanent() {
        let timeline = Timeline::new();
        let card = SharedCard::new(SimulatedCard::with_seed([3; 32]));
        let mut link = SimLink::new(card, timeline.clone()).dropping_after(1);

        link.connect().await.unwrap();
        link.transceive(&status_command()).await.unwrap();
        assert!(link.transceive(&status_command()).await.is_err());
        assert!(!link.is_connected());
        assert!(link.connect().await.is_err());
        assert_eq!(timeline.count(SimEvent::LinkDropped { link: 0 }), 1);
    }
}
