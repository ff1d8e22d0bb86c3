//! Command execution against a connected card
//!
//! The executor identifies the card, dispatches one [`Command`] to the codec
//! and maps codec failures into [`CardError`]. It does not own the transport
//! or the radio. The orchestrator opens and tears those down around it.

use std::sync::Arc;

use parking_lot::Mutex;
use tapcard_transport::CardTransport;
use tracing::{debug, instrument, warn};

use crate::codec::CardCodec;
use crate::command::Command;
use crate::error::CardError;
use crate::identity::CardIdentity;
use crate::response::Response;
use crate::setup::{SetupProgress, provision};

#[derive(Debug, Default)]
struct JournalInner {
    identity: Option<CardIdentity>,
    setup: Option<SetupProgress>,
}

/// What a session has learned so far, readable even if the execution is cut
/// short
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionJournal {
    inner: Arc<Mutex<JournalInner>>,
}

impl SessionJournal {
    pub(crate) fn record_identity(&self, identity: &CardIdentity) {
        self.inner.lock().identity = Some(identity.clone());
    }

    pub(crate) fn identity(&self) -> Option<CardIdentity> {
        self.inner.lock().identity.clone()
    }

    pub(crate) fn record_setup(&self, progress: &SetupProgress) {
        self.inner.lock().setup = Some(progress.clone());
    }

    pub(crate) fn setup(&self) -> Option<SetupProgress> {
        self.inner.lock().setup.clone()
    }
}

/// Executes a single command against a connected card
#[derive(Debug)]
pub struct CommandExecutor<'a, C: CardCodec + ?Sized> {
    codec: &'a C,
    journal: SessionJournal,
}

impl<'a, C: CardCodec + ?Sized> CommandExecutor<'a, C> {
    /// Create an executor using the given codec
    pub fn new(codec: &'a C) -> Self {
        Self::with_journal(codec, SessionJournal::default())
    }

    pub(crate) const fn with_journal(codec: &'a C, journal: SessionJournal) -> Self {
        Self { codec, journal }
    }

    /// Identity of the card read by the last execution
    pub fn card_identity(&self) -> Option<CardIdentity> {
        self.journal.identity()
    }

    /// Run `command` over `transport`
    #[instrument(level = "debug", skip_all, fields(command = %command.kind()))]
    pub async fn execute(
        &self,
        transport: &mut dyn CardTransport,
        command: Command,
    ) -> Result<Response, CardError> {
        let identity = self.codec.identify(transport).await.map_err(|e| {
            warn!(error = %e, "Failed to identify card");
            CardError::from(e)
        })?;
        debug!(card = %identity, "Card identified");
        self.journal.record_identity(&identity);

        let result = match command {
            Command::Derive { pin } => self
                .codec
                .derive(transport, &pin)
                .await
                .map(Response::DeriveInfo),
            Command::Backup { pin } => self
                .codec
                .backup(transport, &pin)
                .await
                .map(Response::Backup),
            Command::Sign { psbt, pin } => self
                .codec
                .sign(transport, &psbt, &pin)
                .await
                .map(Response::Signed),
            Command::ChangePin {
                current_pin,
                new_pin,
            } => self
                .codec
                .change_pin(transport, &current_pin, &new_pin)
                .await
                .map(|()| Response::PinChanged),
            Command::Setup(params) => {
                let progress = SetupProgress::start(params, identity);
                return provision(self.codec, transport, progress, &self.journal)
                    .await
                    .map(Response::Setup);
            }
            Command::ContinueSetup(state) => {
                if let Some(expected) = state.card_identity() {
                    if *expected != identity {
                        return Err(CardError::WrongCard {
                            expected: expected.clone(),
                            found: identity,
                        });
                    }
                }
                debug!(next_step = ?state.next_step(), "Resuming setup");
                return provision(self.codec, transport, state.progress(), &self.journal)
                    .await
                    .map(Response::Setup);
            }
        };

        result.map_err(|e| {
            warn!(error = %e, "Command failed");
            CardError::from(e)
        })
    }
}
