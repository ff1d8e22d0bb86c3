//! Resumable card setup
//!
//! Setup runs four steps in order: initialise the card with a chain code,
//! export a backup, read the wallet's extended public key, and replace the
//! factory PIN. If the card leaves the field after at least one step was
//! applied, the caller receives a [`ContinuationState`] and resumes from the
//! first step that did not complete.
//!
//! A continuation state is single-use. Every clone shares one consumed flag,
//! which is set as soon as a resume attempt reaches a terminal result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tapcard_transport::CardTransport;
use tracing::{debug, info, warn};

use crate::codec::CardCodec;
use crate::command::{ChainCode, SetupParams};
use crate::error::{CardError, CodecError};
use crate::executor::SessionJournal;
use crate::identity::CardIdentity;
use crate::response::{BackupBlob, DeriveInfo, SetupComplete, SetupOutcome};

/// One step of the setup sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SetupStep {
    /// Install the chain code and create the master key
    Init,
    /// Export the encrypted backup
    Backup,
    /// Read the master extended public key
    Derive,
    /// Replace the factory PIN
    ChangePin,
}

impl SetupStep {
    /// Step that follows this one, if any
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Backup),
            Self::Backup => Some(Self::Derive),
            Self::Derive => Some(Self::ChangePin),
            Self::ChangePin => None,
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::Init => "Setting up card",
            Self::Backup => "Creating backup",
            Self::Derive => "Reading wallet",
            Self::ChangePin => "Changing PIN",
        }
    }
}

/// Everything known about a setup sequence between steps
#[derive(Debug, Clone)]
pub(crate) struct SetupProgress {
    params: SetupParams,
    chain_code: ChainCode,
    identity: Option<CardIdentity>,
    next_step: Option<SetupStep>,
    backup: Option<BackupBlob>,
    derive_info: Option<DeriveInfo>,
}

impl SetupProgress {
    /// Start a fresh sequence, generating a chain code when none was given
    pub(crate) fn start(params: SetupParams, identity: CardIdentity) -> Self {
        let chain_code = params.chain_code().cloned().unwrap_or_else(ChainCode::random);
        Self {
            params,
            chain_code,
            identity: Some(identity),
            next_step: Some(SetupStep::Init),
            backup: None,
            derive_info: None,
        }
    }

    /// Whether the card has been modified by this sequence
    pub(crate) fn has_applied_steps(&self) -> bool {
        self.next_step != Some(SetupStep::Init)
    }

    /// Turn the progress into the outcome reported to the caller
    pub(crate) fn into_outcome(self, cause: CardError) -> Result<SetupOutcome, CardError> {
        match self.next_step {
            Some(step) => Ok(SetupOutcome::Incomplete(ContinuationState {
                next_step: step,
                progress: self,
                interrupted_by: cause,
                consumed: Arc::new(AtomicBool::new(false)),
            })),
            None => {
                let derive_info = self
                    .derive_info
                    .ok_or_else(|| CardError::protocol("setup finished without wallet info"))?;
                let backup = self
                    .backup
                    .ok_or_else(|| CardError::protocol("setup finished without a backup"))?;
                Ok(SetupOutcome::Complete(SetupComplete {
                    derive_info,
                    backup,
                }))
            }
        }
    }
}

/// Opaque token for resuming an interrupted setup
///
/// Clones share the consumed flag: once any clone has been used to reach a
/// terminal result, every clone is rejected with
/// [`CardError::ContinuationConsumed`].
#[derive(Debug, Clone)]
pub struct ContinuationState {
    next_step: SetupStep,
    progress: SetupProgress,
    interrupted_by: CardError,
    consumed: Arc<AtomicBool>,
}

impl ContinuationState {
    /// First step that has not completed
    pub const fn next_step(&self) -> SetupStep {
        self.next_step
    }

    /// Card this setup belongs to
    pub const fn card_identity(&self) -> Option<&CardIdentity> {
        self.progress.identity.as_ref()
    }

    /// Error that interrupted the sequence
    pub const fn interrupted_by(&self) -> &CardError {
        &self.interrupted_by
    }

    /// Backup taken before the interruption, if that step completed
    pub const fn backup(&self) -> Option<&BackupBlob> {
        self.progress.backup.as_ref()
    }

    /// Whether this state has already been used
    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_consumed(&self) {
        self.consumed.store(true, Ordering::Release);
    }

    pub(crate) fn progress(&self) -> SetupProgress {
        self.progress.clone()
    }
}

/// Run the remaining setup steps against the card
///
/// A link failure after the first applied step yields
/// [`SetupOutcome::Incomplete`]. Every other failure is returned as an error.
pub(crate) async fn provision<C: CardCodec + ?Sized>(
    codec: &C,
    transport: &mut dyn CardTransport,
    mut progress: SetupProgress,
    journal: &SessionJournal,
) -> Result<SetupOutcome, CardError> {
    journal.record_setup(&progress);

    while let Some(step) = progress.next_step {
        debug!(?step, "Applying setup step");
        transport.set_message(step.message());

        match apply_step(codec, transport, &mut progress, step).await {
            Ok(()) => {
                progress.next_step = step.next();
                journal.record_setup(&progress);
            }
            Err(e) if e.is_interruption() && progress.has_applied_steps() => {
                warn!(?step, error = %e, "Setup interrupted");
                return progress.into_outcome(e.into());
            }
            Err(e) => {
                warn!(?step, error = %e, "Setup step failed");
                return Err(e.into());
            }
        }
    }

    info!("Setup complete");
    progress.into_outcome(CardError::protocol("setup already complete"))
}

async fn apply_step<C: CardCodec + ?Sized>(
    codec: &C,
    transport: &mut dyn CardTransport,
    progress: &mut SetupProgress,
    step: SetupStep,
) -> Result<(), CodecError> {
    let factory_pin = progress.params.factory_pin();

    match step {
        SetupStep::Init => codec.init(transport, factory_pin, &progress.chain_code).await,
        SetupStep::Backup => {
            let backup = codec.backup(transport, factory_pin).await?;
            progress.backup = Some(backup);
            Ok(())
        }
        SetupStep::Derive => {
            let derive_info = codec.derive(transport, factory_pin).await?;
            progress.derive_info = Some(derive_info);
            Ok(())
        }
        SetupStep::ChangePin => {
            codec
                .change_pin(transport, factory_pin, progress.params.new_pin())
                .await
        }
    }
}
