//! Single-flight card session orchestration
//!
//! The orchestrator owns the whole lifecycle of one card interaction: check
//! the radio, wait for a tag, open a transport, run one command, tear down.
//! At most one session is in flight per orchestrator. Concurrent callers
//! queue in arrival order on a fair lock.
//!
//! Teardown runs on every exit path, including when the caller drops the
//! future. The transport closes itself on drop and [`SessionGuard`] disables
//! the radio and returns the state to [`SessionState::Idle`].

use std::future::{Future, pending};
use std::pin::pin;
use std::sync::Arc;

use parking_lot::RwLock;
use tapcard_transport::{LinkTransport, ProgressReceiver, ProgressSink};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::codec::CardCodec;
use crate::command::{Command, Pin, Psbt, SetupParams};
use crate::config::SessionConfig;
use crate::error::CardError;
use crate::executor::{CommandExecutor, SessionJournal};
use crate::identity::CardIdentity;
use crate::radio::{RadioAvailability, RadioLayer, Tag};
use crate::response::{BackupBlob, DeriveInfo, Response, SetupOutcome, SignedTransaction};
use crate::setup::ContinuationState;
use crate::state::{SessionState, StateReceiver};

/// Shown while waiting for a card
pub const MESSAGE_AWAITING_TAG: &str = "Hold your device near the card";
/// Shown once a card has been detected
pub const MESSAGE_TAG_DETECTED: &str = "Card detected, hold still";

/// Coordinates card sessions over a radio and a codec
#[derive(Debug)]
pub struct Orchestrator<R, C> {
    radio: Arc<R>,
    codec: Arc<C>,
    config: SessionConfig,
    flight: Mutex<()>,
    state: watch::Sender<SessionState>,
    progress: ProgressSink,
    identity: RwLock<Option<CardIdentity>>,
}

impl<R: RadioLayer, C: CardCodec> Orchestrator<R, C> {
    /// Create an orchestrator
    pub fn new(radio: Arc<R>, codec: Arc<C>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            radio,
            codec,
            progress: ProgressSink::new(config.progress_capacity),
            config,
            flight: Mutex::new(()),
            state,
            identity: RwLock::new(None),
        }
    }

    /// Configuration in use
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The radio layer
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Identity of the most recently identified card
    pub fn current_card_identity(&self) -> Option<CardIdentity> {
        self.identity.read().clone()
    }

    /// Subscribe to progress messages
    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.progress.subscribe()
    }

    /// Subscribe to session state changes
    pub fn subscribe_state(&self) -> StateReceiver {
        self.state.subscribe()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Run one command in its own card session
    pub async fn execute(&self, command: Command) -> Result<Response, CardError> {
        self.execute_until(command, pending()).await
    }

    /// Run one command, giving up with [`CardError::Cancelled`] when `cancel`
    /// completes
    ///
    /// Cancelling a setup after at least one step was applied returns
    /// [`SetupOutcome::Incomplete`] instead, so the card can be resumed.
    #[instrument(skip_all, fields(command = %command.kind()))]
    pub async fn execute_until<F>(&self, command: Command, cancel: F) -> Result<Response, CardError>
    where
        F: Future<Output = ()>,
    {
        let mut cancel = pin!(cancel);

        match self.radio.availability() {
            RadioAvailability::Unavailable => return Err(CardError::HardwareUnavailable),
            RadioAvailability::Disabled => return Err(CardError::HardwareDisabled),
            RadioAvailability::Ready => {}
        }

        let _flight = tokio::select! {
            guard = self.flight.lock() => guard,
            () = &mut cancel => return Err(CardError::Cancelled),
        };

        let continuation = match &command {
            Command::ContinueSetup(state) => {
                if state.is_consumed() {
                    warn!("Continuation state reused");
                    return Err(CardError::ContinuationConsumed);
                }
                Some(state.clone())
            }
            _ => None,
        };

        let mut session = SessionGuard::new(&*self.radio, &self.state);

        let (tx, mut rx) = mpsc::channel::<Tag>(1);
        let handler = move |tag: Tag| {
            if tx.try_send(tag).is_err() {
                debug!("Ignoring additional tag");
            }
        };
        self.radio.enable(Box::new(handler))?;
        session.radio_enabled = true;

        let deadline = Instant::now() + self.config.tag_timeout;
        self.state.send_replace(SessionState::AwaitingTag { deadline });
        self.progress.set(MESSAGE_AWAITING_TAG);
        debug!(timeout = ?self.config.tag_timeout, "Waiting for tag");

        let tag = tokio::select! {
            received = timeout_at(deadline, rx.recv()) => match received {
                Ok(Some(tag)) => tag,
                Ok(None) => {
                    warn!("Radio dropped the tag handler");
                    return Err(CardError::HardwareDisabled);
                }
                Err(_) => {
                    info!("Timed out waiting for tag");
                    return Err(CardError::Timeout);
                }
            },
            () = &mut cancel => {
                info!("Cancelled while waiting for tag");
                return Err(CardError::Cancelled);
            }
        };
        debug!(?tag, "Tag detected");

        self.state.send_replace(SessionState::Connected);
        self.progress.set(MESSAGE_TAG_DETECTED);

        let mut transport = tokio::select! {
            opened = LinkTransport::open(tag.into_link(), self.progress.clone()) => opened?,
            () = &mut cancel => return Err(CardError::Cancelled),
        };

        self.state
            .send_replace(SessionState::Executing(command.kind()));

        let journal = SessionJournal::default();
        let executor = CommandExecutor::with_journal(&*self.codec, journal.clone());
        let finished = tokio::select! {
            result = executor.execute(&mut transport, command) => Some(result),
            () = &mut cancel => None,
        };

        if let Some(identity) = journal.identity() {
            *self.identity.write() = Some(identity);
        }

        let result = match finished {
            Some(result) => result,
            None => {
                info!("Cancelled during execution");
                match journal.setup() {
                    Some(progress) if progress.has_applied_steps() => progress
                        .into_outcome(CardError::Cancelled)
                        .map(Response::Setup),
                    _ => Err(CardError::Cancelled),
                }
            }
        };

        if let Some(state) = continuation {
            if matches!(result, Ok(_) | Err(CardError::ProtocolError(_))) {
                state.mark_consumed();
            }
        }

        self.state.send_replace(SessionState::TearingDown);
        transport.close();
        drop(session);

        result
    }

    /// Read the master extended public key
    pub async fn derive(&self, pin: Pin) -> Result<DeriveInfo, CardError> {
        match self.execute(Command::Derive { pin }).await? {
            Response::DeriveInfo(info) => Ok(info),
            _ => Err(CardError::UnexpectedResponse("derive info")),
        }
    }

    /// Export the encrypted backup
    pub async fn backup(&self, pin: Pin) -> Result<BackupBlob, CardError> {
        match self.execute(Command::Backup { pin }).await? {
            Response::Backup(backup) => Ok(backup),
            _ => Err(CardError::UnexpectedResponse("backup")),
        }
    }

    /// Sign a PSBT
    pub async fn sign(&self, psbt: Psbt, pin: Pin) -> Result<SignedTransaction, CardError> {
        match self.execute(Command::Sign { psbt, pin }).await? {
            Response::Signed(signed) => Ok(signed),
            _ => Err(CardError::UnexpectedResponse("signed transaction")),
        }
    }

    /// Replace the card PIN
    pub async fn change_pin(&self, current_pin: Pin, new_pin: Pin) -> Result<(), CardError> {
        match self
            .execute(Command::ChangePin {
                current_pin,
                new_pin,
            })
            .await?
        {
            Response::PinChanged => Ok(()),
            _ => Err(CardError::UnexpectedResponse("pin changed")),
        }
    }

    /// Run the setup sequence on a fresh card
    pub async fn setup(&self, params: SetupParams) -> Result<SetupOutcome, CardError> {
        match self.execute(Command::Setup(params)).await? {
            Response::Setup(outcome) => Ok(outcome),
            _ => Err(CardError::UnexpectedResponse("setup outcome")),
        }
    }

    /// Resume an interrupted setup sequence
    pub async fn continue_setup(&self, state: ContinuationState) -> Result<SetupOutcome, CardError> {
        match self.execute(Command::ContinueSetup(state)).await? {
            Response::Setup(outcome) => Ok(outcome),
            _ => Err(CardError::UnexpectedResponse("setup outcome")),
        }
    }
}

/// Disables the radio and resets the state when a session ends
struct SessionGuard<'a, R: RadioLayer + ?Sized> {
    radio: &'a R,
    state: &'a watch::Sender<SessionState>,
    radio_enabled: bool,
}

impl<'a, R: RadioLayer + ?Sized> SessionGuard<'a, R> {
    const fn new(radio: &'a R, state: &'a watch::Sender<SessionState>) -> Self {
        Self {
            radio,
            state,
            radio_enabled: false,
        }
    }
}

impl<R: RadioLayer + ?Sized> Drop for SessionGuard<'_, R> {
    fn drop(&mut self) {
        self.state.send_replace(SessionState::TearingDown);
        if self.radio_enabled {
            self.radio.disable();
            debug!("Radio disabled");
        }
        self.state.send_replace(SessionState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tapcard_transport::TransportError;
    use tapcard_transport::mock::MockLink;

    use super::*;
    use crate::error::CodecError;
    use crate::setup::SetupStep;
    use crate::testing::{TEST_IDENTITY, TestCodec, TestRadio};

    fn pin(digits: &str) -> Pin {
        Pin::new(digits).unwrap()
    }

    fn params() -> SetupParams {
        SetupParams::try_new("000000", "123456", None).unwrap()
    }

    fn build(radio: TestRadio, codec: TestCodec) -> Orchestrator<TestRadio, TestCodec> {
        Orchestrator::new(Arc::new(radio), Arc::new(codec), SessionConfig::default())
    }

    #[tokio::test]
    async fn derive_runs_one_full_session() {
        let orchestrator = build(TestRadio::presenting(), TestCodec::default());

        let info = orchestrator.derive(pin("123456")).await.unwrap();
        assert_eq!(info, TestCodec::derive_info());

        assert_eq!(orchestrator.radio.enables(), 1);
        assert_eq!(orchestrator.radio.disables(), 1);
        assert_eq!(orchestrator.radio.link().closes(), 1);
        assert_eq!(orchestrator.state(), SessionState::Idle);
        assert_eq!(
            orchestrator.current_card_identity().unwrap().as_str(),
            TEST_IDENTITY
        );
        assert_eq!(orchestrator.codec.calls(), vec!["identify", "derive"]);
    }

    #[tokio::test]
    async fn progress_messages_are_published() {
        let orchestrator = build(TestRadio::presenting(), TestCodec::default());
        let mut progress = orchestrator.subscribe_progress();

        orchestrator.backup(pin("123456")).await.unwrap();

        assert_eq!(progress.recv().await.unwrap().text(), MESSAGE_AWAITING_TAG);
        assert_eq!(progress.recv().await.unwrap().text(), MESSAGE_TAG_DETECTED);
    }

    #[tokio::test]
    async fn disabled_radio_fails_before_enabling() {
        let radio = TestRadio::presenting().with_availability(RadioAvailability::Disabled);
        let orchestrator = build(radio, TestCodec::default());

        let err = orchestrator.derive(pin("123456")).await.unwrap_err();
        assert_eq!(err, CardError::HardwareDisabled);
        assert_eq!(orchestrator.radio.enables(), 0);

        let radio = TestRadio::presenting().with_availability(RadioAvailability::Unavailable);
        let orchestrator = build(radio, TestCodec::default());
        let err = orchestrator.derive(pin("123456")).await.unwrap_err();
        assert_eq!(err, CardError::HardwareUnavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn no_tag_times_out_and_disables_radio() {
        let orchestrator = Orchestrator::new(
            Arc::new(TestRadio::silent()),
            Arc::new(TestCodec::default()),
            SessionConfig::default().with_tag_timeout(Duration::from_secs(5)),
        );

        let started = Instant::now();
        let err = orchestrator.derive(pin("123456")).await.unwrap_err();

        assert_eq!(err, CardError::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(orchestrator.radio.disables(), 1);
        assert_eq!(orchestrator.state(), SessionState::Idle);
        assert!(orchestrator.codec.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting_for_tag() {
        let orchestrator = build(TestRadio::silent(), TestCodec::default());

        let result = orchestrator
            .execute_until(
                Command::Derive { pin: pin("123456") },
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await;

        assert_eq!(result.unwrap_err(), CardError::Cancelled);
        assert_eq!(orchestrator.radio.disables(), 1);
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_connecting_closes_link() {
        let radio = TestRadio::presenting_link(MockLink::new(vec![]).stalling_connect());
        let orchestrator = build(radio, TestCodec::default());

        let result = orchestrator
            .execute_until(
                Command::Derive { pin: pin("123456") },
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await;

        assert_eq!(result.unwrap_err(), CardError::Cancelled);
        assert_eq!(orchestrator.radio.link().connects(), 1);
        assert_eq!(orchestrator.radio.link().closes(), 1);
        assert_eq!(orchestrator.radio.disables(), 1);
        assert_eq!(orchestrator.state(), SessionState::Idle);
        assert!(orchestrator.codec.calls().is_empty());
    }

    #[tokio::test]
    async fn auth_failure_is_reported() {
        let codec = TestCodec::default().fail("sign", CodecError::Auth("wrong pin".into()));
        let orchestrator = build(TestRadio::presenting(), codec);

        let err = orchestrator
            .sign(Psbt::new(vec![0x70]), pin("999999"))
            .await
            .unwrap_err();
        assert_eq!(err, CardError::AuthFailed("wrong pin".into()));
        assert_eq!(orchestrator.radio.link().closes(), 1);
    }

    #[tokio::test]
    async fn link_loss_during_init_is_not_resumable() {
        let codec = TestCodec::default().fail("init", CodecError::Link(TransportError::LinkLost));
        let orchestrator = build(TestRadio::presenting(), codec);

        let err = orchestrator.setup(params()).await.unwrap_err();
        assert_eq!(err, CardError::LinkLost);
    }

    #[tokio::test]
    async fn interrupted_setup_resumes_once() {
        let codec = TestCodec::default().fail("derive", CodecError::Link(TransportError::LinkLost));
        let orchestrator = build(TestRadio::presenting(), codec);

        let SetupOutcome::Incomplete(state) = orchestrator.setup(params()).await.unwrap() else {
            panic!("expected incomplete setup");
        };
        assert_eq!(state.next_step(), SetupStep::Derive);
        assert!(state.backup().is_some());

        let outcome = orchestrator.continue_setup(state.clone()).await.unwrap();
        let SetupOutcome::Complete(complete) = outcome else {
            panic!("expected complete setup");
        };
        assert_eq!(complete.derive_info, TestCodec::derive_info());
        assert_eq!(
            orchestrator.codec.calls(),
            vec![
                "identify", "init", "backup", "derive", "identify", "derive", "change_pin"
            ]
        );

        let enables = orchestrator.radio.enables();
        let err = orchestrator.continue_setup(state).await.unwrap_err();
        assert_eq!(err, CardError::ContinuationConsumed);
        assert_eq!(orchestrator.radio.enables(), enables);
    }

    #[tokio::test]
    async fn auth_failure_keeps_continuation_usable() {
        let codec = TestCodec::default()
            .fail("backup", CodecError::Link(TransportError::LinkLost))
            .fail("backup", CodecError::Auth("wrong pin".into()));
        let orchestrator = build(TestRadio::presenting(), codec);

        let SetupOutcome::Incomplete(state) = orchestrator.setup(params()).await.unwrap() else {
            panic!("expected incomplete setup");
        };

        let err = orchestrator.continue_setup(state.clone()).await.unwrap_err();
        assert!(matches!(err, CardError::AuthFailed(_)));
        assert!(!state.is_consumed());

        let outcome = orchestrator.continue_setup(state.clone()).await.unwrap();
        assert!(outcome.is_complete());
        assert!(state.is_consumed());
    }

    #[tokio::test]
    async fn protocol_error_consumes_continuation() {
        let codec = TestCodec::default()
            .fail("backup", CodecError::Link(TransportError::LinkLost))
            .fail("backup", CodecError::card(0x6985, "conditions not satisfied"));
        let orchestrator = build(TestRadio::presenting(), codec);

        let SetupOutcome::Incomplete(state) = orchestrator.setup(params()).await.unwrap() else {
            panic!("expected incomplete setup");
        };

        let err = orchestrator.continue_setup(state.clone()).await.unwrap_err();
        assert!(matches!(err, CardError::ProtocolError(_)));
        assert!(state.is_consumed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_first_step_returns_continuation() {
        let codec = TestCodec::default().hang_on("backup");
        let orchestrator = build(TestRadio::presenting(), codec);

        let response = orchestrator
            .execute_until(
                Command::Setup(params()),
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        let Response::Setup(SetupOutcome::Incomplete(state)) = response else {
            panic!("expected incomplete setup");
        };
        assert_eq!(state.next_step(), SetupStep::Backup);
        assert_eq!(state.interrupted_by(), &CardError::Cancelled);
        assert_eq!(orchestrator.radio.link().closes(), 1);
        assert_eq!(orchestrator.radio.disables(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_any_step_is_cancelled() {
        let codec = TestCodec::default().hang_on("init");
        let orchestrator = build(TestRadio::presenting(), codec);

        let err = orchestrator
            .execute_until(
                Command::Setup(params()),
                tokio::time::sleep(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();
        assert_eq!(err, CardError::Cancelled);
    }

    #[tokio::test]
    async fn dropping_the_future_tears_down() {
        let codec = TestCodec::default().hang_on("derive");
        let orchestrator = build(TestRadio::presenting(), codec);

        {
            let session = orchestrator.derive(pin("123456"));
            let _ = tokio::time::timeout(Duration::from_millis(20), session).await;
        }

        assert_eq!(orchestrator.radio.link().closes(), 1);
        assert_eq!(orchestrator.radio.disables(), 1);
        assert_eq!(orchestrator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn concurrent_calls_run_one_after_another() {
        let orchestrator = build(TestRadio::presenting(), TestCodec::default());
        let mut states = orchestrator.subscribe_state();

        let (first, second) = tokio::join!(
            orchestrator.derive(pin("123456")),
            orchestrator.backup(pin("123456")),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(orchestrator.radio.enables(), 2);
        assert_eq!(orchestrator.radio.disables(), 2);
        assert_eq!(
            orchestrator.codec.calls(),
            vec!["identify", "derive", "identify", "backup"]
        );
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), SessionState::Idle);
    }
}
