//! Test doubles for the radio and the codec

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::pending;

use async_trait::async_trait;
use parking_lot::Mutex;
use tapcard_transport::CardTransport;
use tapcard_transport::mock::{MockLink, MockStep};

use crate::codec::CardCodec;
use crate::command::{ChainCode, Pin, Psbt};
use crate::error::{CodecError, RadioError};
use crate::identity::CardIdentity;
use crate::radio::{RadioAvailability, RadioLayer, Tag, TagHandler};
use crate::response::{BackupBlob, DeriveInfo, Fingerprint, SignedTransaction};

pub(crate) const TEST_IDENTITY: &str = "ABCDE-FGHIJ-KLMNO-PQRST";

#[derive(Default)]
struct RadioInner {
    availability: Option<RadioAvailability>,
    handler: Option<Box<dyn TagHandler>>,
    present_on_enable: bool,
    enables: usize,
    disables: usize,
}

/// Radio that presents a mock tag as soon as it is enabled, if asked to
#[derive(Default)]
pub(crate) struct TestRadio {
    inner: Mutex<RadioInner>,
    link: MockLink,
}

impl fmt::Debug for TestRadio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRadio").finish_non_exhaustive()
    }
}

impl TestRadio {
    pub(crate) fn presenting() -> Self {
        Self::presenting_link(MockLink::new(vec![MockStep::respond(&[0x90, 0x00])]))
    }

    pub(crate) fn presenting_link(link: MockLink) -> Self {
        let radio = Self {
            link,
            ..Self::default()
        };
        radio.inner.lock().present_on_enable = true;
        radio
    }

    pub(crate) fn silent() -> Self {
        Self::default()
    }

    pub(crate) fn with_availability(self, availability: RadioAvailability) -> Self {
        self.inner.lock().availability = Some(availability);
        self
    }

    pub(crate) fn enables(&self) -> usize {
        self.inner.lock().enables
    }

    pub(crate) fn disables(&self) -> usize {
        self.inner.lock().disables
    }

    pub(crate) fn link(&self) -> &MockLink {
        &self.link
    }
}

impl RadioLayer for TestRadio {
    fn availability(&self) -> RadioAvailability {
        self.inner
            .lock()
            .availability
            .unwrap_or(RadioAvailability::Ready)
    }

    fn enable(&self, mut handler: Box<dyn TagHandler>) -> Result<(), RadioError> {
        let present = {
            let mut inner = self.inner.lock();
            inner.enables += 1;
            inner.present_on_enable
        };

        if present {
            handler.handle_tag(Tag::new(vec![0x04, 0x01], Box::new(self.link.clone())));
        }
        self.inner.lock().handler = Some(handler);
        Ok(())
    }

    fn disable(&self) {
        let mut inner = self.inner.lock();
        inner.disables += 1;
        inner.handler = None;
    }
}

/// Codec answering every operation with canned data
///
/// Failures can be queued per operation name, and one operation can be made
/// to hang forever.
#[derive(Debug, Default)]
pub(crate) struct TestCodec {
    failures: Mutex<HashMap<&'static str, VecDeque<Option<CodecError>>>>,
    hang_on: Mutex<Option<&'static str>>,
    calls: Mutex<Vec<&'static str>>,
}

impl TestCodec {
    pub(crate) fn fail(self, operation: &'static str, error: CodecError) -> Self {
        self.failures
            .lock()
            .entry(operation)
            .or_default()
            .push_back(Some(error));
        self
    }

    /// Let the next call to `operation` succeed before queued failures apply
    pub(crate) fn pass(self, operation: &'static str) -> Self {
        self.failures.lock().entry(operation).or_default().push_back(None);
        self
    }

    pub(crate) fn hang_on(self, operation: &'static str) -> Self {
        *self.hang_on.lock() = Some(operation);
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub(crate) fn derive_info() -> DeriveInfo {
        DeriveInfo {
            extended_public_key: "xpub-test".into(),
            master_fingerprint: Fingerprint::new([0xde, 0xad, 0xbe, 0xef]),
            path: "m/84h/0h/0h".into(),
        }
    }

    async fn enter(&self, operation: &'static str) -> Result<(), CodecError> {
        self.calls.lock().push(operation);
        let hang = *self.hang_on.lock() == Some(operation);
        if hang {
            pending::<()>().await;
        }
        let next = self
            .failures
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
            .flatten();
        next.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl CardCodec for TestCodec {
    async fn identify(&self, _transport: &mut dyn CardTransport) -> Result<CardIdentity, CodecError> {
        self.enter("identify").await?;
        TEST_IDENTITY
            .parse()
            .map_err(|e: crate::ValidationError| CodecError::decode(e.to_string()))
    }

    async fn init(
        &self,
        _transport: &mut dyn CardTransport,
        _pin: &Pin,
        _chain_code: &ChainCode,
    ) -> Result<(), CodecError> {
        self.enter("init").await
    }

    async fn backup(&self, _transport: &mut dyn CardTransport, _pin: &Pin) -> Result<BackupBlob, CodecError> {
        self.enter("backup").await?;
        Ok(BackupBlob::new(vec![0xba, 0xc0]))
    }

    async fn derive(&self, _transport: &mut dyn CardTransport, _pin: &Pin) -> Result<DeriveInfo, CodecError> {
        self.enter("derive").await?;
        Ok(Self::derive_info())
    }

    async fn sign(
        &self,
        _transport: &mut dyn CardTransport,
        psbt: &Psbt,
        _pin: &Pin,
    ) -> Result<SignedTransaction, CodecError> {
        self.enter("sign").await?;
        Ok(SignedTransaction::new(psbt.as_bytes().to_vec()))
    }

    async fn change_pin(
        &self,
        _transport: &mut dyn CardTransport,
        _current_pin: &Pin,
        _new_pin: &Pin,
    ) -> Result<(), CodecError> {
        self.enter("change_pin").await
    }
}
