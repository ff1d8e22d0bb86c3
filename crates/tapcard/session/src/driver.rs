//! Caller-side setup loop
//!
//! Setup usually needs more than one tap: phones lose the card easily while
//! four steps run. The driver keeps asking for the card until the sequence
//! completes, a non-recoverable error occurs, or too many attempts failed.

use tracing::{info, warn};

use crate::codec::CardCodec;
use crate::command::SetupParams;
use crate::error::CardError;
use crate::orchestrator::Orchestrator;
use crate::radio::RadioLayer;
use crate::response::{SetupComplete, SetupOutcome};

/// Drives a setup to completion over as many taps as needed
#[derive(Debug)]
pub struct SetupDriver<'a, R, C> {
    orchestrator: &'a Orchestrator<R, C>,
    retry_limit: u32,
}

impl<'a, R: RadioLayer, C: CardCodec> SetupDriver<'a, R, C> {
    /// Create a driver using the orchestrator's configured retry limit
    pub const fn new(orchestrator: &'a Orchestrator<R, C>) -> Self {
        Self {
            retry_limit: orchestrator.config().setup_retry_limit,
            orchestrator,
        }
    }

    /// Override the number of failed continuation attempts tolerated
    pub const fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Run the setup sequence until it completes
    ///
    /// The first tap must at least initialise the card. After that, lost
    /// links, timeouts and wrong cards are retried until more than the retry
    /// limit of attempts have failed.
    pub async fn run(&self, params: SetupParams) -> Result<SetupComplete, CardError> {
        let mut outcome = self.orchestrator.setup(params).await?;
        let mut failures = 0;

        loop {
            let state = match outcome {
                SetupOutcome::Complete(complete) => return Ok(complete),
                SetupOutcome::Incomplete(state) => state,
            };
            info!(next_step = ?state.next_step(), "Setup incomplete, tap the card again");

            match self.orchestrator.continue_setup(state.clone()).await {
                Ok(next) => outcome = next,
                Err(e) if Self::is_recoverable(&e) && failures < self.retry_limit => {
                    failures += 1;
                    warn!(error = %e, failures, "Continuing setup failed, retrying");
                    outcome = SetupOutcome::Incomplete(state);
                }
                Err(e) => return Err(e),
            }
        }
    }

    const fn is_recoverable(error: &CardError) -> bool {
        matches!(
            error,
            CardError::Timeout | CardError::LinkLost | CardError::WrongCard { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tapcard_transport::TransportError;

    use super::*;
    use crate::config::SessionConfig;
    use crate::error::CodecError;
    use crate::testing::{TestCodec, TestRadio};

    fn params() -> SetupParams {
        SetupParams::try_new("000000", "123456", None).unwrap()
    }

    fn lost() -> CodecError {
        CodecError::Link(TransportError::LinkLost)
    }

    #[tokio::test]
    async fn drives_setup_across_interruptions() {
        let codec = TestCodec::default()
            .fail("backup", lost())
            .fail("change_pin", lost());
        let orchestrator = Orchestrator::new(
            Arc::new(TestRadio::presenting()),
            Arc::new(codec),
            SessionConfig::default(),
        );

        let complete = SetupDriver::new(&orchestrator).run(params()).await.unwrap();
        assert_eq!(complete.derive_info, TestCodec::derive_info());
        assert_eq!(orchestrator.radio().enables(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_limit() {
        let codec = TestCodec::default()
            .pass("identify")
            .fail("identify", lost())
            .fail("identify", lost())
            .fail("identify", lost())
            .fail("backup", lost());
        let orchestrator = Orchestrator::new(
            Arc::new(TestRadio::presenting()),
            Arc::new(codec),
            SessionConfig::default(),
        );

        let err = SetupDriver::new(&orchestrator)
            .with_retry_limit(2)
            .run(params())
            .await
            .unwrap_err();
        assert_eq!(err, CardError::LinkLost);
        assert_eq!(orchestrator.radio().enables(), 4);
    }

    #[tokio::test]
    async fn auth_failure_stops_the_loop() {
        let codec = TestCodec::default()
            .fail("backup", lost())
            .fail("backup", CodecError::Auth("wrong pin".into()));
        let orchestrator = Orchestrator::new(
            Arc::new(TestRadio::presenting()),
            Arc::new(codec),
            SessionConfig::default(),
        );

        let err = SetupDriver::new(&orchestrator).run(params()).await.unwrap_err();
        assert!(matches!(err, CardError::AuthFailed(_)));
        assert_eq!(orchestrator.radio().enables(), 2);
    }

    #[tokio::test]
    async fn failure_on_first_tap_is_returned() {
        let codec = TestCodec::default().fail("init", lost());
        let orchestrator = Orchestrator::new(
            Arc::new(TestRadio::presenting()),
            Arc::new(codec),
            SessionConfig::default(),
        );

        let err = SetupDriver::new(&orchestrator).run(params()).await.unwrap_err();
        assert_eq!(err, CardError::LinkLost);
        assert_eq!(orchestrator.radio().enables(), 1);
    }
}
