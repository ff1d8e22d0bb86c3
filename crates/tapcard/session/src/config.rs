//! Session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tapcard_transport::progress::DEFAULT_PROGRESS_CAPACITY;

/// Default time to wait for a card to be presented
pub const DEFAULT_TAG_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of failed continuation attempts tolerated by [`crate::SetupDriver`]
pub const DEFAULT_SETUP_RETRY_LIMIT: u32 = 5;

/// Configuration for an [`crate::Orchestrator`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for a card before failing with a timeout
    #[serde(rename = "tag_timeout_secs", with = "duration_secs")]
    pub tag_timeout: Duration,
    /// Progress messages buffered per subscriber
    pub progress_capacity: usize,
    /// Failed continuation attempts tolerated by the setup driver
    pub setup_retry_limit: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tag_timeout: DEFAULT_TAG_TIMEOUT,
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
            setup_retry_limit: DEFAULT_SETUP_RETRY_LIMIT,
        }
    }
}

impl SessionConfig {
    /// Set the tag wait timeout
    pub const fn with_tag_timeout(mut self, timeout: Duration) -> Self {
        self.tag_timeout = timeout;
        self
    }

    /// Set the progress buffer size
    pub const fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity;
        self
    }

    /// Set the setup retry limit
    pub const fn with_setup_retry_limit(mut self, limit: u32) -> Self {
        self.setup_retry_limit = limit;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
