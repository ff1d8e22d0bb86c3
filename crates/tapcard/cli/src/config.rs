//! Layered configuration for the CLI
//!
//! Values come from built-in defaults, then `tapcard.toml` (or the file given
//! with `--config`), then `TAPCARD_` environment variables. Nested keys use a
//! double underscore, e.g. `TAPCARD_SESSION__TAG_TIMEOUT_SECS=30`.

use std::path::Path;

use eyre::WrapErr;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tapcard_session::SessionConfig;
use tapcard_sim::DEFAULT_FACTORY_PIN;

/// Config file read when `--config` is not given
pub(crate) const DEFAULT_CONFIG_FILE: &str = "tapcard.toml";

const ENV_PREFIX: &str = "TAPCARD_";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) session: SessionConfig,
    pub(crate) simulator: SimulatorConfig,
}

/// How the simulated card behaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SimulatorConfig {
    /// Milliseconds between enabling the radio and the card showing up
    pub(crate) tap_delay_ms: u64,
    /// Drop the first tap after this many commands
    pub(crate) drop_after: Option<usize>,
    /// Hex seed for the card key, random when unset
    pub(crate) card_seed: Option<String>,
    /// PIN the simulated card starts with
    pub(crate) card_pin: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tap_delay_ms: 500,
            drop_after: None,
            card_seed: None,
            card_pin: DEFAULT_FACTORY_PIN.to_string(),
        }
    }
}

impl SimulatorConfig {
    /// Decode the configured seed
    pub(crate) fn seed(&self) -> eyre::Result<Option<[u8; 32]>> {
        let Some(seed) = &self.card_seed else {
            return Ok(None);
        };
        let bytes = hex::decode(seed).wrap_err("card_seed is not valid hex")?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| eyre::eyre!("card_seed must be 32 bytes, got {}", bytes.len()))?;
        Ok(Some(seed))
    }
}

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the layered configuration
pub(crate) fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    figment(path)
        .extract()
        .wrap_err_with(|| format!("failed to load configuration from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_without_a_file() {
        Jail::expect_with(|_| {
            let config = load_config(None).unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.simulator.card_pin, DEFAULT_FACTORY_PIN);
            Ok(())
        });
    }

    #[test]
    fn file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [session]
                tag_timeout_secs = 12.5
                setup_retry_limit = 2

                [simulator]
                tap_delay_ms = 0
                drop_after = 3
                "#,
            )?;
            jail.set_env("TAPCARD_SIMULATOR__TAP_DELAY_MS", "250");

            let config = load_config(None).unwrap();
            assert_eq!(config.session.tag_timeout, Duration::from_millis(12_500));
            assert_eq!(config.session.setup_retry_limit, 2);
            assert_eq!(config.session.progress_capacity, SessionConfig::default().progress_capacity);
            assert_eq!(config.simulator.tap_delay_ms, 250);
            assert_eq!(config.simulator.drop_after, Some(3));
            Ok(())
        });
    }

    #[test]
    fn explicit_path() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[simulator]\ncard_pin = \"654321\"\n")?;
            let config = load_config(Some(Path::new("custom.toml"))).unwrap();
            assert_eq!(config.simulator.card_pin, "654321");
            Ok(())
        });
    }

    #[test]
    fn seed_must_be_32_bytes() {
        let mut simulator = SimulatorConfig::default();
        assert_eq!(simulator.seed().unwrap(), None);

        simulator.card_seed = Some("ab".repeat(32));
        assert_eq!(simulator.seed().unwrap(), Some([0xab; 32]));

        simulator.card_seed = Some("abcd".into());
        assert!(simulator.seed().is_err());

        simulator.card_seed = Some("zz".into());
        assert!(simulator.seed().is_err());
    }
}
