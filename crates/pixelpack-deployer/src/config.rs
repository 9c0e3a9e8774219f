//! Deployer configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::oracle::OracleSettings;

/// Deployer configuration loaded from environment variables.
///
/// Environment variables are prefixed with `PIXELPACK_`:
/// - `PIXELPACK_NETWORK`: Target network name (default: "hardhat")
/// - `PIXELPACK_CONFIRMATIONS`: Blocks to wait per transaction (default: 1)
/// - `PIXELPACK_CONFIRMATION_TIMEOUT_SECS`: Confirmation wait bound (default: 120)
/// - `PIXELPACK_FULFILLMENT_WAIT_SECS`: Live oracle wait (default: 180)
/// - `PIXELPACK_FINALIZE_RETRIES`: Extra finalize attempts on live networks (default: 3)
/// - `PIXELPACK_FINALIZE_RETRY_DELAY_SECS`: Initial retry delay (default: 30)
/// - `PIXELPACK_SKIP_FUNDED_TARGETS`: Skip funding targets that hold enough LINK (default: false)
/// - `PIXELPACK_ARTIFACTS_PATH`: JSON file for deployment artifacts (optional)
/// - `PIXELPACK_LOG_JSON`: Emit JSON logs (default: false)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeployerConfig {
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default_fulfillment_wait")]
    pub fulfillment_wait_secs: u64,

    #[serde(default = "default_finalize_retries")]
    pub finalize_retries: u32,

    #[serde(default = "default_finalize_retry_delay")]
    pub finalize_retry_delay_secs: u64,

    #[serde(default)]
    pub skip_funded_targets: bool,

    #[serde(default)]
    pub artifacts_path: Option<PathBuf>,

    #[serde(default)]
    pub log_json: bool,
}

fn default_network() -> String {
    "hardhat".to_string()
}

fn default_confirmations() -> u64 {
    1
}

fn default_confirmation_timeout() -> u64 {
    120
}

fn default_fulfillment_wait() -> u64 {
    180
}

fn default_finalize_retries() -> u32 {
    3
}

fn default_finalize_retry_delay() -> u64 {
    30
}

impl DeployerConfig {
    /// Load configuration from `PIXELPACK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::prefixed("PIXELPACK_").from_env::<DeployerConfig>()?)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn oracle_settings(&self) -> OracleSettings {
        let retry_delay = Duration::from_secs(self.finalize_retry_delay_secs);
        OracleSettings {
            fulfillment_wait: Duration::from_secs(self.fulfillment_wait_secs),
            finalize_retries: self.finalize_retries,
            finalize_retry_delay: retry_delay,
            max_retry_delay: retry_delay * 4,
        }
    }
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            confirmations: default_confirmations(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            fulfillment_wait_secs: default_fulfillment_wait(),
            finalize_retries: default_finalize_retries(),
            finalize_retry_delay_secs: default_finalize_retry_delay(),
            skip_funded_targets: false,
            artifacts_path: None,
            log_json: false,
        }
    }
}
