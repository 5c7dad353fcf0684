//! Engine configuration loaded from TOML
//!
//! Every section and key is optional; missing values use defaults. The
//! `CMDFLOW_LOG_PROFILE` environment variable overrides `[logging] profile`.
//!
//! ```toml
//! [logging]
//! profile = "production"
//!
//! [callbacks]
//! precompile_common_transitions = true
//!
//! [retry]
//! max_attempts = 5
//! retryable_categories = ["external"]
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! timeout_ms = 30000
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::errors::{EngineError, Result};
use crate::logging_facility::Profile;
use crate::recovery::{CircuitBreakerConfig, RetryConfig};

pub const ENV_LOG_PROFILE: &str = "CMDFLOW_LOG_PROFILE";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub callbacks: CallbacksConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub profile: Profile,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CallbacksConfig {
    /// Compile the happy-path chains when a registry is frozen
    #[serde(default = "default_precompile")]
    pub precompile_common_transitions: bool,
}

fn default_precompile() -> bool {
    true
}

impl Default for CallbacksConfig {
    fn default() -> Self {
        Self {
            precompile_common_transitions: default_precompile(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML string
    ///
    /// # Errors
    ///
    /// `EngineError::Toml` when the document is not valid configuration.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from `path`, falling back to defaults if absent
    ///
    /// # Errors
    ///
    /// I/O and parse failures, or an unknown profile in `CMDFLOW_LOG_PROFILE`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Self::from_toml_str(&contents)?
        } else {
            tracing::debug!(path = %path.display(), "config file absent, using defaults");
            Self::default()
        };

        if let Ok(profile) = std::env::var(ENV_LOG_PROFILE) {
            if !profile.is_empty() {
                config.logging.profile = profile.parse().map_err(EngineError::Config)?;
            }
        }

        Ok(config)
    }
}
