//! Runtime settings loaded with Figment.
//!
//! Settings are read from a TOML file and then overridden by environment
//! variables prefixed with `RUST_FLOW_`. Nested keys are separated by a
//! double underscore:
//!
//! ```text
//! RUST_FLOW_APPLICATION__LOG_LEVEL=debug
//! RUST_FLOW_EXECUTOR__CALL_TIMEOUT=2s
//! RUST_FLOW_COMPILER__OVERLAP_POLICY=reject
//! ```
//!
//! Every field has a default, so an empty or missing file is valid.
//!
//! # Example
//! ```no_run
//! use rust_flow::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Call timeout: {:?}", settings.executor.call_timeout);
//! # Ok::<(), rust_flow::error::FlowError>(())
//! ```

use crate::error::{FlowError, FlowResult};
use crate::protocol::CompilerOptions;
use crate::telemetry::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/rust_flow.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RUST_FLOW_";

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationSettings,
    #[serde(default)]
    pub compiler: CompilerOptions,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    #[serde(default = "default_name")]
    pub name: String,
    /// trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Executor tuning. Durations accept human-readable strings ("250ms", "5s").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,
    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(default)]
    pub halt_component_on_failure: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            call_timeout: default_call_timeout(),
            sample_interval: default_sample_interval(),
            max_retries: 0,
            retry_backoff: default_retry_backoff(),
            halt_component_on_failure: false,
        }
    }
}

// Default value functions
fn default_name() -> String {
    "rust_flow".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_backoff() -> Duration {
    Duration::from_millis(100)
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> FlowResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment, then validate.
    pub fn load_from<P: AsRef<Path>>(path: P) -> FlowResult<Self> {
        let settings: Self = Self::figment(path).extract()?;
        settings.validate().map_err(FlowError::Configuration)?;
        Ok(settings)
    }

    /// Provider chain: TOML file, then `RUST_FLOW_` environment variables.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.executor.call_timeout.is_zero() {
            return Err("executor.call_timeout must be greater than zero".to_string());
        }

        if self.executor.sample_interval.is_zero() {
            return Err("executor.sample_interval must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OverlapPolicy;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.executor.call_timeout, Duration::from_secs(5));
        assert_eq!(settings.executor.max_retries, 0);
        assert_eq!(settings.compiler.overlap_policy, OverlapPolicy::LastWriteWins);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_sample_interval_is_rejected() {
        let mut settings = Settings::default();
        settings.executor.sample_interval = Duration::ZERO;
        assert!(settings
            .validate()
            .unwrap_err()
            .contains("sample_interval"));
    }

    #[test]
    fn human_readable_durations_parse() {
        let settings: Settings = toml::from_str(
            r#"
            [executor]
            call_timeout = "250ms"
            retry_backoff = "2s"
            "#,
        )
        .unwrap();
        assert_eq!(settings.executor.call_timeout, Duration::from_millis(250));
        assert_eq!(settings.executor.retry_backoff, Duration::from_secs(2));
        assert_eq!(settings.executor.sample_interval, Duration::from_secs(1));
    }
}
