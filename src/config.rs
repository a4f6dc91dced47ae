//! Configuration management for Slidegate.
//!
//! Configuration is read from an optional YAML file and then overridden by
//! `SLIDEGATE__*` environment variables (e.g. `SLIDEGATE__LIMITER__MAX_REQUESTS=3`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, SlidegateError};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "SLIDEGATE";

/// Main configuration for Slidegate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidegateConfig {
    /// The default limiter used by the demo driver
    #[serde(default)]
    pub limiter: PolicyConfig,

    /// Additional named policies
    #[serde(default)]
    pub policies: HashMap<String, PolicyConfig>,

    /// Demo traffic configuration
    #[serde(default)]
    pub demo: DemoConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Window and capacity of one sliding window limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Trailing window length in seconds
    #[serde(default = "default_window_size_secs")]
    pub window_size_secs: f64,

    /// Maximum admitted events per key per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            window_size_secs: default_window_size_secs(),
            max_requests: default_max_requests(),
        }
    }
}

fn default_window_size_secs() -> f64 {
    10.0
}

fn default_max_requests() -> u32 {
    1
}

/// Synthetic traffic generated by the demo driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Events sent per round
    #[serde(default = "default_messages_per_round")]
    pub messages_per_round: u32,

    /// Number of distinct keys the events are spread over
    #[serde(default = "default_users")]
    pub users: u32,

    /// Number of rounds
    #[serde(default = "default_rounds")]
    pub rounds: u32,

    /// Lower bound of the random delay between events
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound of the random delay between events
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Pause between rounds
    #[serde(default = "default_round_pause_ms")]
    pub round_pause_ms: u64,

    /// Seed for the delay generator; random when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Advance a virtual clock instead of sleeping
    #[serde(default)]
    pub simulated: bool,

    /// Named policy to drive instead of `limiter`
    #[serde(default)]
    pub policy: Option<String>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            messages_per_round: default_messages_per_round(),
            users: default_users(),
            rounds: default_rounds(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            round_pause_ms: default_round_pause_ms(),
            seed: None,
            simulated: false,
            policy: None,
        }
    }
}

fn default_messages_per_round() -> u32 {
    10
}

fn default_users() -> u32 {
    5
}

fn default_rounds() -> u32 {
    2
}

fn default_min_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_round_pause_ms() -> u64 {
    4000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SlidegateConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SlidegateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SlidegateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered with environment overrides.
    ///
    /// The result is not validated, so callers can apply further overrides
    /// first; call [`SlidegateConfig::validate`] before use.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path));
        }

        let config: SlidegateConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Check every value that the limiter and the demo driver rely on.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate("limiter")?;
        for (name, policy) in &self.policies {
            policy.validate(&format!("policies.{}", name))?;
        }
        self.demo.validate()?;
        if let Some(policy) = &self.demo.policy {
            if !self.policies.contains_key(policy) {
                return Err(SlidegateError::Config(format!(
                    "demo.policy '{}' is not defined under policies",
                    policy
                )));
            }
        }
        Ok(())
    }
}

impl PolicyConfig {
    fn validate(&self, path: &str) -> Result<()> {
        if !(self.window_size_secs.is_finite() && self.window_size_secs > 0.0) {
            return Err(SlidegateError::Config(format!(
                "{}.window_size_secs must be a positive number, got {}",
                path, self.window_size_secs
            )));
        }
        if self.max_requests == 0 {
            return Err(SlidegateError::Config(format!(
                "{}.max_requests must be greater than zero",
                path
            )));
        }
        Ok(())
    }
}

impl DemoConfig {
    fn validate(&self) -> Result<()> {
        if self.users == 0 {
            return Err(SlidegateError::Config(
                "demo.users must be greater than zero".to_string(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(SlidegateError::Config(format!(
                "demo.min_delay_ms ({}) exceeds demo.max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        let total = self
            .rounds
            .checked_mul(self.messages_per_round)
            .and_then(|total| total.checked_add(1));
        if total.is_none() {
            return Err(SlidegateError::Config(format!(
                "demo.rounds ({}) x demo.messages_per_round ({}) exceeds the message id range",
                self.rounds, self.messages_per_round
            )));
        }
        if let Some(policy) = &self.policy {
            if policy.is_empty() {
                return Err(SlidegateError::Config(
                    "demo.policy must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}
