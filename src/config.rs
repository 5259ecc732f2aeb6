//! Configuration management for Slidegate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SlidegateError};

/// Prefix for environment variable overrides, e.g. `SLIDEGATE_LIMITER__MAX_REQUESTS`.
const ENV_PREFIX: &str = "SLIDEGATE";

/// Main configuration for Slidegate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidegateConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Background sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Message stream simulation configuration
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limiter configuration. Shared by every key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Length of the sliding window in seconds
    #[serde(default = "default_window_size_secs")]
    pub window_size_secs: f64,

    /// Events allowed per key within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
}

impl Default for LimiterConfig {
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

fn default_max_requests() -> usize {
    1
}

impl LimiterConfig {
    /// Check the section and convert the window to a [`Duration`].
    pub fn validate(&self) -> Result<(Duration, usize)> {
        let secs = self.window_size_secs;
        if !secs.is_finite() || secs <= 0.0 {
            return Err(SlidegateError::InvalidWindowSize(format!(
                "{} (must be a positive number of seconds)",
                secs
            )));
        }
        let window_size = Duration::try_from_secs_f64(secs)
            .map_err(|e| SlidegateError::InvalidWindowSize(format!("{}: {}", secs, e)))?;
        if window_size.is_zero() {
            return Err(SlidegateError::InvalidWindowSize(format!(
                "{} (rounds to zero)",
                secs
            )));
        }

        if self.max_requests == 0 {
            return Err(SlidegateError::InvalidMaxRequests(self.max_requests));
        }

        Ok((window_size, self.max_requests))
    }
}

/// Background sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Whether to run the sweeper
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    30
}

impl SweeperConfig {
    /// Interval between sweeps. Never zero.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Message stream simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of message rounds
    #[serde(default = "default_rounds")]
    pub rounds: usize,

    /// Messages sent in each round
    #[serde(default = "default_messages_per_round")]
    pub messages_per_round: u64,

    /// Number of distinct users messages rotate through
    #[serde(default = "default_users")]
    pub users: u64,

    /// Pause between rounds in seconds
    #[serde(default = "default_pause_between_rounds")]
    pub pause_between_rounds_secs: f64,

    /// Lower bound of the random delay after each message, in seconds
    #[serde(default = "default_min_jitter")]
    pub min_jitter_secs: f64,

    /// Upper bound of the random delay after each message, in seconds
    #[serde(default = "default_max_jitter")]
    pub max_jitter_secs: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            messages_per_round: default_messages_per_round(),
            users: default_users(),
            pause_between_rounds_secs: default_pause_between_rounds(),
            min_jitter_secs: default_min_jitter(),
            max_jitter_secs: default_max_jitter(),
        }
    }
}

fn default_rounds() -> usize {
    2
}

fn default_messages_per_round() -> u64 {
    10
}

fn default_users() -> u64 {
    5
}

fn default_pause_between_rounds() -> f64 {
    4.0
}

fn default_min_jitter() -> f64 {
    0.1
}

fn default_max_jitter() -> f64 {
    1.0
}

impl SimulationConfig {
    /// Check that the section describes a runnable simulation.
    pub fn validate(&self) -> Result<()> {
        if self.users == 0 {
            return Err(SlidegateError::Config(
                "simulation.users must be at least 1".to_string(),
            ));
        }
        let durations = [
            ("pause_between_rounds_secs", self.pause_between_rounds_secs),
            ("min_jitter_secs", self.min_jitter_secs),
            ("max_jitter_secs", self.max_jitter_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(SlidegateError::Config(format!(
                    "simulation.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
            Duration::try_from_secs_f64(value).map_err(|e| {
                SlidegateError::Config(format!("simulation.{} is out of range: {}", name, e))
            })?;
        }
        Ok(())
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
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
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SlidegateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional YAML file layered with
    /// `SLIDEGATE_`-prefixed environment variables.
    ///
    /// Nested keys are separated by `__`, e.g. `SLIDEGATE_LIMITER__WINDOW_SIZE_SECS=30`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(SlidegateError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("configuration file not found: {}", path.display()),
                )));
            }
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Validate every section that has constraints.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}
