//! Configuration.
//!
//! Every field has a default, so an empty TOML or JSON document is a valid
//! configuration. Loaded configs are validated before use.
//!
//! ```toml
//! [registry]
//! strict_overrides = false
//!
//! [coordinator]
//! max_workers = 4
//! batch_timeout_ms = 30000
//! qa_threshold = 85
//!
//! [coordinator.retry]
//! max_attempts = 3
//! initial_backoff_ms = 100
//!
//! [session]
//! ttl_secs = 86400
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ValidationError};
use crate::qa::DEFAULT_QA_THRESHOLD;
use crate::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildPlanConfig {
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

/// `[registry]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Fail the build on a malformed override instead of ignoring it.
    #[serde(default)]
    pub strict_overrides: bool,
}

/// `[coordinator]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Worker threads per run. Capped at the number of registered specialists.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Bounded job queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deadline for the whole specialist batch.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Deadline for the QA gate, starting after the merge.
    #[serde(default = "default_qa_timeout_ms")]
    pub qa_timeout_ms: u64,

    /// Scores below this block publication.
    #[serde(default = "default_qa_threshold")]
    pub qa_threshold: u8,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            batch_timeout_ms: default_batch_timeout_ms(),
            qa_timeout_ms: default_qa_timeout_ms(),
            qa_threshold: default_qa_threshold(),
            retry: RetryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Batch deadline as a duration.
    #[must_use]
    pub const fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// QA deadline as a duration.
    #[must_use]
    pub const fn qa_timeout(&self) -> Duration {
        Duration::from_millis(self.qa_timeout_ms)
    }
}

fn default_max_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    16
}
fn default_batch_timeout_ms() -> u64 {
    30_000
}
fn default_qa_timeout_ms() -> u64 {
    10_000
}
fn default_qa_threshold() -> u8 {
    DEFAULT_QA_THRESHOLD
}

/// `[coordinator.retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per external call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Runtime retry policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    2_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

/// `[session]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session expires.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl SessionConfig {
    /// TTL as a duration.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_ttl_secs() -> u64 {
    86_400
}

impl BuildPlanConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed TOML and
    /// `ConfigError::Invalid` if validation fails.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse {
            format: "toml",
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON and
    /// `ConfigError::Invalid` if validation fails.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(|e| ConfigError::Parse {
            format: "json",
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file; `.json` files are parsed as JSON, everything else
    /// as TOML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`BuildPlanConfig::from_toml_str`] / [`BuildPlanConfig::from_json_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), "loading config");
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let c = &self.coordinator;
        let r = &c.retry;
        let checks = [
            (c.max_workers >= 1, "coordinator.max_workers must be at least 1"),
            (c.queue_capacity >= 1, "coordinator.queue_capacity must be at least 1"),
            (c.batch_timeout_ms > 0, "coordinator.batch_timeout_ms must be positive"),
            (c.qa_timeout_ms > 0, "coordinator.qa_timeout_ms must be positive"),
            (c.qa_threshold <= 100, "coordinator.qa_threshold must be at most 100"),
            (r.max_attempts >= 1, "coordinator.retry.max_attempts must be at least 1"),
            (
                r.backoff_multiplier.is_finite() && r.backoff_multiplier >= 1.0,
                "coordinator.retry.backoff_multiplier must be a finite number >= 1.0",
            ),
            (
                r.initial_backoff_ms <= r.max_backoff_ms,
                "coordinator.retry.initial_backoff_ms must not exceed max_backoff_ms",
            ),
            (self.session.ttl_secs > 0, "session.ttl_secs must be positive"),
        ];
        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, reason)) => Err(ValidationError::InvalidConfig {
                reason: (*reason).to_string(),
            }),
            None => Ok(()),
        }
    }
}
