// ABOUTME: Runtime configuration for swarmspec, loaded from environment variables.
// ABOUTME: Supplies the workspace directory, default model, and construction backoff window.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::spec::DEFAULT_MODEL;

const DEFAULT_RETRY_MIN_DELAY_MS: u64 = 4_000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Errors that can occur while reading the runtime configuration.
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("{var} must be a whole number of milliseconds, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be true or false, got '{value}'")]
    InvalidFlag { var: &'static str, value: String },

    #[error("retry backoff minimum ({min_ms}ms) exceeds maximum ({max_ms}ms)")]
    InvalidBackoff { min_ms: u64, max_ms: u64 },
}

/// Process-level settings. Converted into pipeline options by the caller and
/// passed explicitly; nothing in the pipeline reads the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub home: PathBuf,
    pub default_model: String,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            home: default_home(),
            default_model: DEFAULT_MODEL.to_string(),
            retry_min_delay: Duration::from_millis(DEFAULT_RETRY_MIN_DELAY_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            retry_jitter: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - SWARMSPEC_HOME: workspace directory (default: ~/.swarmspec)
    /// - SWARMSPEC_DEFAULT_MODEL: model for agents that name none (default: gpt-4o-mini)
    /// - SWARMSPEC_RETRY_MIN_DELAY_MS: first construction backoff (default: 4000)
    /// - SWARMSPEC_RETRY_MAX_DELAY_MS: backoff cap (default: 10000)
    /// - SWARMSPEC_RETRY_JITTER: add random jitter to backoff (default: false)
    pub fn from_env() -> Result<Self, RuntimeConfigError> {
        let home = std::env::var("SWARMSPEC_HOME")
            .ok()
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_home);

        let default_model = std::env::var("SWARMSPEC_DEFAULT_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let min_ms = millis_var("SWARMSPEC_RETRY_MIN_DELAY_MS", DEFAULT_RETRY_MIN_DELAY_MS)?;
        let max_ms = millis_var("SWARMSPEC_RETRY_MAX_DELAY_MS", DEFAULT_RETRY_MAX_DELAY_MS)?;
        if min_ms > max_ms {
            return Err(RuntimeConfigError::InvalidBackoff { min_ms, max_ms });
        }

        let retry_jitter = match std::env::var("SWARMSPEC_RETRY_JITTER") {
            Err(_) => false,
            Ok(v) => match v.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" | "" => false,
                _ => {
                    return Err(RuntimeConfigError::InvalidFlag {
                        var: "SWARMSPEC_RETRY_JITTER",
                        value: v,
                    });
                }
            },
        };

        Ok(Self {
            home,
            default_model,
            retry_min_delay: Duration::from_millis(min_ms),
            retry_max_delay: Duration::from_millis(max_ms),
            retry_jitter,
        })
    }
}

fn default_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".swarmspec")
}

fn millis_var(var: &'static str, default: u64) -> Result<u64, RuntimeConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(value) if value.trim().is_empty() => Ok(default),
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|_| RuntimeConfigError::InvalidNumber { var, value }),
    }
}
