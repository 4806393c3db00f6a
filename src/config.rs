//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::questions::Confidence;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// How long terminal tasks stay queryable before the sweeper evicts them.
    pub retention: Duration,
    /// Sweeper tick interval.
    pub sweep_interval: Duration,
    /// Keep-alive interval for attached observers.
    pub heartbeat_interval: Duration,
    /// Detections below this confidence are logged but never suspend a task.
    pub question_min_confidence: Confidence,
    /// Turn budget for tasks that do not set `maxTurns`.
    pub default_max_turns: u32,
    /// Directory for rolling log files (stderr only when unset).
    pub log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            retention: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(300), // 5 minutes
            heartbeat_interval: Duration::from_secs(15),
            question_min_confidence: Confidence::Medium,
            default_max_turns: 10,
            log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Build a config from `RELAY_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind_addr = std::env::var("RELAY_BIND").unwrap_or(defaults.bind_addr);

        let retention = env_secs("RELAY_RETENTION_SECS").unwrap_or(defaults.retention);
        let sweep_interval =
            env_secs("RELAY_SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval);
        let heartbeat_interval =
            env_secs("RELAY_HEARTBEAT_SECS").unwrap_or(defaults.heartbeat_interval);

        let question_min_confidence = match std::env::var("RELAY_QUESTION_MIN_CONFIDENCE") {
            Ok(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "RELAY_QUESTION_MIN_CONFIDENCE".to_string(),
                message,
            })?,
            Err(_) => defaults.question_min_confidence,
        };

        let default_max_turns: u32 = std::env::var("RELAY_DEFAULT_MAX_TURNS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.default_max_turns);

        let log_dir = std::env::var("RELAY_LOG_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind_addr,
            retention,
            sweep_interval,
            heartbeat_interval,
            question_min_confidence,
            default_max_turns,
            log_dir,
        })
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert_eq!(config.question_min_confidence, Confidence::Medium);
        assert_eq!(config.default_max_turns, 10);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn env_secs_rejects_garbage() {
        // SAFETY: This test is the only reader/writer of this variable.
        unsafe { std::env::set_var("RELAY_TEST_SECS_GARBAGE", "soon") };
        assert!(env_secs("RELAY_TEST_SECS_GARBAGE").is_none());
        unsafe { std::env::set_var("RELAY_TEST_SECS_GARBAGE", "0") };
        assert!(env_secs("RELAY_TEST_SECS_GARBAGE").is_none());
        unsafe { std::env::set_var("RELAY_TEST_SECS_GARBAGE", "42") };
        assert_eq!(
            env_secs("RELAY_TEST_SECS_GARBAGE"),
            Some(Duration::from_secs(42))
        );
        unsafe { std::env::remove_var("RELAY_TEST_SECS_GARBAGE") };
    }
}
