//! Runtime configuration.
//!
//! The transport deadlines and the polling cadence are protocol contract
//! values, surfaced here as named constants rather than magic numbers at the
//! call sites. A user config file can relax them for debugging; the defaults
//! are normative.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub poll: PollConfig,
}

/// Client-side deadlines for the activation channel.
///
/// Each phase of an activation exchange is bounded independently; a timeout
/// in one phase cancels only that phase and maps to a distinct outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub receive_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2_000,
            send_timeout_ms: 1_000,
            receive_timeout_ms: 5_000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// Timer polling cadence and failure backoff for the view projection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    /// Consecutive failed/warning loads before timer polling suspends.
    pub failure_threshold: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3_000,
            failure_threshold: 3,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

pub fn config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

/// Load user config, falling back to defaults on any failure.
pub fn load() -> Config {
    let path = config_path();
    if !path.exists() {
        return Config::default();
    }
    match fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}; using defaults", path.display());
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!("failed to read {}: {e}; using defaults", path.display());
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_contract_values() {
        let cfg = Config::default();
        assert_eq!(cfg.transport.connect_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.transport.send_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.transport.receive_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.poll.interval(), Duration::from_secs(3));
        assert_eq!(cfg.poll.failure_threshold, 3);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let cfg: Config = toml::from_str("[transport]\nconnect_timeout_ms = 250\n").unwrap();
        assert_eq!(cfg.transport.connect_timeout_ms, 250);
        assert_eq!(cfg.transport.send_timeout_ms, 1_000);
        assert_eq!(cfg.poll.interval_ms, 3_000);
    }
}
