//! Application-level configuration loading: synchronisation cadence and lifecycle limits.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::timer::DEFAULT_COUNTDOWN_SECS;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_LIVE_CONFIG_PATH";

/// Cadence of the client reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pull interval while the quiz is running.
    pub poll_active_ms: u64,
    /// Pull interval in the lobby and countdown.
    pub poll_waiting_ms: u64,
    /// Quiet period collapsing bursts of refresh triggers.
    pub debounce_ms: u64,
    /// Consecutive read failures tolerated before warning.
    pub read_failure_budget: u32,
    /// Delay before re-subscribing a dropped topic.
    pub resubscribe_delay_ms: u64,
}

impl SyncConfig {
    /// Pull interval while the quiz is running.
    pub fn poll_active(&self) -> Duration {
        Duration::from_millis(self.poll_active_ms)
    }

    /// Pull interval before the quiz starts.
    pub fn poll_waiting(&self) -> Duration {
        Duration::from_millis(self.poll_waiting_ms)
    }

    /// Debounce window.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Re-subscribe delay.
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_active_ms: 2_000,
            poll_waiting_ms: 5_000,
            debounce_ms: 250,
            read_failure_budget: 3,
            resubscribe_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Reconciliation loop cadence.
    pub sync: SyncConfig,
    /// Length of the pre-start countdown.
    pub countdown_secs: u32,
    /// Join code generation retries before giving up.
    pub join_code_attempts: u32,
    /// Upper bound for a lifecycle store write.
    pub transition_timeout_ms: u64,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        poll_active_ms = app_config.sync.poll_active_ms,
                        countdown_secs = app_config.countdown_secs,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Upper bound for a lifecycle store write.
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            countdown_secs: DEFAULT_COUNTDOWN_SECS,
            join_code_attempts: 16,
            transition_timeout_ms: 5_000,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
