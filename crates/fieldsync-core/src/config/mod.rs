//! Client configuration.
//!
//! Provides a `ClientConfig` struct used by capture clients and the CLI to
//! locate the infringement API and tune the sync engine. Every field has a
//! default so an empty JSON object is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Hard ceiling for concurrent photo uploads within one submission.
pub const MAX_PHOTO_CONCURRENCY: usize = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub db_path: Option<PathBuf>,
    pub sync: SyncPolicy,
    pub connectivity: ConnectivityConfig,
}

impl ClientConfig {
    /// Parse a configuration from a raw JSON payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid config JSON: {error}")))
    }

    /// Load a configuration file, returning defaults when it doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let payload = std::fs::read_to_string(path)?;
        Self::from_json(&payload)
    }

    /// Validated API base URL without a trailing slash.
    pub fn api_base_url(&self) -> Result<Option<String>> {
        let Some(url) = normalize_text_option(self.api_base_url.clone()) else {
            return Ok(None);
        };
        if !is_http_url(&url) {
            return Err(Error::Config(
                "api_base_url must include http:// or https://".to_string(),
            ));
        }
        Ok(Some(url.trim_end_matches('/').to_string()))
    }

    pub fn api_token(&self) -> Option<String> {
        normalize_text_option(self.api_token.clone())
    }
}

/// Retry, backoff and recovery settings for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncPolicy {
    /// First automatic retry delay; doubles with every attempt
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Attempts after which a failed item waits for a manual retry
    pub max_attempts: u32,
    /// Extra attempts made within one drain after a transient failure
    pub inline_retries: u32,
    pub inline_retry_delay_ms: u64,
    /// Age after which a `syncing` item is presumed abandoned at startup
    pub watchdog_threshold_ms: u64,
    pub photo_concurrency: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            backoff_base_ms: 5_000,
            backoff_cap_ms: 15 * 60 * 1_000,
            max_attempts: 8,
            inline_retries: 1,
            inline_retry_delay_ms: 1_000,
            watchdog_threshold_ms: 5 * 60 * 1_000,
            photo_concurrency: MAX_PHOTO_CONCURRENCY,
        }
    }
}

impl SyncPolicy {
    /// Delay before the next automatic retry: `base * 2^attempts`, capped.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_cap_ms),
        )
    }

    pub const fn inline_retry_delay(&self) -> Duration {
        Duration::from_millis(self.inline_retry_delay_ms)
    }

    pub const fn watchdog_threshold(&self) -> Duration {
        Duration::from_millis(self.watchdog_threshold_ms)
    }

    /// Photo upload pool size, clamped to `1..=MAX_PHOTO_CONCURRENCY`.
    pub fn photo_concurrency(&self) -> usize {
        self.photo_concurrency.clamp(1, MAX_PHOTO_CONCURRENCY)
    }
}

/// Reachability debounce and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectivityConfig {
    /// How long the network must stay online before a drain starts
    pub stable_window_ms: u64,
    pub probe_interval_ms: u64,
    /// Timer-triggered drain while online; 0 disables it
    pub retry_interval_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            stable_window_ms: 2_000,
            probe_interval_ms: 10_000,
            retry_interval_ms: 60_000,
        }
    }
}

impl ConnectivityConfig {
    pub const fn stable_window(&self) -> Duration {
        Duration::from_millis(self.stable_window_ms)
    }

    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub const fn retry_interval(&self) -> Option<Duration> {
        if self.retry_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.retry_interval_ms))
        }
    }
}
