//! Engine configuration.
//!
//! `SyncConfig` carries every tunable of the engine with the defaults the
//! panel dashboard uses. Use the builder methods to customize it, or
//! [`SyncConfig::from_env`] to overlay `PANEL_SYNC_*` environment variables.
//!
//! # Example
//!
//! ```ignore
//! use panel_sync::config::SyncConfig;
//!
//! let config = SyncConfig::from_env()?
//!     .with_api_key("ptlc_xxx")
//!     .with_power_watchdog(Duration::from_secs(45));
//! config.validate()?;
//! ```

use std::str::FromStr;
use std::time::Duration;

use crate::connection::{Backoff, ConnectionSettings};
use crate::error::{SyncError, SyncResult};

const ENV_PREFIX: &str = "PANEL_SYNC_";

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Panel client API base URL, e.g. `https://panel.example.com/api/client`
    pub api_url: String,
    /// Client API key sent as a Bearer token
    pub api_key: Option<String>,
    /// First reconnect delay (default: 1s)
    pub reconnect_base: Duration,
    /// Backoff growth factor (default: 2)
    pub reconnect_factor: f64,
    /// Longest reconnect delay (default: 30s)
    pub reconnect_cap: Duration,
    /// Relative jitter applied to each delay (default: 0.2)
    pub reconnect_jitter: f64,
    /// Reconnect attempts before giving up (default: 10)
    pub max_reconnect_attempts: u32,
    /// Frames kept while disconnected (default: 50)
    pub outbound_queue_limit: usize,
    /// How long a power command may stay unconfirmed (default: 30s)
    pub power_watchdog: Duration,
    /// Fraction of the token lifetime after which it is refreshed (default: 0.8)
    pub token_refresh_ratio: f64,
    /// Lifetime assumed for tokens without an `exp` claim (default: 10m)
    pub fallback_token_lifetime: Duration,
    /// Entries kept per directory listing (default: 500)
    pub directory_listing_limit: usize,
    /// REST request timeout (default: 15s)
    pub http_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost/api/client".to_string(),
            api_key: None,
            reconnect_base: Duration::from_secs(1),
            reconnect_factor: 2.0,
            reconnect_cap: Duration::from_secs(30),
            reconnect_jitter: 0.2,
            max_reconnect_attempts: 10,
            outbound_queue_limit: 50,
            power_watchdog: Duration::from_secs(30),
            token_refresh_ratio: 0.8,
            fallback_token_lifetime: Duration::from_secs(600),
            directory_listing_limit: 500,
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set base delay, growth factor and cap of the reconnect backoff.
    pub fn with_backoff(mut self, base: Duration, factor: f64, cap: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_factor = factor;
        self.reconnect_cap = cap;
        self
    }

    pub fn with_reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_outbound_queue_limit(mut self, limit: usize) -> Self {
        self.outbound_queue_limit = limit;
        self
    }

    pub fn with_power_watchdog(mut self, watchdog: Duration) -> Self {
        self.power_watchdog = watchdog;
        self
    }

    pub fn with_token_refresh_ratio(mut self, ratio: f64) -> Self {
        self.token_refresh_ratio = ratio;
        self
    }

    pub fn with_fallback_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.fallback_token_lifetime = lifetime;
        self
    }

    pub fn with_directory_listing_limit(mut self, limit: usize) -> Self {
        self.directory_listing_limit = limit;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Defaults overlaid with `PANEL_SYNC_*` environment variables.
    ///
    /// Durations are given in milliseconds (`*_MS`). Unset variables keep
    /// their default; unparsable ones are a [`SyncError::Config`].
    pub fn from_env() -> SyncResult<Self> {
        let mut config = Self::default();
        if let Some(url) = env_string("API_URL") {
            config.api_url = url;
        }
        if let Some(key) = env_string("API_KEY") {
            config.api_key = Some(key);
        }
        if let Some(ms) = env_parse::<u64>("RECONNECT_BASE_MS")? {
            config.reconnect_base = Duration::from_millis(ms);
        }
        if let Some(factor) = env_parse("RECONNECT_FACTOR")? {
            config.reconnect_factor = factor;
        }
        if let Some(ms) = env_parse::<u64>("RECONNECT_CAP_MS")? {
            config.reconnect_cap = Duration::from_millis(ms);
        }
        if let Some(jitter) = env_parse("RECONNECT_JITTER")? {
            config.reconnect_jitter = jitter;
        }
        if let Some(attempts) = env_parse("MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(limit) = env_parse("OUTBOUND_QUEUE_LIMIT")? {
            config.outbound_queue_limit = limit;
        }
        if let Some(ms) = env_parse::<u64>("POWER_WATCHDOG_MS")? {
            config.power_watchdog = Duration::from_millis(ms);
        }
        if let Some(ratio) = env_parse("TOKEN_REFRESH_RATIO")? {
            config.token_refresh_ratio = ratio;
        }
        if let Some(ms) = env_parse::<u64>("FALLBACK_TOKEN_LIFETIME_MS")? {
            config.fallback_token_lifetime = Duration::from_millis(ms);
        }
        if let Some(limit) = env_parse("DIRECTORY_LISTING_LIMIT")? {
            config.directory_listing_limit = limit;
        }
        if let Some(ms) = env_parse::<u64>("HTTP_TIMEOUT_MS")? {
            config.http_timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.api_url.trim().is_empty() {
            return Err(SyncError::config("api_url", "must not be empty"));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(SyncError::config("api_url", "must be an http(s) URL"));
        }
        if self.reconnect_base.is_zero() {
            return Err(SyncError::config("reconnect_base", "must be positive"));
        }
        if self.reconnect_factor < 1.0 || !self.reconnect_factor.is_finite() {
            return Err(SyncError::config("reconnect_factor", "must be at least 1"));
        }
        if self.reconnect_cap < self.reconnect_base {
            return Err(SyncError::config("reconnect_cap", "must not be below reconnect_base"));
        }
        if !(0.0..1.0).contains(&self.reconnect_jitter) {
            return Err(SyncError::config("reconnect_jitter", "must be in [0, 1)"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SyncError::config("max_reconnect_attempts", "must be positive"));
        }
        if self.outbound_queue_limit == 0 {
            return Err(SyncError::config("outbound_queue_limit", "must be positive"));
        }
        if self.power_watchdog.is_zero() {
            return Err(SyncError::config("power_watchdog", "must be positive"));
        }
        if !(self.token_refresh_ratio > 0.0 && self.token_refresh_ratio < 1.0) {
            return Err(SyncError::config("token_refresh_ratio", "must be in (0, 1)"));
        }
        if self.fallback_token_lifetime.is_zero() {
            return Err(SyncError::config("fallback_token_lifetime", "must be positive"));
        }
        if self.directory_listing_limit == 0 {
            return Err(SyncError::config("directory_listing_limit", "must be positive"));
        }
        if self.http_timeout.is_zero() {
            return Err(SyncError::config("http_timeout", "must be positive"));
        }
        Ok(())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.reconnect_base,
            self.reconnect_factor,
            self.reconnect_cap,
            self.reconnect_jitter,
        )
    }

    /// Settings for a connection manager.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            backoff: self.backoff(),
            max_attempts: self.max_reconnect_attempts,
            queue_capacity: self.outbound_queue_limit,
            refresh_ratio: self.token_refresh_ratio,
            fallback_token_lifetime: self.fallback_token_lifetime,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> SyncResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            SyncError::config(format!("{}{}", ENV_PREFIX, name), format!("'{}': {}", raw, e))
        }),
    }
}
