//! Session configuration.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Default value of [`SessionConfig::max_reconnect_attempts`].
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Default value of [`SessionConfig::reconnect_interval_ms`].
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1_000;

/// Default value of [`SessionConfig::keepalive_interval_ms`].
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 1_000;

/// Default value of [`SessionConfig::max_keepalive_failures`].
pub const DEFAULT_MAX_KEEPALIVE_FAILURES: u32 = 3;

/// Configuration consumed by [`Session::connect`].
///
/// [`Session::connect`]: crate::session::Session::connect
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// URL of the WebSocket endpoint to connect to.
    pub url: Url,

    /// Number of reconnect attempts allowed before the session gives up and
    /// transitions to [`Disconnected`]/[`Error`].
    ///
    /// [`Disconnected`]: crate::session::SessionStatus::Disconnected
    /// [`Error`]: crate::session::SessionStatus::Error
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Fixed interval between reconnect attempts, in milliseconds.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// How long the session may stay silent before a keepalive ping is sent,
    /// in milliseconds.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Number of consecutive unanswered keepalives tolerated before the
    /// session is considered dead and force-reconnected.
    #[serde(default = "default_max_keepalive_failures")]
    pub max_keepalive_failures: u32,
}

const fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

const fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

const fn default_keepalive_interval_ms() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL_MS
}

const fn default_max_keepalive_failures() -> u32 {
    DEFAULT_MAX_KEEPALIVE_FAILURES
}

impl SessionConfig {
    /// Creates a new [`SessionConfig`] for `url` with every other field set
    /// to its default.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            max_keepalive_failures: DEFAULT_MAX_KEEPALIVE_FAILURES,
        }
    }

    /// Returns [`Self::reconnect_interval_ms`] as a [`Duration`].
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Returns [`Self::keepalive_interval_ms`] as a [`Duration`].
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_fills_in_defaults() {
        let url = Url::parse("wss://example.com/ws/").unwrap();
        let cfg = SessionConfig::new(url.clone());

        assert_eq!(cfg.url, url);
        assert_eq!(
            cfg.max_reconnect_attempts,
            DEFAULT_MAX_RECONNECT_ATTEMPTS
        );
        assert_eq!(
            cfg.reconnect_interval_ms,
            DEFAULT_RECONNECT_INTERVAL_MS
        );
        assert_eq!(
            cfg.keepalive_interval_ms,
            DEFAULT_KEEPALIVE_INTERVAL_MS
        );
        assert_eq!(
            cfg.max_keepalive_failures,
            DEFAULT_MAX_KEEPALIVE_FAILURES
        );
    }

    #[test]
    fn deserializes_with_missing_optional_fields() {
        let json = r#"{"url": "ws://localhost:8080/ws/"}"#;
        let cfg: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_reconnect_attempts, DEFAULT_MAX_RECONNECT_ATTEMPTS);
    }
}
