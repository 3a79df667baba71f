//! Relay tunables.
//!
//! Every timeout, retry budget and limit the relay core uses lives in
//! [`RelayConfig`]. Defaults match the production relay.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tab_relay::RelayConfig;
//!
//! let config = RelayConfig::new()
//!     .with_connect_attempts(5)
//!     .with_event_limit(50, Duration::from_secs(1));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::RelayKey;

// ============================================================================
// Constants
// ============================================================================

/// Port used when no valid port is configured.
pub const DEFAULT_RELAY_PORT: u16 = 18792;

/// Header carrying the relay credential on the reachability preflight.
pub const RELAY_TOKEN_HEADER: &str = "x-openclaw-relay-token";

/// Ports used to derive the default auto-open URLs.
pub const DEFAULT_CHAT_BROWSER_PORTS: [u16; 2] = [18789, 19001];

/// Origins that may never be attached.
const RESTRICTED_PREFIXES: [&str; 8] = [
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "view-source:",
    "chrome-devtools://",
    "https://chrome.google.com/webstore",
    "https://chromewebstore.google.com",
];

/// Returns the canvas URL served by a gateway on `port`.
#[inline]
#[must_use]
pub fn canvas_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/__openclaw__/canvas/")
}

// ============================================================================
// RelayConfig
// ============================================================================

/// Relay core configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Relay server host.
    pub host: String,

    /// Port used when settings hold none.
    pub default_port: u16,

    /// Timeout of the HTTP reachability check.
    pub preflight_timeout: Duration,

    /// Timeout of one socket attempt.
    pub connect_timeout: Duration,

    /// Socket attempts per connect.
    pub connect_attempts: u32,

    /// Delay before every socket attempt after the first.
    pub connect_retry_delay: Duration,

    /// Attempts made by attach-with-retry.
    pub attach_attempts: u32,

    /// Delays before attach attempts 2, 3, ...
    pub attach_retry_delays: Vec<Duration>,

    /// How long attach-with-retry waits for a tab to finish loading.
    pub tab_load_timeout: Duration,

    /// Pause between creating a tab and attaching it.
    pub create_target_settle: Duration,

    /// Forwarded events allowed per window.
    pub event_limit: u32,

    /// Event rate window.
    pub event_window: Duration,

    /// Target creations allowed per window.
    pub create_target_limit: u32,

    /// Target creation rate window.
    pub create_target_window: Duration,

    /// Timeout for requests sent to the relay.
    pub request_timeout: Duration,

    /// Debugging protocol version requested on attach.
    pub protocol_version: String,

    /// URL prefixes that may never be attached.
    pub restricted_prefixes: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            default_port: DEFAULT_RELAY_PORT,
            preflight_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(2),
            attach_attempts: 3,
            attach_retry_delays: vec![
                Duration::from_millis(1200),
                Duration::from_millis(2400),
                Duration::from_millis(3600),
            ],
            tab_load_timeout: Duration::from_secs(8),
            create_target_settle: Duration::from_millis(100),
            event_limit: 20,
            event_window: Duration::from_secs(1),
            create_target_limit: 5,
            create_target_window: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            protocol_version: "1.3".to_string(),
            restricted_prefixes: RESTRICTED_PREFIXES.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl RelayConfig {
    /// Creates a configuration with production defaults.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl RelayConfig {
    /// Sets the relay host.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the fallback port.
    #[inline]
    #[must_use]
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Sets the reachability check timeout.
    #[inline]
    #[must_use]
    pub fn with_preflight_timeout(mut self, timeout: Duration) -> Self {
        self.preflight_timeout = timeout;
        self
    }

    /// Sets the per-attempt socket timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the socket attempt budget.
    #[inline]
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    /// Sets the delay between socket attempts.
    #[inline]
    #[must_use]
    pub fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    /// Sets the attach attempt budget.
    #[inline]
    #[must_use]
    pub fn with_attach_attempts(mut self, attempts: u32) -> Self {
        self.attach_attempts = attempts;
        self
    }

    /// Sets the delays before attach retries.
    #[inline]
    #[must_use]
    pub fn with_attach_retry_delays(mut self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.attach_retry_delays = delays.into_iter().collect();
        self
    }

    /// Sets the tab load wait.
    #[inline]
    #[must_use]
    pub fn with_tab_load_timeout(mut self, timeout: Duration) -> Self {
        self.tab_load_timeout = timeout;
        self
    }

    /// Sets the pause between target creation and attach.
    #[inline]
    #[must_use]
    pub fn with_create_target_settle(mut self, delay: Duration) -> Self {
        self.create_target_settle = delay;
        self
    }

    /// Sets the event rate limit.
    #[inline]
    #[must_use]
    pub fn with_event_limit(mut self, limit: u32, window: Duration) -> Self {
        self.event_limit = limit;
        self.event_window = window;
        self
    }

    /// Sets the target creation rate limit.
    #[inline]
    #[must_use]
    pub fn with_create_target_limit(mut self, limit: u32, window: Duration) -> Self {
        self.create_target_limit = limit;
        self.create_target_window = window;
        self
    }

    /// Sets the relay request timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the debugging protocol version.
    #[inline]
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Adds a restricted URL prefix.
    #[inline]
    #[must_use]
    pub fn with_restricted_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.restricted_prefixes.push(prefix.into());
        self
    }
}

// ============================================================================
// Derived Values
// ============================================================================

impl RelayConfig {
    /// Checks that the budgets are usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on a zero budget or an empty host.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("host must not be empty"));
        }
        if self.default_port == 0 {
            return Err(Error::config("default port must be non-zero"));
        }
        if self.connect_attempts == 0 {
            return Err(Error::config("connect attempts must be at least 1"));
        }
        if self.attach_attempts == 0 {
            return Err(Error::config("attach attempts must be at least 1"));
        }
        if self.event_limit == 0 || self.create_target_limit == 0 {
            return Err(Error::config("rate limits must be at least 1"));
        }
        Ok(())
    }

    /// Returns `true` if `url` may not be attached.
    ///
    /// An empty URL is restricted.
    #[must_use]
    pub fn is_restricted_url(&self, url: &str) -> bool {
        url.is_empty()
            || self
                .restricted_prefixes
                .iter()
                .any(|prefix| url.starts_with(prefix.as_str()))
    }

    /// Returns the delay before attach attempt `attempt` (0-based).
    ///
    /// The first attempt never waits; attempts past the table reuse its first entry.
    #[must_use]
    pub fn attach_retry_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.attach_retry_delays
            .get(attempt as usize - 1)
            .or_else(|| self.attach_retry_delays.first())
            .copied()
            .unwrap_or(Duration::from_millis(1200))
    }

    /// Returns the HTTP base URL of the relay on `port`.
    #[inline]
    #[must_use]
    pub fn http_base(&self, port: u16) -> String {
        format!("http://{}:{port}", self.host)
    }

    /// Builds the socket URL for a key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host does not form a valid URL.
    pub fn ws_url(&self, key: &RelayKey) -> Result<Url> {
        let raw = if key.has_credential() {
            format!(
                "ws://{}:{}/extension?token={}",
                self.host,
                key.port(),
                urlencoding::encode(key.credential())
            )
        } else {
            format!("ws://{}:{}/extension", self.host, key.port())
        };
        Url::parse(&raw).map_err(|e| Error::config(format!("invalid relay url: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.default_port, 18792);
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.event_limit, 20);
        assert_eq!(config.create_target_limit, 5);
        assert_eq!(config.protocol_version, "1.3");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = RelayConfig::new()
            .with_default_port(9222)
            .with_connect_attempts(1)
            .with_event_limit(5, Duration::from_millis(500));

        assert_eq!(config.default_port, 9222);
        assert_eq!(config.connect_attempts, 1);
        assert_eq!(config.event_limit, 5);
        assert_eq!(config.event_window, Duration::from_millis(500));
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        assert!(RelayConfig::new().with_connect_attempts(0).validate().is_err());
        assert!(RelayConfig::new().with_host(" ").validate().is_err());
    }

    #[test]
    fn test_restricted_urls() {
        let config = RelayConfig::default();
        assert!(config.is_restricted_url(""));
        assert!(config.is_restricted_url("chrome://settings"));
        assert!(config.is_restricted_url("about:blank"));
        assert!(config.is_restricted_url("https://chromewebstore.google.com/detail/x"));
        assert!(!config.is_restricted_url("https://example.com"));
    }

    #[test]
    fn test_attach_retry_delays() {
        let config = RelayConfig::default();
        assert_eq!(config.attach_retry_delay(0), Duration::ZERO);
        assert_eq!(config.attach_retry_delay(1), Duration::from_millis(1200));
        assert_eq!(config.attach_retry_delay(2), Duration::from_millis(2400));
        assert_eq!(config.attach_retry_delay(9), Duration::from_millis(1200));
    }

    #[test]
    fn test_ws_url_encodes_token() {
        let config = RelayConfig::default();
        let url = config
            .ws_url(&RelayKey::new(9222, "a b&c"))
            .expect("valid url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:9222/extension?token=a%20b%26c");
    }

    #[test]
    fn test_ws_url_without_token() {
        let config = RelayConfig::default();
        let url = config.ws_url(&RelayKey::new(9222, "")).expect("valid url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:9222/extension");
    }

    #[test]
    fn test_canvas_url() {
        assert_eq!(canvas_url(18789), "http://127.0.0.1:18789/__openclaw__/canvas/");
    }
}
