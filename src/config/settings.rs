//! Persisted settings.
//!
//! The relay reads its endpoint and credential assignments from a key/value
//! store shared with the settings UI. Keys and shapes:
//!
//! | Key | Shape |
//! |-----|-------|
//! | `relayPort` | number |
//! | `gatewayToken` | string |
//! | `relayPortByTabId` | `{ "<tabId>": port }` |
//! | `gatewayTokenByTabId` | `{ "<tabId>": token }` |
//! | `lastAttachError` | `{ tabId, message, at }` |
//! | `forkFeatures` | `{ version, perTabRelay, allowlist, retryConnect }` |
//! | `autoOpenChatBrowsers` | bool |
//! | `chatBrowserUrls` | string[] |
//! | `chatBrowserBasePorts` | number[] |

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifiers::{RelayKey, TabId};
use crate::policy::FEATURE_VERSION;

use super::options::{DEFAULT_CHAT_BROWSER_PORTS, DEFAULT_RELAY_PORT, canvas_url};

// ============================================================================
// Constants
// ============================================================================

const RELAY_PORT: &str = "relayPort";
const GATEWAY_TOKEN: &str = "gatewayToken";
const PORT_BY_TAB: &str = "relayPortByTabId";
const TOKEN_BY_TAB: &str = "gatewayTokenByTabId";
const LAST_ATTACH_ERROR: &str = "lastAttachError";
const FORK_FEATURES: &str = "forkFeatures";
const AUTO_OPEN: &str = "autoOpenChatBrowsers";
const CHAT_URLS: &str = "chatBrowserUrls";
const CHAT_PORTS: &str = "chatBrowserBasePorts";

// ============================================================================
// SettingsStore
// ============================================================================

/// Key/value persistence for relay settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Reads a value; `None` if unset.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes a value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Deletes a value.
    async fn remove(&self, key: &str) -> Result<()>;
}

// ============================================================================
// MemorySettings
// ============================================================================

/// In-memory settings store.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<FxHashMap<String, Value>>,
}

impl MemorySettings {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `values`.
    #[must_use]
    pub fn with_values<K: Into<String>>(values: impl IntoIterator<Item = (K, Value)>) -> Self {
        let store = Self::new();
        {
            let mut map = store.values.lock();
            for (key, value) in values {
                map.insert(key.into(), value);
            }
        }
        store
    }

    /// Returns a copy of a value without going through the async API.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// JsonFileSettings
// ============================================================================

/// Settings store persisted as one JSON object on disk.
///
/// The file is loaded on open and rewritten after every change.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: AsyncMutex<Map<String, Value>>,
}

impl JsonFileSettings {
    /// Opens (or starts) a settings file.
    ///
    /// A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Map::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), keys = values.len(), "Settings file opened");

        Ok(Self {
            path,
            values: AsyncMutex::new(values),
        })
    }

    /// Returns the backing file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, values: &Map<String, Value>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(values)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettings {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().await;
        values.insert(key.to_string(), value);
        self.flush(&values).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().await;
        if values.remove(key).is_some() {
            self.flush(&values).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Last recorded attach failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachFailure {
    /// Tab the failure concerns.
    pub tab_id: TabId,
    /// Failure message.
    pub message: String,
    /// Unix time in milliseconds.
    pub at: u64,
}

/// Feature marker written on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMarker {
    /// Marker version.
    pub version: String,
    /// Per-tab relay assignment is supported.
    pub per_tab_relay: bool,
    /// Commands are allow-listed.
    pub allowlist: bool,
    /// Socket connects are retried.
    pub retry_connect: bool,
}

impl FeatureMarker {
    /// Returns the marker describing this build.
    #[must_use]
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION.to_string(),
            per_tab_relay: true,
            allowlist: true,
            retry_connect: true,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Coerces a stored port value, falling back to the default port.
///
/// Strings are read like an integer literal prefix (`"9222abc"` is 9222);
/// anything outside `1..=65535` is replaced by the default.
#[must_use]
pub fn clamp_port(value: Option<&Value>) -> u16 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => parse_int_prefix(s),
        _ => None,
    };

    match parsed {
        Some(n) if (1..=i64::from(u16::MAX)).contains(&n) => n as u16,
        _ => DEFAULT_RELAY_PORT,
    }
}

fn parse_int_prefix(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

fn string_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Settings
// ============================================================================

/// Typed view over a [`SettingsStore`].
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Settings {
    /// Wraps a store.
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    async fn object(&self, key: &str) -> Result<Map<String, Value>> {
        Ok(match self.store.get(key).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Relay endpoint
    // ------------------------------------------------------------------------

    /// Returns the default relay port.
    pub async fn relay_port(&self) -> Result<u16> {
        Ok(clamp_port(self.store.get(RELAY_PORT).await?.as_ref()))
    }

    /// Returns the default credential (trimmed, possibly empty).
    pub async fn gateway_token(&self) -> Result<String> {
        Ok(string_value(self.store.get(GATEWAY_TOKEN).await?.as_ref()))
    }

    /// Stores the default relay port.
    pub async fn set_relay_port(&self, port: u16) -> Result<()> {
        self.store.set(RELAY_PORT, json!(port)).await
    }

    /// Stores the default credential.
    pub async fn set_gateway_token(&self, token: &str) -> Result<()> {
        self.store.set(GATEWAY_TOKEN, json!(token.trim())).await
    }

    /// Resolves the relay key for a tab.
    ///
    /// Per-tab overrides win over the defaults; a per-tab entry that is
    /// present but empty still wins.
    pub async fn relay_for_tab(&self, tab: TabId) -> Result<RelayKey> {
        let id = tab.to_string();
        let ports = self.object(PORT_BY_TAB).await?;
        let tokens = self.object(TOKEN_BY_TAB).await?;

        let port = match ports.get(&id).filter(|v| !v.is_null()) {
            Some(value) => clamp_port(Some(value)),
            None => self.relay_port().await?,
        };
        let token = match tokens.get(&id).filter(|v| !v.is_null()) {
            Some(value) => string_value(Some(value)),
            None => self.gateway_token().await?,
        };

        Ok(RelayKey::new(port, token))
    }

    // ------------------------------------------------------------------------
    // Per-tab overrides
    // ------------------------------------------------------------------------

    /// Assigns a port and credential to a tab.
    pub async fn assign_tab(&self, tab: TabId, port: u16, token: &str) -> Result<()> {
        let id = tab.to_string();
        let mut ports = self.object(PORT_BY_TAB).await?;
        let mut tokens = self.object(TOKEN_BY_TAB).await?;
        ports.insert(id.clone(), json!(clamp_port(Some(&json!(port)))));
        tokens.insert(id, json!(token.trim()));
        self.store.set(PORT_BY_TAB, Value::Object(ports)).await?;
        self.store.set(TOKEN_BY_TAB, Value::Object(tokens)).await
    }

    /// Assigns a port to a tab, copying the default credential when one is set.
    pub async fn assign_tab_port(&self, tab: TabId, port: u16) -> Result<()> {
        let id = tab.to_string();
        let mut ports = self.object(PORT_BY_TAB).await?;
        ports.insert(id.clone(), json!(clamp_port(Some(&json!(port)))));
        self.store.set(PORT_BY_TAB, Value::Object(ports)).await?;

        let token = self.gateway_token().await?;
        if !token.is_empty() {
            let mut tokens = self.object(TOKEN_BY_TAB).await?;
            tokens.insert(id, json!(token));
            self.store.set(TOKEN_BY_TAB, Value::Object(tokens)).await?;
        }
        Ok(())
    }

    /// Returns the tabs holding a port override.
    pub async fn tab_override_ids(&self) -> Result<Vec<TabId>> {
        let ports = self.object(PORT_BY_TAB).await?;
        Ok(ports.keys().filter_map(|key| TabId::parse(key)).collect())
    }

    /// Drops the overrides of the given tabs. Unparsable keys are dropped too.
    pub async fn clear_tab_overrides(&self, tabs: &[TabId]) -> Result<()> {
        let mut ports = self.object(PORT_BY_TAB).await?;
        let mut tokens = self.object(TOKEN_BY_TAB).await?;
        let before = (ports.len(), tokens.len());

        let doomed = |key: &String| match TabId::parse(key) {
            Some(id) => tabs.contains(&id),
            None => true,
        };
        ports.retain(|key, _| !doomed(key));
        tokens.retain(|key, _| !doomed(key));

        if before != (ports.len(), tokens.len()) {
            debug!(removed = before.0 - ports.len(), "Cleared tab overrides");
            self.store.set(PORT_BY_TAB, Value::Object(ports)).await?;
            self.store.set(TOKEN_BY_TAB, Value::Object(tokens)).await?;
        }
        Ok(())
    }

    /// Drops one tab's overrides.
    pub async fn clear_tab_override(&self, tab: TabId) -> Result<()> {
        let id = tab.to_string();
        let mut ports = self.object(PORT_BY_TAB).await?;
        if ports.remove(&id).is_some() {
            self.store.set(PORT_BY_TAB, Value::Object(ports)).await?;
        }
        let mut tokens = self.object(TOKEN_BY_TAB).await?;
        if tokens.remove(&id).is_some() {
            self.store.set(TOKEN_BY_TAB, Value::Object(tokens)).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Records the last attach failure.
    pub async fn record_attach_error(&self, tab: TabId, message: &str) -> Result<()> {
        let record = AttachFailure {
            tab_id: tab,
            message: message.to_string(),
            at: unix_millis(),
        };
        self.store
            .set(LAST_ATTACH_ERROR, serde_json::to_value(record)?)
            .await
    }

    /// Returns the last attach failure, if one was recorded and is readable.
    pub async fn last_attach_error(&self) -> Result<Option<AttachFailure>> {
        let Some(value) = self.store.get(LAST_ATTACH_ERROR).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, "Unreadable lastAttachError");
                Ok(None)
            }
        }
    }

    /// Writes the feature marker.
    pub async fn write_feature_marker(&self) -> Result<()> {
        self.store
            .set(FORK_FEATURES, serde_json::to_value(FeatureMarker::current())?)
            .await
    }

    /// Returns the stored feature marker.
    pub async fn feature_marker(&self) -> Result<Option<FeatureMarker>> {
        Ok(self
            .store
            .get(FORK_FEATURES)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    // ------------------------------------------------------------------------
    // Auto-open
    // ------------------------------------------------------------------------

    /// Returns whether startup opens the configured tabs. Defaults to `true`.
    pub async fn auto_open_enabled(&self) -> Result<bool> {
        Ok(match self.store.get(AUTO_OPEN).await? {
            Some(Value::Bool(enabled)) => enabled,
            Some(Value::Null) | None => true,
            Some(_) => true,
        })
    }

    /// Returns the URLs opened on startup.
    ///
    /// With no stored URLs, derives them from the base ports (or the
    /// defaults) and persists the derived list.
    pub async fn auto_open_urls(&self) -> Result<Vec<String>> {
        let urls: Vec<String> = match self.store.get(CHAT_URLS).await? {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| string_value(Some(item)))
                .collect(),
            _ => Vec::new(),
        };
        if !urls.is_empty() {
            return Ok(urls);
        }

        let stored_ports: Vec<u16> = match self.store.get(CHAT_PORTS).await? {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| clamp_port(Some(item)))
                .collect(),
            _ => Vec::new(),
        };
        let ports = if stored_ports.is_empty() {
            DEFAULT_CHAT_BROWSER_PORTS.to_vec()
        } else {
            stored_ports
        };

        let urls: Vec<String> = ports.iter().map(|port| canvas_url(*port)).collect();
        self.store.set(CHAT_URLS, json!(urls)).await?;
        self.store.set(CHAT_PORTS, json!(ports)).await?;
        self.store.set(AUTO_OPEN, Value::Bool(true)).await?;

        debug!(count = urls.len(), "Derived auto-open URLs");
        Ok(urls)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: u32) -> TabId {
        TabId::new(id).expect("non-zero tab id")
    }

    fn settings_with(values: Vec<(&str, Value)>) -> (Arc<MemorySettings>, Settings) {
        let store = Arc::new(MemorySettings::with_values(values));
        (Arc::clone(&store), Settings::new(store))
    }

    #[test]
    fn test_clamp_port() {
        assert_eq!(clamp_port(None), DEFAULT_RELAY_PORT);
        assert_eq!(clamp_port(Some(&json!(9222))), 9222);
        assert_eq!(clamp_port(Some(&json!("9222abc"))), 9222);
        assert_eq!(clamp_port(Some(&json!(" 80"))), 80);
        assert_eq!(clamp_port(Some(&json!(0))), DEFAULT_RELAY_PORT);
        assert_eq!(clamp_port(Some(&json!(70000))), DEFAULT_RELAY_PORT);
        assert_eq!(clamp_port(Some(&json!("-5"))), DEFAULT_RELAY_PORT);
        assert_eq!(clamp_port(Some(&json!(true))), DEFAULT_RELAY_PORT);
        assert_eq!(clamp_port(Some(&json!(8080.9))), 8080);
    }

    #[tokio::test]
    async fn test_defaults_when_empty() {
        let (_, settings) = settings_with(vec![]);
        assert_eq!(settings.relay_port().await.unwrap(), DEFAULT_RELAY_PORT);
        assert_eq!(settings.gateway_token().await.unwrap(), "");
        assert!(settings.auto_open_enabled().await.unwrap());
        assert!(settings.last_attach_error().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relay_for_tab_prefers_override() {
        let (_, settings) = settings_with(vec![
            ("relayPort", json!(9000)),
            ("gatewayToken", json!(" global ")),
            ("relayPortByTabId", json!({ "7": 9222 })),
            ("gatewayTokenByTabId", json!({ "7": "tok" })),
        ]);

        let key = settings.relay_for_tab(tab(7)).await.unwrap();
        assert_eq!(key, RelayKey::new(9222, "tok"));

        let key = settings.relay_for_tab(tab(8)).await.unwrap();
        assert_eq!(key, RelayKey::new(9000, "global"));
    }

    #[tokio::test]
    async fn test_assign_tab_port_copies_global_token() {
        let (store, settings) = settings_with(vec![("gatewayToken", json!("tok"))]);
        settings.assign_tab_port(tab(3), 19001).await.unwrap();

        assert_eq!(store.snapshot("relayPortByTabId"), Some(json!({ "3": 19001 })));
        assert_eq!(store.snapshot("gatewayTokenByTabId"), Some(json!({ "3": "tok" })));
    }

    #[tokio::test]
    async fn test_assign_tab_port_without_token() {
        let (store, settings) = settings_with(vec![]);
        settings.assign_tab_port(tab(3), 19001).await.unwrap();
        assert!(store.snapshot("gatewayTokenByTabId").is_none());
    }

    #[tokio::test]
    async fn test_clear_tab_overrides() {
        let (store, settings) = settings_with(vec![
            ("relayPortByTabId", json!({ "1": 1, "2": 2, "junk": 3 })),
            ("gatewayTokenByTabId", json!({ "1": "a", "2": "b" })),
        ]);

        let mut ids = settings.tab_override_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![tab(1), tab(2)]);

        settings.clear_tab_overrides(&[tab(1)]).await.unwrap();
        assert_eq!(store.snapshot("relayPortByTabId"), Some(json!({ "2": 2 })));
        assert_eq!(store.snapshot("gatewayTokenByTabId"), Some(json!({ "2": "b" })));

        settings.clear_tab_override(tab(2)).await.unwrap();
        assert_eq!(store.snapshot("relayPortByTabId"), Some(json!({})));
    }

    #[tokio::test]
    async fn test_attach_error_round_trip() {
        let (_, settings) = settings_with(vec![]);
        settings.record_attach_error(tab(4), "boom").await.unwrap();

        let record = settings.last_attach_error().await.unwrap().unwrap();
        assert_eq!(record.tab_id, tab(4));
        assert_eq!(record.message, "boom");
        assert!(record.at > 0);
    }

    #[tokio::test]
    async fn test_feature_marker() {
        let (store, settings) = settings_with(vec![]);
        settings.write_feature_marker().await.unwrap();
        let stored = store.snapshot("forkFeatures").unwrap();
        assert_eq!(stored["version"], FEATURE_VERSION);
        assert_eq!(stored["perTabRelay"], true);
    }

    #[tokio::test]
    async fn test_auto_open_urls_derived_and_persisted() {
        let (store, settings) = settings_with(vec![]);
        let urls = settings.auto_open_urls().await.unwrap();
        assert_eq!(
            urls,
            vec![
                "http://127.0.0.1:18789/__openclaw__/canvas/".to_string(),
                "http://127.0.0.1:19001/__openclaw__/canvas/".to_string(),
            ]
        );
        assert_eq!(store.snapshot("chatBrowserBasePorts"), Some(json!([18789, 19001])));
        assert_eq!(store.snapshot("autoOpenChatBrowsers"), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_auto_open_urls_from_custom_ports() {
        let (_, settings) = settings_with(vec![("chatBrowserBasePorts", json!([7000]))]);
        let urls = settings.auto_open_urls().await.unwrap();
        assert_eq!(urls, vec![canvas_url(7000)]);
    }

    #[tokio::test]
    async fn test_json_file_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileSettings::open(&path).await.unwrap();
        store.set("relayPort", json!(9333)).await.unwrap();
        drop(store);

        let reopened = JsonFileSettings::open(&path).await.unwrap();
        assert_eq!(reopened.get("relayPort").await.unwrap(), Some(json!(9333)));

        reopened.remove("relayPort").await.unwrap();
        assert_eq!(reopened.get("relayPort").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_file_settings_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        assert!(JsonFileSettings::open(&path).await.is_err());
    }
}
