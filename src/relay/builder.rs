//! Builder pattern for relay construction.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tab_relay::{MemorySettings, Relay, RelayConfig};
//!
//! let relay = Relay::builder()
//!     .config(RelayConfig::default())
//!     .settings(Arc::new(MemorySettings::new()))
//!     .bridge(bridge)
//!     .host(host)
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::bridge::{DebuggerBridge, TabHost};
use crate::config::{MemorySettings, RelayConfig, Settings, SettingsStore};
use crate::error::{Error, Result};
use crate::transport::{Connector, WsConnector};

use super::core::Relay;

// ============================================================================
// RelayBuilder
// ============================================================================

/// Builder for a [`Relay`].
///
/// The bridge and host are required. Without a connector the relay dials
/// TCP; without a settings store it keeps settings in memory.
#[derive(Default)]
pub struct RelayBuilder {
    config: Option<RelayConfig>,
    settings: Option<Arc<dyn SettingsStore>>,
    bridge: Option<Arc<dyn DebuggerBridge>>,
    host: Option<Arc<dyn TabHost>>,
    connector: Option<Arc<dyn Connector>>,
}

impl std::fmt::Debug for RelayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBuilder")
            .field("config", &self.config)
            .field("has_settings", &self.settings.is_some())
            .field("has_bridge", &self.bridge.is_some())
            .field("has_host", &self.host.is_some())
            .field("has_connector", &self.connector.is_some())
            .finish()
    }
}

impl RelayBuilder {
    /// Creates an empty builder.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the settings store.
    #[inline]
    #[must_use]
    pub fn settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    /// Sets the debugging bridge.
    #[inline]
    #[must_use]
    pub fn bridge(mut self, bridge: Arc<dyn DebuggerBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Sets the tab host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: Arc<dyn TabHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Sets the socket connector.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the relay.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the bridge or host is missing or the config is invalid
    /// - [`Error::Http`] if the default connector cannot be created
    pub fn build(self) -> Result<Relay> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let bridge = self
            .bridge
            .ok_or_else(|| Error::config("Debugger bridge is required"))?;
        let host = self
            .host
            .ok_or_else(|| Error::config("Tab host is required"))?;

        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector::new(config.clone())?),
        };
        let store = self
            .settings
            .unwrap_or_else(|| Arc::new(MemorySettings::new()));

        Ok(Relay::assemble(
            config,
            Settings::new(store),
            bridge,
            host,
            connector,
        ))
    }
}
