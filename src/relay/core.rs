//! Core Relay struct, accessors and bridge listener.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bridge::{BridgeEvent, DebuggerBridge, TabHost};
use crate::config::{RelayConfig, Settings};
use crate::error::{Error, Result};
use crate::identifiers::{RelayKey, RequestId, TabId};
use crate::policy::{Allowlist, RateLimiter, WindowEdge};
use crate::protocol::{ForwardedCommand, Outbound};
use crate::session::SessionRegistry;
use crate::transport::{
    CloseReason, ConnectionHandler, ConnectionManager, ConnectionState, Connector, RelayHealth,
};

use super::builder::RelayBuilder;

// ============================================================================
// Types
// ============================================================================

/// Internal shared state of the relay.
pub(crate) struct RelayInner {
    pub config: RelayConfig,
    pub settings: Settings,
    pub bridge: Arc<dyn DebuggerBridge>,
    pub host: Arc<dyn TabHost>,
    pub allowlist: &'static Allowlist,
    pub registry: SessionRegistry,
    pub manager: ConnectionManager,
    pub event_limiter: RateLimiter,
    pub create_target_limiter: RateLimiter,
    pub listener: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// Relay
// ============================================================================

/// The relay core.
///
/// Owns the connection manager, the session registry and the rate limiters,
/// and talks to the host through the injected [`DebuggerBridge`] and
/// [`TabHost`]. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    pub(crate) inner: Arc<RelayInner>,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("tabs", &self.inner.registry.len())
            .field("connections", &self.inner.manager.connection_count())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    /// Assembles the relay. The connection manager reports back through a
    /// weak link so that the relay owns the manager and not the reverse.
    pub(crate) fn assemble(
        config: RelayConfig,
        settings: Settings,
        bridge: Arc<dyn DebuggerBridge>,
        host: Arc<dyn TabHost>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<RelayInner>| {
            let link = Arc::new(RelayLink {
                inner: weak.clone(),
            });
            let manager = ConnectionManager::new(config.clone(), connector, link);

            RelayInner {
                event_limiter: RateLimiter::new(
                    config.event_limit,
                    config.event_window,
                    WindowEdge::Inclusive,
                ),
                create_target_limiter: RateLimiter::new(
                    config.create_target_limit,
                    config.create_target_window,
                    WindowEdge::Exclusive,
                ),
                config,
                settings,
                bridge,
                host,
                allowlist: Allowlist::standard(),
                registry: SessionRegistry::new(),
                manager,
                listener: Mutex::new(None),
            }
        });

        Self { inner }
    }
}

// ============================================================================
// Relay - Accessors
// ============================================================================

impl Relay {
    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Returns the persisted settings.
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Returns the session registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Returns the connection manager.
    #[inline]
    #[must_use]
    pub fn connections(&self) -> &ConnectionManager {
        &self.inner.manager
    }

    /// Returns `true` if the bridge listener is running.
    #[inline]
    #[must_use]
    pub fn listening(&self) -> bool {
        self.inner.listener.lock().is_some()
    }
}

// ============================================================================
// Relay - Connections
// ============================================================================

impl Relay {
    /// Makes sure a socket is open for `key`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::ensure_connection`].
    pub async fn ensure_connection(&self, key: &RelayKey) -> Result<()> {
        self.inner.manager.ensure_connection(key).await
    }

    /// Returns `true` if a socket is open for `key`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self, key: &RelayKey) -> bool {
        self.inner.manager.is_connected(key)
    }

    /// Returns the lifecycle state of the connection for `key`.
    #[inline]
    #[must_use]
    pub fn connection_state(&self, key: &RelayKey) -> ConnectionState {
        self.inner.manager.state(key)
    }

    /// Sends a message to the relay server for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if not connected.
    pub fn send(&self, key: &RelayKey, message: &Outbound) -> Result<()> {
        self.inner.manager.send(key, message)
    }

    /// Sends a request to the relay server for `key` and awaits the answer.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::request`].
    pub async fn request(
        &self,
        key: &RelayKey,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        self.inner.manager.request(key, id, method, params).await
    }

    /// Checks whether a relay server answers on `port` with `token`.
    pub async fn check_relay(&self, port: u16, token: &str) -> RelayHealth {
        let health = self.inner.manager.probe(&RelayKey::new(port, token)).await;
        debug!(port, ?health, "Relay health checked");
        health
    }

    /// Closes every connection and stops the bridge listener.
    pub fn shutdown(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
        }
        self.inner.manager.shutdown();
        info!("Relay shut down");
    }
}

// ============================================================================
// Relay - Bridge Listener
// ============================================================================

impl Relay {
    /// Subscribes to bridge events. Later calls are no-ops.
    pub(crate) fn install_listeners(&self) {
        let mut listener = self.inner.listener.lock();
        if listener.is_some() {
            return;
        }

        let mut events = self.inner.bridge.subscribe();
        let weak = Arc::downgrade(&self.inner);
        *listener = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Relay { inner }.handle_bridge_event(event).await;
            }
            debug!("Bridge event stream ended");
        }));

        debug!("Bridge listener installed");
    }

    /// Dispatches one bridge callback.
    pub async fn handle_bridge_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Event {
                source,
                method,
                params,
            } => {
                self.forward_event(&source, &method, params);
            }
            BridgeEvent::Detached { tab_id, reason } => {
                self.on_bridge_detached(tab_id, &reason).await;
            }
            BridgeEvent::TabRemoved { tab_id } => {
                self.on_tab_removed(tab_id).await;
            }
        }
    }

    /// Returns `true` if the bridge reports a debugger on the tab.
    pub(crate) async fn bridge_attached(&self, tab: TabId) -> bool {
        match self.inner.bridge.targets().await {
            Ok(targets) => targets
                .iter()
                .any(|target| target.tab_id == Some(tab) && target.attached),
            Err(e) => {
                debug!(tab = %tab, error = %e, "Listing debug targets failed");
                false
            }
        }
    }
}

// ============================================================================
// RelayLink
// ============================================================================

/// Connection callbacks into a relay that may already be gone.
struct RelayLink {
    inner: Weak<RelayInner>,
}

impl RelayLink {
    fn relay(&self) -> Option<Relay> {
        self.inner.upgrade().map(|inner| Relay { inner })
    }
}

#[async_trait]
impl ConnectionHandler for RelayLink {
    async fn handle_command(&self, key: &RelayKey, command: ForwardedCommand) -> Result<Value> {
        match self.relay() {
            Some(relay) => relay.handle_command(key, command).await,
            None => Err(Error::connection("Relay shut down")),
        }
    }

    async fn connection_closed(&self, key: &RelayKey, reason: CloseReason) {
        if let Some(relay) = self.relay() {
            relay.on_relay_closed(key, reason).await;
        }
    }

    fn install_listeners(&self) {
        if let Some(relay) = self.relay() {
            relay.install_listeners();
        }
    }
}
