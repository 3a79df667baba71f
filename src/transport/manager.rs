//! One relay socket per key.
//!
//! [`ConnectionManager`] owns every open [`RelayConnection`], keyed by
//! [`RelayKey`]. Concurrent [`ensure_connection`](ConnectionManager::ensure_connection)
//! calls for the same key share a single connect attempt: the first caller
//! spawns the connect task and stores it as a shared future, later callers
//! await the same outcome.
//!
//! # Connect Sequence
//!
//! 1. HTTP reachability preflight (auth rejection is final)
//! 2. Credential presence check
//! 3. Socket attempts with a fixed delay between them
//! 4. Register the connection, install bridge listeners once per process

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, RelayKey, RequestId};
use crate::protocol::Outbound;

use super::connection::{CloseHook, CloseReason, ConnectionHandler, ConnectionState, RelayConnection};
use super::connector::{Connector, RelayHealth};

// ============================================================================
// Types
// ============================================================================

/// Shared outcome of an in-flight connect.
type ConnectOutcome = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Default)]
struct ManagerState {
    open: FxHashMap<RelayKey, RelayConnection>,
    connecting: FxHashMap<RelayKey, ConnectOutcome>,
}

struct ManagerShared {
    config: RelayConfig,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn ConnectionHandler>,
    state: Mutex<ManagerState>,
    listeners_installed: AtomicBool,
}

/// Clears the in-flight connect entry when the connect task ends, including
/// by panic.
struct ConnectingEntry {
    manager: ConnectionManager,
    key: RelayKey,
}

impl Drop for ConnectingEntry {
    fn drop(&mut self) {
        self.manager.shared.state.lock().connecting.remove(&self.key);
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Registry of relay connections.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(ManagerShared {
                config,
                connector,
                handler,
                state: Mutex::new(ManagerState::default()),
                listeners_installed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    // ========================================================================
    // Connecting
    // ========================================================================

    /// Makes sure an open socket exists for `key`.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`] if the credential is missing or rejected
    /// - [`Error::Connection`] / [`Error::ConnectionTimeout`] if every attempt failed
    pub async fn ensure_connection(&self, key: &RelayKey) -> Result<()> {
        let outcome = {
            let mut state = self.shared.state.lock();

            if state.open.get(key).is_some_and(RelayConnection::is_open) {
                return Ok(());
            }

            match state.connecting.get(key) {
                Some(outcome) => {
                    debug!(%key, "Joining in-flight connect");
                    outcome.clone()
                }
                None => {
                    let manager = self.clone();
                    let task_key = key.clone();
                    let task = tokio::spawn(async move {
                        let _clear = ConnectingEntry {
                            manager: manager.clone(),
                            key: task_key.clone(),
                        };
                        manager.connect(&task_key).await
                    });

                    let outcome = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(Error::connection(format!("Relay connect task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();

                    state.connecting.insert(key.clone(), outcome.clone());
                    outcome
                }
            }
        };

        outcome.await
    }

    async fn connect(&self, key: &RelayKey) -> Result<()> {
        let config = &self.shared.config;
        let base = config.http_base(key.port());

        match timeout(config.preflight_timeout, self.shared.connector.probe(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::connection(format!(
                    "Relay server not reachable at {base} (timeout)"
                )));
            }
        }

        if !key.has_credential() {
            return Err(Error::auth("Missing gateway token in relay settings"));
        }

        let mut last_error = None;
        for attempt in 0..config.connect_attempts {
            if attempt > 0 {
                info!(
                    %key,
                    attempt,
                    of = config.connect_attempts - 1,
                    "Relay connect retry"
                );
                sleep(config.connect_retry_delay).await;
            }

            match timeout(config.connect_timeout, self.shared.connector.connect(key)).await {
                Ok(Ok(socket)) => return self.register(key, socket),
                Ok(Err(e)) if e.is_auth_error() => return Err(e),
                Ok(Err(e)) => {
                    debug!(%key, attempt, error = %e, "Relay connect attempt failed");
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!(%key, attempt, "Relay connect attempt timed out");
                    last_error = Some(Error::connection_timeout(
                        config.connect_timeout.as_millis() as u64,
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::connection("Relay socket not available after connect")))
    }

    fn register(&self, key: &RelayKey, socket: super::RelaySocket) -> Result<()> {
        let id = ConnectionId::next();
        let weak: Weak<ManagerShared> = Arc::downgrade(&self.shared);
        let hook_key = key.clone();
        let on_close: CloseHook = Box::new(move |reason| {
            async move {
                if let Some(shared) = weak.upgrade() {
                    ConnectionManager { shared }
                        .handle_closed(&hook_key, id, reason)
                        .await;
                }
            }
            .boxed()
        });

        let connection = RelayConnection::spawn(
            id,
            key.clone(),
            socket,
            Arc::clone(&self.shared.handler),
            on_close,
        );

        let previous = self
            .shared
            .state
            .lock()
            .open
            .insert(key.clone(), connection.clone());
        if let Some(previous) = previous {
            previous.shutdown();
        }

        if !connection.is_open() {
            return Err(Error::connection("WebSocket closed during handshake"));
        }

        info!(%key, %id, "Relay connected");

        if !self.shared.listeners_installed.swap(true, Ordering::SeqCst) {
            debug!("Installing bridge listeners");
            self.shared.handler.install_listeners();
        }
        Ok(())
    }

    /// Deregisters a finished connection and cascades cleanup.
    ///
    /// A connection that was already replaced under its key is ignored.
    async fn handle_closed(&self, key: &RelayKey, id: ConnectionId, reason: CloseReason) {
        let current = {
            let mut state = self.shared.state.lock();
            match state.open.get(key) {
                Some(existing) if existing.id() == id => {
                    state.open.remove(key);
                    true
                }
                Some(_) => false,
                None => true,
            }
        };

        if !current {
            debug!(%key, %id, "Replaced relay connection closed");
            return;
        }

        warn!(%key, %id, %reason, "Relay connection closed");
        self.shared.handler.connection_closed(key, reason).await;
    }

    // ========================================================================
    // Traffic
    // ========================================================================

    /// Returns the open connection for `key`.
    #[must_use]
    pub fn connection(&self, key: &RelayKey) -> Option<RelayConnection> {
        self.shared
            .state
            .lock()
            .open
            .get(key)
            .filter(|c| c.is_open())
            .cloned()
    }

    /// Sends a message on the connection for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if no socket is open for `key`.
    pub fn send(&self, key: &RelayKey, message: &Outbound) -> Result<()> {
        self.connection(key)
            .ok_or_else(|| Error::connection("Relay not connected"))?
            .send(message)
    }

    /// Sends a request on the connection for `key` and awaits its completion.
    ///
    /// # Errors
    ///
    /// See [`RelayConnection::request`]; also [`Error::Connection`] if not connected.
    pub async fn request(
        &self,
        key: &RelayKey,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value> {
        let connection = self
            .connection(key)
            .ok_or_else(|| Error::connection("Relay not connected"))?;
        connection
            .request(id, method, params, self.shared.config.request_timeout)
            .await
    }

    /// Runs the reachability preflight for `key` without connecting.
    pub async fn probe(&self, key: &RelayKey) -> RelayHealth {
        match timeout(
            self.shared.config.preflight_timeout,
            self.shared.connector.probe(key),
        )
        .await
        {
            Ok(Ok(())) => RelayHealth::Reachable,
            Ok(Err(e)) if e.is_auth_error() => RelayHealth::Unauthorized,
            Ok(Err(_)) | Err(_) => RelayHealth::Unreachable,
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Returns `true` if an open socket exists for `key`.
    #[inline]
    #[must_use]
    pub fn is_connected(&self, key: &RelayKey) -> bool {
        self.connection(key).is_some()
    }

    /// Returns the lifecycle state for `key`.
    #[must_use]
    pub fn state(&self, key: &RelayKey) -> ConnectionState {
        let state = self.shared.state.lock();
        if state.open.get(key).is_some_and(RelayConnection::is_open) {
            ConnectionState::Open
        } else if state.connecting.contains_key(key) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Closed
        }
    }

    /// Returns the number of registered connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.state.lock().open.len()
    }

    /// Closes the connection for `key`, if any.
    pub fn close(&self, key: &RelayKey) {
        if let Some(connection) = self.shared.state.lock().open.get(key) {
            connection.shutdown();
        }
    }

    /// Closes every connection.
    pub fn shutdown(&self) {
        let connections: Vec<RelayConnection> =
            self.shared.state.lock().open.values().cloned().collect();
        for connection in connections {
            connection.shutdown();
        }
        debug!("Relay connections shutting down");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::protocol::ForwardedCommand;
    use crate::transport::RelaySocket;

    struct Refusing {
        probes: AtomicUsize,
        connects: AtomicUsize,
        auth_on_connect: bool,
    }

    #[async_trait]
    impl Connector for Refusing {
        async fn probe(&self, _key: &RelayKey) -> Result<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn connect(&self, _key: &RelayKey) -> Result<RelaySocket> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.auth_on_connect {
                Err(Error::auth("unauthorized"))
            } else {
                Err(Error::connection("WebSocket connect failed"))
            }
        }
    }

    struct Noop;

    #[async_trait]
    impl ConnectionHandler for Noop {
        async fn handle_command(&self, _key: &RelayKey, _command: ForwardedCommand) -> Result<Value> {
            Ok(Value::Null)
        }

        async fn connection_closed(&self, _key: &RelayKey, _reason: CloseReason) {}
    }

    fn manager(auth_on_connect: bool) -> (ConnectionManager, Arc<Refusing>) {
        let connector = Arc::new(Refusing {
            probes: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            auth_on_connect,
        });
        let manager = ConnectionManager::new(
            RelayConfig::default(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::new(Noop),
        );
        (manager, connector)
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_socket() {
        let (manager, connector) = manager(false);
        let err = manager
            .ensure_connection(&RelayKey::new(9222, ""))
            .await
            .unwrap_err();

        assert!(err.is_auth_error());
        assert_eq!(connector.probes.load(Ordering::SeqCst), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let (manager, connector) = manager(false);
        let err = manager
            .ensure_connection(&RelayKey::new(9222, "tok"))
            .await
            .unwrap_err();

        assert!(err.is_connection_error());
        assert_eq!(err.to_string(), "WebSocket connect failed");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert_eq!(manager.state(&RelayKey::new(9222, "tok")), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_rejection_is_final() {
        let (manager, connector) = manager(true);
        let err = manager
            .ensure_connection(&RelayKey::new(9222, "tok"))
            .await
            .unwrap_err();

        assert!(err.is_auth_error());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    /// Panics on the first probe, refuses afterwards.
    struct PanicOnce {
        probes: AtomicUsize,
    }

    #[async_trait]
    impl Connector for PanicOnce {
        async fn probe(&self, _key: &RelayKey) -> Result<()> {
            if self.probes.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("connector blew up");
            }
            Err(Error::connection("refused"))
        }

        async fn connect(&self, _key: &RelayKey) -> Result<RelaySocket> {
            Err(Error::connection("unreachable"))
        }
    }

    #[tokio::test]
    async fn test_panicked_connect_does_not_stick() {
        let connector = Arc::new(PanicOnce {
            probes: AtomicUsize::new(0),
        });
        let manager = ConnectionManager::new(
            RelayConfig::default(),
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::new(Noop),
        );
        let key = RelayKey::new(9222, "tok");

        let first = manager.ensure_connection(&key).await.unwrap_err();
        assert!(first.to_string().contains("connect task failed"));
        assert_eq!(manager.state(&key), ConnectionState::Closed);

        let second = manager.ensure_connection(&key).await.unwrap_err();
        assert_eq!(second.to_string(), "refused");
        assert_eq!(connector.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let (manager, _) = manager(false);
        let err = manager
            .send(&RelayKey::new(1, "x"), &Outbound::pong())
            .unwrap_err();
        assert_eq!(err.to_string(), "Relay not connected");
    }

    #[tokio::test]
    async fn test_probe_health() {
        let (manager, _) = manager(false);
        assert_eq!(manager.probe(&RelayKey::new(1, "x")).await, RelayHealth::Reachable);
    }
}
