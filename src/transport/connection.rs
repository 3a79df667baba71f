//! Relay socket and its event loop.
//!
//! Each [`RelayConnection`] owns one WebSocket to the relay server and two
//! tasks:
//!
//! - the I/O loop, multiplexing socket reads and queued outgoing frames
//!   with `tokio::select!`;
//! - the dispatcher, running server-pushed commands strictly in arrival
//!   order and replying on the same socket.
//!
//! # Event Loop
//!
//! | Incoming | Action |
//! |----------|--------|
//! | `ping` | answer `pong` directly |
//! | completion | resolve or reject the pending request |
//! | `forwardCDPCommand` | queue for the dispatcher |
//! | close / error / end | fail pending requests, run the close hook |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, RelayKey, RequestId};
use crate::protocol::{ForwardedCommand, Inbound, Outbound};

use super::pending::PendingRequestTable;

// ============================================================================
// CloseReason
// ============================================================================

/// Why a relay connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The server closed the socket or the stream ended.
    Closed,
    /// The socket failed.
    Error,
    /// Closed locally.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        })
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the connection for a relay key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connect is in flight.
    Connecting,
    /// The socket is open.
    Open,
    /// No usable socket.
    Closed,
}

// ============================================================================
// ConnectionHandler
// ============================================================================

/// Receives what a relay connection cannot handle itself.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Executes a server-pushed command; the outcome becomes the reply.
    async fn handle_command(&self, key: &RelayKey, command: ForwardedCommand) -> Result<Value>;

    /// Called once after the registered connection for `key` went away.
    async fn connection_closed(&self, key: &RelayKey, reason: CloseReason);

    /// Called after the first successful connection of the process.
    fn install_listeners(&self) {}
}

// ============================================================================
// Types
// ============================================================================

/// Invoked by the event loop after the socket is gone.
pub type CloseHook = Box<dyn FnOnce(CloseReason) -> BoxFuture<'static, ()> + Send>;

/// Frames queued for the I/O loop.
enum Frame {
    Text(String),
    Close,
}

struct ConnectionInner {
    id: ConnectionId,
    key: RelayKey,
    outgoing: mpsc::UnboundedSender<Frame>,
    pending: Mutex<PendingRequestTable>,
    open: AtomicBool,
}

// ============================================================================
// RelayConnection
// ============================================================================

/// Handle to one open relay socket.
///
/// Cheap to clone; the socket itself is owned by the event loop task.
#[derive(Clone)]
pub struct RelayConnection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConnection")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("open", &self.is_open())
            .finish()
    }
}

impl RelayConnection {
    /// Takes ownership of a connected socket and starts its tasks.
    pub fn spawn<S>(
        id: ConnectionId,
        key: RelayKey,
        socket: WebSocketStream<S>,
        handler: Arc<dyn ConnectionHandler>,
        on_close: CloseHook,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id,
                key,
                outgoing,
                pending: Mutex::new(PendingRequestTable::new()),
                open: AtomicBool::new(true),
            }),
        };

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_dispatcher(
            connection.clone(),
            Arc::clone(&handler),
            dispatch_rx,
        ));
        tokio::spawn(Self::run_event_loop(
            connection.clone(),
            socket,
            outgoing_rx,
            dispatch_tx,
            on_close,
        ));

        debug!(id = %connection.inner.id, key = %connection.inner.key, "Relay connection started");
        connection
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the relay key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> &RelayKey {
        &self.inner.key
    }

    /// Returns `true` while the socket is usable.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Queues a message for the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the socket is closed.
    pub fn send(&self, message: &Outbound) -> Result<()> {
        if !self.is_open() {
            return Err(Error::connection("Relay not connected"));
        }
        let text = message.to_text()?;
        self.inner
            .outgoing
            .send(Frame::Text(text))
            .map_err(|_| Error::connection("Relay not connected"))
    }

    /// Sends a request and waits for its completion.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if `id` is already pending
    /// - [`Error::Connection`] if the socket is closed
    /// - [`Error::Remote`] if the server answered with an error
    /// - [`Error::Disconnected`] if the connection went away first
    /// - [`Error::RequestTimeout`] if no completion arrived in time
    pub async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
        request_timeout: Duration,
    ) -> Result<Value> {
        let rx = self.inner.pending.lock().register(id)?;

        if let Err(e) = self.send(&Outbound::request(id, method, params)) {
            self.inner.pending.lock().remove(id);
            return Err(e);
        }
        trace!(%id, method, "Request sent");

        match timeout(request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::disconnected(CloseReason::Closed)),
            Err(_) => {
                self.inner.pending.lock().remove(id);
                Err(Error::request_timeout(
                    id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Closes the socket. Pending requests fail with [`CloseReason::Shutdown`].
    pub fn shutdown(&self) {
        let _ = self.inner.outgoing.send(Frame::Close);
    }

    /// Event loop that owns the socket.
    async fn run_event_loop<S>(
        self,
        socket: WebSocketStream<S>,
        mut outgoing_rx: mpsc::UnboundedReceiver<Frame>,
        dispatch_tx: mpsc::UnboundedSender<(RequestId, ForwardedCommand)>,
        on_close: CloseHook,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = socket.split();

        let reason = loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match Inbound::parse(&text) {
                                Ok(Inbound::Ping) => {
                                    let pong = Outbound::pong().to_text().map(|t| Message::Text(t.into()));
                                    if let Ok(pong) = pong
                                        && let Err(e) = ws_write.send(pong).await
                                    {
                                        warn!(error = %e, "Failed to answer ping");
                                        break CloseReason::Error;
                                    }
                                }
                                Ok(Inbound::Completion { id, outcome }) => {
                                    let mut pending = self.inner.pending.lock();
                                    match outcome {
                                        Ok(value) => pending.resolve(id, value),
                                        Err(message) => pending.reject(id, message),
                                    };
                                }
                                Ok(Inbound::Command { id, command }) => {
                                    trace!(%id, method = %command.method, "Command received");
                                    let _ = dispatch_tx.send((id, command));
                                }
                                Ok(Inbound::Ignored) => {}
                                Err(e) => {
                                    debug!(error = %e, "Ignoring unparsable frame");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(key = %self.inner.key, "Relay closed by remote");
                            break CloseReason::Closed;
                        }

                        Some(Err(e)) => {
                            warn!(key = %self.inner.key, error = %e, "Relay socket error");
                            break CloseReason::Error;
                        }

                        None => {
                            debug!(key = %self.inner.key, "Relay stream ended");
                            break CloseReason::Closed;
                        }

                        // Binary, Ping, Pong
                        _ => {}
                    }
                }

                frame = outgoing_rx.recv() => {
                    match frame {
                        Some(Frame::Text(text)) => {
                            if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                warn!(key = %self.inner.key, error = %e, "Relay send failed");
                                break CloseReason::Error;
                            }
                        }

                        Some(Frame::Close) | None => {
                            let _ = ws_write.close().await;
                            break CloseReason::Shutdown;
                        }
                    }
                }
            }
        };

        self.inner.open.store(false, Ordering::SeqCst);
        self.inner.pending.lock().reject_all(reason);
        drop(dispatch_tx);

        debug!(id = %self.inner.id, %reason, "Relay event loop terminated");
        on_close(reason).await;
    }

    /// Runs server-pushed commands one at a time.
    async fn run_dispatcher(
        self,
        handler: Arc<dyn ConnectionHandler>,
        mut commands: mpsc::UnboundedReceiver<(RequestId, ForwardedCommand)>,
    ) {
        while let Some((id, command)) = commands.recv().await {
            let method = command.method.clone();
            let reply = match handler.handle_command(&self.inner.key, command).await {
                Ok(result) => Outbound::reply(id, result),
                Err(e) => {
                    debug!(%id, %method, error = %e, "Command failed");
                    Outbound::failure(id, e.to_string())
                }
            };

            if let Err(e) = self.send(&reply) {
                debug!(%id, error = %e, "Reply dropped");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::protocol::Role;

    struct Echo;

    #[async_trait]
    impl ConnectionHandler for Echo {
        async fn handle_command(&self, _key: &RelayKey, command: ForwardedCommand) -> Result<Value> {
            if command.method == "fail" {
                return Err(Error::protocol("nope"));
            }
            Ok(json!({ "method": command.method }))
        }

        async fn connection_closed(&self, _key: &RelayKey, _reason: CloseReason) {}
    }

    async fn pair() -> (
        RelayConnection,
        WebSocketStream<tokio::io::DuplexStream>,
        oneshot::Receiver<CloseReason>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;

        let (closed_tx, closed_rx) = oneshot::channel();
        let hook: CloseHook = Box::new(move |reason| {
            Box::pin(async move {
                let _ = closed_tx.send(reason);
            })
        });

        let connection = RelayConnection::spawn(
            ConnectionId::next(),
            RelayKey::new(9222, "tok"),
            client,
            Arc::new(Echo),
            hook,
        );
        (connection, server, closed_rx)
    }

    async fn next_json(server: &mut WebSocketStream<tokio::io::DuplexStream>) -> Value {
        loop {
            match server.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::Closed.to_string(), "closed");
        assert_eq!(CloseReason::Error.to_string(), "error");
        assert_eq!(CloseReason::Shutdown.to_string(), "shutdown");
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (_conn, mut server, _closed) = pair().await;
        server
            .send(Message::Text(r#"{"method":"ping"}"#.into()))
            .await
            .unwrap();
        assert_eq!(next_json(&mut server).await, json!({"method": "pong"}));
    }

    #[tokio::test]
    async fn test_command_reply() {
        let (_conn, mut server, _closed) = pair().await;
        server
            .send(Message::Text(
                r#"{"id":1,"method":"forwardCDPCommand","params":{"method":"Page.reload"}}"#.into(),
            ))
            .await
            .unwrap();
        server
            .send(Message::Text(
                r#"{"id":2,"method":"forwardCDPCommand","params":{"method":"fail"}}"#.into(),
            ))
            .await
            .unwrap();

        assert_eq!(
            next_json(&mut server).await,
            json!({"id": 1, "result": {"method": "Page.reload"}})
        );
        assert_eq!(next_json(&mut server).await, json!({"id": 2, "error": "nope"}));
    }

    #[tokio::test]
    async fn test_request_completion() {
        let (conn, mut server, _closed) = pair().await;

        let requester = conn.clone();
        let call = tokio::spawn(async move {
            requester
                .request(RequestId::new(7), "hello", None, Duration::from_secs(5))
                .await
        });

        assert_eq!(next_json(&mut server).await, json!({"id": 7, "method": "hello"}));
        server
            .send(Message::Text(r#"{"id":7,"result":"hi"}"#.into()))
            .await
            .unwrap();

        assert_eq!(call.await.unwrap().unwrap(), json!("hi"));
        assert_eq!(conn.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_close_rejects_pending() {
        let (conn, mut server, closed) = pair().await;

        let requester = conn.clone();
        let call = tokio::spawn(async move {
            requester
                .request(RequestId::new(1), "slow", None, Duration::from_secs(30))
                .await
        });
        let _ = next_json(&mut server).await;
        server.close(None).await.unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(closed.await.unwrap(), CloseReason::Closed);
        assert!(!conn.is_open());
        assert!(conn.send(&Outbound::pong()).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_reason() {
        let (conn, _server, closed) = pair().await;
        conn.shutdown();
        assert_eq!(closed.await.unwrap(), CloseReason::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_clears_entry() {
        let (conn, _server, _closed) = pair().await;
        let err = conn
            .request(RequestId::new(3), "never", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(conn.pending_count(), 0);
    }
}
