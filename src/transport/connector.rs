//! Opening relay sockets.
//!
//! [`Connector`] is the seam between the connection manager and the
//! network: [`WsConnector`] talks to a real relay server over TCP, tests
//! substitute in-memory pipes.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::debug;

use crate::config::{RELAY_TOKEN_HEADER, RelayConfig};
use crate::error::{Error, Result};
use crate::identifiers::RelayKey;

// ============================================================================
// Types
// ============================================================================

/// Byte stream a relay socket can run over.
pub trait RelayIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> RelayIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// WebSocket over any [`RelayIo`].
pub type RelaySocket = WebSocketStream<Box<dyn RelayIo>>;

/// Outcome of a reachability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayHealth {
    /// The server answered.
    Reachable,
    /// The server rejected the credential.
    Unauthorized,
    /// No answer.
    Unreachable,
}

// ============================================================================
// Connector
// ============================================================================

/// Opens relay sockets.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Checks that a relay server listens for `key`.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`] if the server rejects the credential
    /// - [`Error::Connection`] if the server cannot be reached
    async fn probe(&self, key: &RelayKey) -> Result<()>;

    /// Opens a socket for `key`. Timeouts are applied by the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::Auth`] if the handshake is rejected as unauthorized
    /// - [`Error::Connection`] on any other failure
    async fn connect(&self, key: &RelayKey) -> Result<RelaySocket>;
}

// ============================================================================
// WsConnector
// ============================================================================

/// Connector for a relay server reachable over TCP.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: RelayConfig,
    http: reqwest::Client,
}

impl WsConnector {
    /// Creates a connector for the configured host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.preflight_timeout + Duration::from_millis(500))
            .build()?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn probe(&self, key: &RelayKey) -> Result<()> {
        let base = self.config.http_base(key.port());
        let mut request = self.http.head(format!("{base}/"));
        if key.has_credential() {
            request = request.header(RELAY_TOKEN_HEADER, key.credential());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::connection(format!("Relay server not reachable at {base} ({e})")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::auth(format!(
                "Relay at {base} rejected the credential ({})",
                response.status()
            ))),
            status => {
                debug!(%key, %status, "Relay preflight answered");
                Ok(())
            }
        }
    }

    async fn connect(&self, key: &RelayKey) -> Result<RelaySocket> {
        let url = self.config.ws_url(key)?;

        let stream = TcpStream::connect((self.config.host.as_str(), key.port()))
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect failed ({e})")))?;
        let _ = stream.set_nodelay(true);

        let io: Box<dyn RelayIo> = Box::new(stream);
        match client_async(url.as_str(), io).await {
            Ok((socket, _response)) => Ok(socket),
            Err(WsError::Http(response))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                Err(Error::auth(format!(
                    "Relay rejected the credential ({})",
                    response.status()
                )))
            }
            Err(e) => Err(Error::connection(format!("WebSocket connect failed ({e})"))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
