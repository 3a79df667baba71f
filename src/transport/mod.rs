//! WebSocket transport to the relay server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                        ┌─────────────────┐
//! │  Relay (Rust)        │       WebSocket        │  Relay server   │
//! │                      │◄──────────────────────►│                 │
//! │  ConnectionManager   │  127.0.0.1:PORT        │  /extension     │
//! │  → RelayConnection   │  ?token=CREDENTIAL     │                 │
//! └──────────────────────┘                        └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `ConnectionManager::ensure_connection` - preflight, then connect with retry
//! 2. `RelayConnection::spawn` - start the I/O loop and command dispatcher
//! 3. Commands, replies and events flow on the socket
//! 4. Close or error - pending requests fail, the manager cascades cleanup
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Socket event loop and request correlation |
//! | `connector` | Opening sockets (TCP or test doubles) |
//! | `manager` | One connection per relay key, connect coalescing |
//! | `pending` | Outstanding request table |

// ============================================================================
// Submodules
// ============================================================================

/// Relay socket event loop.
pub mod connection;

/// Socket factory seam.
pub mod connector;

/// Connection registry.
pub mod manager;

/// Pending request table.
pub mod pending;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{CloseHook, CloseReason, ConnectionHandler, ConnectionState, RelayConnection};
pub use connector::{Connector, RelayHealth, RelayIo, RelaySocket, WsConnector};
pub use manager::ConnectionManager;
pub use pending::PendingRequestTable;
