//! Correlation of outstanding requests.
//!
//! Each relay connection owns one table mapping request ids to the
//! completion channel of the waiting caller.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::CloseReason;

// ============================================================================
// Types
// ============================================================================

/// Completion channel of one request.
pub type Completion = oneshot::Sender<Result<Value>>;

// ============================================================================
// PendingRequestTable
// ============================================================================

/// Request id to completion handle map.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: FxHashMap<RequestId, Completion>,
}

impl PendingRequestTable {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request and returns the receiving half of its completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if `id` is already pending.
    pub fn register(&mut self, id: RequestId) -> Result<oneshot::Receiver<Result<Value>>> {
        if self.entries.contains_key(&id) {
            return Err(Error::protocol(format!("Duplicate pending request id {id}")));
        }
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, tx);
        trace!(%id, "Request registered");
        Ok(rx)
    }

    /// Drops a registration without completing it.
    #[inline]
    pub fn remove(&mut self, id: RequestId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Completes a request successfully. Unknown ids are ignored.
    pub fn resolve(&mut self, id: RequestId, value: Value) -> bool {
        match self.entries.remove(&id) {
            Some(tx) => {
                let _ = tx.send(Ok(value));
                true
            }
            None => {
                debug!(%id, "Completion for unknown request");
                false
            }
        }
    }

    /// Fails a request with the server's error text. Unknown ids are ignored.
    pub fn reject(&mut self, id: RequestId, message: impl Into<String>) -> bool {
        match self.entries.remove(&id) {
            Some(tx) => {
                let _ = tx.send(Err(Error::remote(message)));
                true
            }
            None => {
                debug!(%id, "Error for unknown request");
                false
            }
        }
    }

    /// Fails every pending request with [`Error::Disconnected`].
    ///
    /// Returns the number of requests failed.
    pub fn reject_all(&mut self, reason: CloseReason) -> usize {
        let count = self.entries.len();
        for (_, tx) in self.entries.drain() {
            let _ = tx.send(Err(Error::disconnected(reason)));
        }
        if count > 0 {
            debug!(count, %reason, "Failed pending requests");
        }
        count
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
