//! The set of open connections.
//!
//! One mutex guards membership. Broadcasting never holds it across network I/O:
//! it copies the member list, sends to each connection outside the lock, and
//! then takes the lock again to evict every connection whose send failed.

use smallvec::SmallVec;

use crate::diagnostics::{Diagnostics, FaultKind, FaultSeverity};
use crate::fault;
use crate::protocol::envelope::OutboundMessage;
use crate::server::connection::{Connection, ConnectionId};
use crate::sync::{Arc, Mutex};

/// Inline capacity for broadcast snapshots. The gateway serves a handful of
/// companion devices, so this rarely spills to the heap.
const INLINE_MEMBERS: usize = 8;

/// Thread-safe set of open connections.
pub struct ConnectionRegistry {
    members: Mutex<Vec<Arc<Connection>>>,
    diagnostics: Diagnostics,
}

impl ConnectionRegistry {
    /// Creates an empty registry reporting evictions to `diagnostics`.
    #[must_use]
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            members: Mutex::new(Vec::new()),
            diagnostics,
        }
    }

    /// Adds `conn`. Adding the same connection twice is a no-op.
    pub fn add(&self, conn: Arc<Connection>) {
        let mut members = self.members.lock();
        if members.iter().all(|member| member.id() != conn.id()) {
            members.push(conn);
        }
    }

    /// Removes the connection with `id`. Returns whether it was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|member| member.id() != id);
        members.len() != before
    }

    /// Number of registered connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.members.lock().len()
    }

    /// True when nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    /// Ids of the registered connections, in registration order.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.members.lock().iter().map(|member| member.id()).collect()
    }

    fn snapshot(&self) -> SmallVec<[Arc<Connection>; INLINE_MEMBERS]> {
        self.members.lock().iter().cloned().collect()
    }

    /// Sends `text` to every connection and returns how many received it.
    ///
    /// Connections whose send fails are closed and removed; the others are
    /// unaffected.
    pub fn broadcast(&self, text: &str) -> usize {
        let members = self.snapshot();
        let mut failed: SmallVec<[ConnectionId; INLINE_MEMBERS]> = SmallVec::new();
        let mut delivered = 0;

        for conn in &members {
            match conn.send(text) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    conn.close();
                    self.diagnostics.report(
                        fault!(
                            FaultSeverity::Error,
                            FaultKind::Transport,
                            "broadcast failed, evicting connection: {}",
                            err
                        )
                        .with_connection(conn.id().as_u64()),
                    );
                    failed.push(conn.id());
                },
            }
        }

        if !failed.is_empty() {
            self.members
                .lock()
                .retain(|member| !failed.contains(&member.id()));
            tracing::debug!(evicted = failed.len(), delivered, "pruned dead connections");
        }
        delivered
    }

    /// Serializes `message` once and broadcasts it.
    pub fn broadcast_message(&self, message: &OutboundMessage) -> usize {
        match message.to_json() {
            Ok(text) => self.broadcast(&text),
            Err(err) => {
                self.diagnostics.report(
                    fault!(
                        FaultSeverity::Error,
                        FaultKind::Internal,
                        "could not serialize {} envelope: {}",
                        message.kind(),
                        err
                    ),
                );
                0
            },
        }
    }

    /// Closes and removes every connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let members = std::mem::take(&mut *self.members.lock());
        for conn in &members {
            conn.close();
        }
        members.len()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}
