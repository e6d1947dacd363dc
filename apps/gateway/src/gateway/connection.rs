//! A single live socket as seen by the hub.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use murmur_common::id::prefix;
use murmur_common::PrefixedId;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Why the hub asked a connection to go away. Carried into the close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    HeartbeatTimeout,
    SlowConsumer,
    Kicked,
    Shutdown,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            Self::HeartbeatTimeout => 4009,
            Self::SlowConsumer => 4008,
            Self::Kicked => 4010,
            Self::Shutdown => 1001,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::HeartbeatTimeout => "Heartbeat timeout",
            Self::SlowConsumer => "Outbound queue overflow",
            Self::Kicked => "Disconnected by server",
            Self::Shutdown => "Server shutting down",
        }
    }
}

/// Outcome of offering a frame to a connection's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// The queue was full; the connection has been closed.
    Overflow,
    /// The connection is already closing.
    Dropped,
}

/// Registry-owned state for one socket. Shared read-only with fan-out and the
/// socket task via `Arc`.
pub struct Connection {
    pub id: String,
    pub user_id: String,
    servers: HashSet<String>,
    sender: mpsc::Sender<Utf8Bytes>,
    last_heartbeat: Mutex<Instant>,
    close_tx: watch::Sender<Option<CloseReason>>,
}

impl PrefixedId for Connection {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl Connection {
    /// Create a connection with a bounded outbound queue. The receiver half
    /// belongs to the socket writer.
    pub fn new(
        user_id: impl Into<String>,
        servers: HashSet<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<Utf8Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (close_tx, _) = watch::channel(None);
        let conn = Self {
            id: Self::generate(),
            user_id: user_id.into(),
            servers,
            sender,
            last_heartbeat: Mutex::new(Instant::now()),
            close_tx,
        };
        (Arc::new(conn), receiver)
    }

    pub fn servers(&self) -> &HashSet<String> {
        &self.servers
    }

    pub fn is_subscribed(&self, server_id: &str) -> bool {
        self.servers.contains(server_id)
    }

    /// Offer a frame without waiting. A full queue closes the connection so
    /// one stalled reader never holds up anybody else.
    pub fn try_enqueue(&self, frame: Utf8Bytes) -> Enqueue {
        if self.is_closed() {
            return Enqueue::Dropped;
        }

        match self.sender.try_send(frame) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    conn_id = %self.id,
                    user_id = %self.user_id,
                    "outbound queue full, closing slow consumer"
                );
                self.close(CloseReason::SlowConsumer);
                Enqueue::Overflow
            }
            Err(TrySendError::Closed(_)) => Enqueue::Dropped,
        }
    }

    pub fn touch(&self, now: Instant) {
        *self.last_heartbeat.lock() = now;
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock()
    }

    /// Ask the socket task to close. The first reason wins; returns whether
    /// this call set it.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.close_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_tx.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason().is_some()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.close_tx.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => *reason,
            Err(_) => None,
        };
        reason.unwrap_or(CloseReason::Shutdown)
    }
}
