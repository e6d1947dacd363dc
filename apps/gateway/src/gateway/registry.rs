//! Connection registry: who is connected, with which sockets, to which servers.
//!
//! The table is shared behind a `parking_lot::RwLock`. Fan-out takes short
//! read locks; only the registry loop writes. Registrations, removals, and
//! manual status changes are applied one at a time by that loop, which also
//! drives the presence tracker, so occupancy transitions for a user are
//! observed in the order they happened. No lock is held while presence
//! reacts.
//!
//! Once shutdown begins the loop admits nothing new: a late registration is
//! closed with [`CloseReason::Shutdown`] instead of entering the table, so
//! the count can only fall towards zero.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};

use crate::models::user::UserStatus;

use super::connection::{CloseReason, Connection};
use super::presence::PresenceTracker;

pub type SharedTable = Arc<RwLock<ConnectionTable>>;

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Indexes over live connections.
#[derive(Default)]
pub struct ConnectionTable {
    connections: HashMap<String, Arc<Connection>>,
    by_user: HashMap<String, HashSet<String>>,
    by_server: HashMap<String, HashSet<String>>,
}

impl ConnectionTable {
    pub fn shared() -> SharedTable {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Index a connection. Returns how many connections its user now has.
    pub(crate) fn insert(&mut self, conn: Arc<Connection>) -> usize {
        for server_id in conn.servers() {
            self.by_server
                .entry(server_id.clone())
                .or_default()
                .insert(conn.id.clone());
        }
        let user_conns = self.by_user.entry(conn.user_id.clone()).or_default();
        user_conns.insert(conn.id.clone());
        let occupancy = user_conns.len();
        self.connections.insert(conn.id.clone(), conn);
        occupancy
    }

    /// Drop a connection from every index. Returns it with the number of
    /// connections its user still has, or `None` if it was not present.
    pub(crate) fn remove(&mut self, conn_id: &str) -> Option<(Arc<Connection>, usize)> {
        let conn = self.connections.remove(conn_id)?;

        for server_id in conn.servers() {
            if let Some(ids) = self.by_server.get_mut(server_id) {
                ids.remove(conn_id);
                if ids.is_empty() {
                    self.by_server.remove(server_id);
                }
            }
        }

        let remaining = match self.by_user.get_mut(&conn.user_id) {
            Some(ids) => {
                ids.remove(conn_id);
                ids.len()
            }
            None => 0,
        };
        if remaining == 0 {
            self.by_user.remove(&conn.user_id);
        }

        Some((conn, remaining))
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.collect(self.by_user.get(user_id))
    }

    pub fn connections_in_server(&self, server_id: &str) -> Vec<Arc<Connection>> {
        self.collect(self.by_server.get(server_id))
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.values().cloned().collect()
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.by_user.keys().cloned().collect()
    }

    /// Distinct users with at least one connection subscribed to `server_id`.
    pub fn users_in_server(&self, server_id: &str) -> Vec<String> {
        let users: HashSet<&str> = self
            .by_server
            .get(server_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .map(|conn| conn.user_id.as_str())
            .collect();
        users.into_iter().map(str::to_string).collect()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn collect(&self, ids: Option<&HashSet<String>>) -> Vec<Arc<Connection>> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id).cloned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Registry loop
// ---------------------------------------------------------------------------

/// Returned when the registry loop is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryClosed;

impl fmt::Display for RegistryClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection registry is not running")
    }
}

impl std::error::Error for RegistryClosed {}

enum Command {
    Add {
        conn: Arc<Connection>,
        stored_status: Option<UserStatus>,
        done: oneshot::Sender<bool>,
    },
    Remove {
        conn_id: String,
        done: oneshot::Sender<bool>,
    },
    SetStatus {
        user_id: String,
        status: UserStatus,
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<usize>,
    },
}

/// Handle to the registry. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionRegistry {
    table: SharedTable,
    commands: mpsc::UnboundedSender<Command>,
    count_rx: watch::Receiver<usize>,
}

impl ConnectionRegistry {
    /// Start the registry loop on the current runtime.
    pub fn spawn(table: SharedTable, presence: Arc<PresenceTracker>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (count_tx, count_rx) = watch::channel(0);
        tokio::spawn(run(table.clone(), presence, rx, count_tx));
        Self {
            table,
            commands,
            count_rx,
        }
    }

    /// Register a connection. Once this returns `true` the connection
    /// receives fan-out. `stored_status` seeds the user's manual status if the
    /// tracker has never seen them.
    ///
    /// Returns `false` during shutdown; the connection is then already closed
    /// with [`CloseReason::Shutdown`] and was never registered.
    pub async fn add(
        &self,
        conn: Arc<Connection>,
        stored_status: Option<UserStatus>,
    ) -> Result<bool, RegistryClosed> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Add {
                conn,
                stored_status,
                done,
            })
            .map_err(|_| RegistryClosed)?;
        wait.await.map_err(|_| RegistryClosed)
    }

    /// Unregister a connection. Removing an unknown or already removed
    /// connection is a no-op that returns `false`.
    pub async fn remove(&self, conn_id: &str) -> Result<bool, RegistryClosed> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Remove {
                conn_id: conn_id.to_string(),
                done,
            })
            .map_err(|_| RegistryClosed)?;
        wait.await.map_err(|_| RegistryClosed)
    }

    /// Apply a user-selected status in order with connects and disconnects.
    pub async fn set_status(&self, user_id: &str, status: UserStatus) -> Result<(), RegistryClosed> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::SetStatus {
                user_id: user_id.to_string(),
                status,
                done,
            })
            .map_err(|_| RegistryClosed)?;
        wait.await.map_err(|_| RegistryClosed)
    }

    /// Stop admitting connections and ask every registered one to close.
    /// Returns how many were asked. Calling it again is harmless.
    pub async fn shutdown(&self) -> Result<usize, RegistryClosed> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { done })
            .map_err(|_| RegistryClosed)?;
        wait.await.map_err(|_| RegistryClosed)
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.table.read().connections_of(user_id)
    }

    pub fn connections_in_server(&self, server_id: &str) -> Vec<Arc<Connection>> {
        self.table.read().connections_in_server(server_id)
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.table.read().all()
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        self.table.read().user_ids()
    }

    pub fn users_in_server(&self, server_id: &str) -> Vec<String> {
        self.table.read().users_in_server(server_id)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.table.read().is_online(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.table.read().len()
    }

    /// Wait until no connections remain. Returns `false` on timeout. Only
    /// final after [`ConnectionRegistry::shutdown`]; before that new
    /// connections may still arrive.
    pub async fn drained(&self, timeout: Duration) -> bool {
        let mut rx = self.count_rx.clone();
        let result = tokio::time::timeout(timeout, rx.wait_for(|count| *count == 0)).await;
        matches!(result, Ok(Ok(_)))
    }
}

async fn run(
    table: SharedTable,
    presence: Arc<PresenceTracker>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    count_tx: watch::Sender<usize>,
) {
    let mut shutting_down = false;

    while let Some(command) = commands.recv().await {
        match command {
            Command::Add {
                conn,
                stored_status,
                done,
            } => {
                if shutting_down {
                    tracing::debug!(conn_id = %conn.id, user_id = %conn.user_id, "refusing connection during shutdown");
                    conn.close(CloseReason::Shutdown);
                    let _ = done.send(false);
                    continue;
                }

                let user_id = conn.user_id.clone();
                let conn_id = conn.id.clone();
                let (occupancy, total) = {
                    let mut table = table.write();
                    let occupancy = table.insert(conn);
                    (occupancy, table.len())
                };
                count_tx.send_replace(total);

                tracing::debug!(%conn_id, %user_id, occupancy, "connection registered");

                if occupancy == 1 {
                    presence.user_connected(&user_id, stored_status);
                }
                let _ = done.send(true);
            }
            Command::Remove { conn_id, done } => {
                let removed = {
                    let mut table = table.write();
                    table
                        .remove(&conn_id)
                        .map(|(conn, remaining)| (conn, remaining, table.len()))
                };

                let found = match removed {
                    Some((conn, remaining, total)) => {
                        count_tx.send_replace(total);
                        tracing::debug!(%conn_id, user_id = %conn.user_id, remaining, "connection removed");
                        if remaining == 0 {
                            presence.user_disconnected(&conn.user_id);
                        }
                        true
                    }
                    None => false,
                };
                let _ = done.send(found);
            }
            Command::SetStatus {
                user_id,
                status,
                done,
            } => {
                let connected = table.read().is_online(&user_id);
                presence.manual_changed(&user_id, status, connected);
                let _ = done.send(());
            }
            Command::Shutdown { done } => {
                shutting_down = true;
                let conns = table.read().all();
                for conn in &conns {
                    conn.close(CloseReason::Shutdown);
                }
                let _ = done.send(conns.len());
            }
        }
    }

    tracing::debug!("connection registry loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::gateway::broadcast::Broadcaster;

    fn servers(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn table_tracks_user_and_server_indexes() {
        let mut table = ConnectionTable::default();
        let (a, _rx_a) = Connection::new("u1", servers(&["s1", "s2"]), 4);
        let (b, _rx_b) = Connection::new("u1", servers(&["s2"]), 4);
        let (c, _rx_c) = Connection::new("u2", servers(&["s1"]), 4);

        assert_eq!(table.insert(a.clone()), 1);
        assert_eq!(table.insert(b.clone()), 2);
        assert_eq!(table.insert(c.clone()), 1);

        assert_eq!(table.len(), 3);
        assert_eq!(table.connections_of("u1").len(), 2);
        assert_eq!(table.connections_in_server("s1").len(), 2);
        assert_eq!(table.connections_in_server("s2").len(), 2);

        let mut users = table.users_in_server("s1");
        users.sort();
        assert_eq!(users, vec!["u1", "u2"]);
        assert_eq!(table.users_in_server("s2"), vec!["u1"]);
    }

    #[test]
    fn table_remove_reports_remaining_and_is_idempotent() {
        let mut table = ConnectionTable::default();
        let (a, _rx_a) = Connection::new("u1", servers(&["s1"]), 4);
        let (b, _rx_b) = Connection::new("u1", servers(&["s1"]), 4);
        table.insert(a.clone());
        table.insert(b.clone());

        let (_, remaining) = table.remove(&a.id).unwrap();
        assert_eq!(remaining, 1);
        assert!(table.remove(&a.id).is_none());

        let (_, remaining) = table.remove(&b.id).unwrap();
        assert_eq!(remaining, 0);
        assert!(!table.is_online("u1"));
        assert!(table.connections_in_server("s1").is_empty());
        assert!(table.is_empty());
    }

    /// Registry wired to a presence tracker whose callbacks report into a channel.
    fn registry_with_events() -> (ConnectionRegistry, mpsc::UnboundedReceiver<String>) {
        let table = ConnectionTable::shared();
        let presence = Arc::new(PresenceTracker::new(Broadcaster::new(table.clone())));
        let (tx, rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        presence.on_user_first_connect(move |user_id| {
            let first = first.clone();
            async move {
                let _ = first.send(format!("first:{user_id}"));
                Ok::<(), ApiError>(())
            }
        });
        presence.on_user_fully_disconnected(move |user_id| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(format!("gone:{user_id}"));
                Ok::<(), ApiError>(())
            }
        });

        (ConnectionRegistry::spawn(table, presence), rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn occupancy_transitions_fire_once_each() {
        let (registry, mut events) = registry_with_events();

        let (a, _rx_a) = Connection::new("u1", servers(&["s1"]), 4);
        let (b, _rx_b) = Connection::new("u1", servers(&["s1"]), 4);
        let (c, _rx_c) = Connection::new("u1", servers(&["s1"]), 4);

        // connect, connect, disconnect, connect, disconnect, disconnect
        registry.add(a.clone(), None).await.unwrap();
        registry.add(b.clone(), None).await.unwrap();
        registry.remove(&a.id).await.unwrap();
        registry.add(c.clone(), None).await.unwrap();
        registry.remove(&b.id).await.unwrap();
        registry.remove(&c.id).await.unwrap();

        assert_eq!(next_event(&mut events).await.as_deref(), Some("first:u1"));
        assert_eq!(next_event(&mut events).await.as_deref(), Some("gone:u1"));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test]
    async fn double_remove_does_not_refire() {
        let (registry, mut events) = registry_with_events();
        let (a, _rx) = Connection::new("u1", servers(&[]), 4);

        registry.add(a.clone(), None).await.unwrap();
        assert!(registry.remove(&a.id).await.unwrap());
        assert!(!registry.remove(&a.id).await.unwrap());

        assert_eq!(next_event(&mut events).await.as_deref(), Some("first:u1"));
        assert_eq!(next_event(&mut events).await.as_deref(), Some("gone:u1"));
        assert_eq!(next_event(&mut events).await, None);
    }

    #[tokio::test]
    async fn connection_is_visible_once_add_returns() {
        let (registry, _events) = registry_with_events();
        let (a, _rx) = Connection::new("u1", servers(&["s1"]), 4);

        registry.add(a.clone(), None).await.unwrap();
        assert!(registry.is_online("u1"));
        assert_eq!(registry.connections_in_server("s1").len(), 1);
        assert_eq!(registry.connection_count(), 1);

        registry.remove(&a.id).await.unwrap();
        assert!(!registry.is_online("u1"));
        assert!(registry.drained(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn shutdown_closes_registered_and_refuses_late_connections() {
        let (registry, _events) = registry_with_events();
        let (early, _rx_e) = Connection::new("u1", servers(&[]), 4);
        assert!(registry.add(early.clone(), None).await.unwrap());

        assert_eq!(registry.shutdown().await.unwrap(), 1);
        assert_eq!(early.close_reason(), Some(CloseReason::Shutdown));

        let (late, _rx_l) = Connection::new("u2", servers(&["s1"]), 4);
        assert!(!registry.add(late.clone(), None).await.unwrap());
        assert_eq!(late.close_reason(), Some(CloseReason::Shutdown));
        assert!(!registry.is_online("u2"));
        assert_eq!(registry.connection_count(), 1);

        registry.remove(&early.id).await.unwrap();
        assert!(registry.drained(Duration::from_millis(50)).await);
        assert_eq!(registry.shutdown().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn drained_times_out_while_connections_remain() {
        let (registry, _events) = registry_with_events();
        let (a, _rx) = Connection::new("u1", servers(&[]), 4);
        registry.add(a, None).await.unwrap();
        assert!(!registry.drained(Duration::from_millis(50)).await);
    }
}
