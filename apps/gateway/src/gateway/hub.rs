//! The gateway hub: registry, presence, fan-out, and liveness wired together.
//!
//! Construction order matters. The table comes first, the broadcaster reads
//! it, presence publishes through the broadcaster, and the registry loop
//! drives presence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::models::user::UserStatus;

use super::broadcast::{Broadcaster, Scope};
use super::connection::{CloseReason, Connection};
use super::events::Event;
use super::liveness::LivenessSupervisor;
use super::presence::PresenceTracker;
use super::registry::{ConnectionRegistry, ConnectionTable, RegistryClosed};
use super::signaling::SignalRouter;

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub heartbeat_interval: Duration,
    pub grace_multiplier: u32,
    pub send_queue_capacity: usize,
    pub write_timeout: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self::from(&Config::with_secret(""))
    }
}

impl From<&Config> for HubSettings {
    fn from(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            grace_multiplier: config.heartbeat_grace_multiplier,
            send_queue_capacity: config.send_queue_capacity,
            write_timeout: config.write_timeout,
        }
    }
}

pub struct Hub {
    settings: HubSettings,
    registry: ConnectionRegistry,
    presence: Arc<PresenceTracker>,
    broadcaster: Broadcaster,
    signaling: SignalRouter,
}

impl Hub {
    /// Build the hub and start its registry loop on the current runtime.
    pub fn start(settings: HubSettings) -> Arc<Self> {
        let table = ConnectionTable::shared();
        let broadcaster = Broadcaster::new(table.clone());
        let presence = Arc::new(PresenceTracker::new(broadcaster.clone()));
        let registry = ConnectionRegistry::spawn(table, presence.clone());

        Arc::new(Self {
            settings,
            registry,
            presence,
            broadcaster,
            signaling: SignalRouter::new(),
        })
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Register lifecycle callbacks here before accepting connections.
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Register voice, call, and DM typing handlers here before accepting
    /// connections.
    pub fn signaling(&self) -> &SignalRouter {
        &self.signaling
    }

    /// Register a new connection for `user_id`, subscribed to `server_ids`.
    /// Returns the connection and the receiving end of its outbound queue.
    ///
    /// After [`Hub::shutdown`] has started the connection comes back already
    /// closed with [`CloseReason::Shutdown`] and is not registered.
    pub async fn connect(
        &self,
        user_id: &str,
        server_ids: impl IntoIterator<Item = String>,
        stored_status: Option<UserStatus>,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Utf8Bytes>), RegistryClosed> {
        let servers: HashSet<String> = server_ids.into_iter().collect();
        let (conn, outbound) = Connection::new(user_id, servers, self.settings.send_queue_capacity);
        if !self.registry.add(conn.clone(), stored_status).await? {
            tracing::info!(%user_id, "connection refused, gateway shutting down");
        }
        Ok((conn, outbound))
    }

    /// Unregister a connection. A no-op for unknown or already removed IDs.
    pub async fn disconnect(&self, conn_id: &str) -> Result<bool, RegistryClosed> {
        self.registry.remove(conn_id).await
    }

    pub async fn set_manual_status(
        &self,
        user_id: &str,
        status: UserStatus,
    ) -> Result<(), RegistryClosed> {
        self.registry.set_status(user_id, status).await
    }

    pub fn publish(&self, scope: &Scope, event: &Event) -> usize {
        self.broadcaster.publish(scope, event)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.registry.is_online(user_id)
    }

    /// Online users other clients may see, sorted.
    pub fn visible_online_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .online_user_ids()
            .into_iter()
            .filter(|user_id| !self.presence.is_invisible(user_id))
            .collect();
        ids.sort();
        ids
    }

    pub fn users_in_server(&self, server_id: &str) -> Vec<String> {
        self.registry.users_in_server(server_id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Close and unregister every connection of `user_id`.
    pub async fn disconnect_user(&self, user_id: &str) -> Result<usize, RegistryClosed> {
        let conns = self.registry.connections_of(user_id);
        for conn in &conns {
            conn.close(CloseReason::Kicked);
            self.registry.remove(&conn.id).await?;
        }
        if !conns.is_empty() {
            tracing::info!(%user_id, closed = conns.len(), "user disconnected by server");
        }
        Ok(conns.len())
    }

    /// A supervisor that reclaims connections that stopped heartbeating.
    pub fn liveness(&self) -> LivenessSupervisor {
        LivenessSupervisor::new(
            self.registry.clone(),
            self.settings.heartbeat_interval,
            self.settings.grace_multiplier,
        )
    }

    /// Stop admitting connections, ask every open one to close, and wait for
    /// them to unregister. Returns `false` if some were still open at
    /// `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        match self.registry.shutdown().await {
            Ok(closing) => tracing::info!(connections = closing, "closing gateway connections"),
            Err(err) => {
                tracing::warn!(%err, "registry stopped before shutdown");
                return self.connection_count() == 0;
            }
        }

        let drained = self.registry.drained(timeout).await;
        if !drained {
            tracing::warn!(
                remaining = self.connection_count(),
                "gateway connections still open after shutdown timeout"
            );
        }
        drained
    }
}
