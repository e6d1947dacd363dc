//! Per-user presence derived from registry occupancy plus the user's own
//! status selection.
//!
//! Presence is per **user**, not per connection. A user goes online when
//! their first connection registers and offline when their last one is
//! removed. A manually chosen status (idle, dnd, invisible) survives
//! reconnects. Invisible users are reported as offline to everybody except
//! their own connections.
//!
//! The registry loop is the only caller of the transition methods, so
//! transitions for one user never interleave. Lifecycle callbacks run on
//! spawned tasks; a failing callback is logged and the in-memory state is
//! kept.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;

use crate::error::ApiError;
use crate::models::user::UserStatus;

use super::broadcast::Broadcaster;
use super::events::Event;

pub type UserCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;
pub type StatusCallback =
    Arc<dyn Fn(String, UserStatus) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
struct PresenceRecord {
    /// Status the user picked. `None` means plain online.
    manual: Option<UserStatus>,
    connected: bool,
}

impl PresenceRecord {
    fn status(&self) -> UserStatus {
        if self.connected {
            self.manual.unwrap_or(UserStatus::Online)
        } else {
            UserStatus::Offline
        }
    }
}

#[derive(Default)]
struct Callbacks {
    first_connect: Vec<UserCallback>,
    fully_disconnected: Vec<UserCallback>,
    manual_change: Vec<StatusCallback>,
}

pub struct PresenceTracker {
    records: DashMap<String, PresenceRecord>,
    broadcaster: Broadcaster,
    callbacks: RwLock<Callbacks>,
}

impl PresenceTracker {
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self {
            records: DashMap::new(),
            broadcaster,
            callbacks: RwLock::new(Callbacks::default()),
        }
    }

    // -----------------------------------------------------------------------
    // Callback registration
    // -----------------------------------------------------------------------

    /// Called with the user ID when a user goes from zero connections to one.
    pub fn on_user_first_connect<F, Fut>(&self, callback: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        self.callbacks
            .write()
            .first_connect
            .push(Arc::new(move |user_id| callback(user_id).boxed()));
    }

    /// Called with the user ID when a user's last connection is removed.
    pub fn on_user_fully_disconnected<F, Fut>(&self, callback: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        self.callbacks
            .write()
            .fully_disconnected
            .push(Arc::new(move |user_id| callback(user_id).boxed()));
    }

    /// Called with the user ID and new status when a user picks a status.
    pub fn on_manual_presence_change<F, Fut>(&self, callback: F)
    where
        F: Fn(String, UserStatus) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        self.callbacks
            .write()
            .manual_change
            .push(Arc::new(move |user_id, status| callback(user_id, status).boxed()));
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The user's real status, as their own connections see it.
    pub fn status_of(&self, user_id: &str) -> UserStatus {
        self.records
            .get(user_id)
            .map(|record| record.status())
            .unwrap_or(UserStatus::Offline)
    }

    /// The status everybody else sees.
    pub fn visible_status_of(&self, user_id: &str) -> UserStatus {
        self.status_of(user_id).visible()
    }

    pub fn manual_status_of(&self, user_id: &str) -> Option<UserStatus> {
        self.records.get(user_id).and_then(|record| record.manual)
    }

    pub fn is_invisible(&self, user_id: &str) -> bool {
        self.manual_status_of(user_id) == Some(UserStatus::Invisible)
    }

    // -----------------------------------------------------------------------
    // Transitions (driven by the registry loop)
    // -----------------------------------------------------------------------

    /// Occupancy 0 → 1. `stored` seeds the manual status the first time the
    /// user is seen; a stored "offline" means they were invisible.
    pub(crate) fn user_connected(&self, user_id: &str, stored: Option<UserStatus>) {
        let status = {
            let mut record = self.records.entry(user_id.to_string()).or_insert_with(|| {
                PresenceRecord {
                    manual: stored.and_then(seed_manual),
                    connected: false,
                }
            });
            record.connected = true;
            record.status()
        };

        tracing::info!(%user_id, %status, "user online");
        let callbacks = self.callbacks.read().first_connect.clone();
        fire_user(callbacks, "first_connect", user_id);

        if status != UserStatus::Invisible {
            self.broadcaster.to_all(&Event::presence(user_id, status));
        }
    }

    /// Occupancy 1 → 0. A user without a manual status is forgotten; the
    /// store seeds them again on their next connect.
    pub(crate) fn user_disconnected(&self, user_id: &str) {
        self.records.remove_if(user_id, |_, record| record.manual.is_none());
        if let Some(mut record) = self.records.get_mut(user_id) {
            record.connected = false;
        }

        tracing::info!(%user_id, "user offline");
        let callbacks = self.callbacks.read().fully_disconnected.clone();
        fire_user(callbacks, "fully_disconnected", user_id);

        self.broadcaster
            .to_all(&Event::presence(user_id, UserStatus::Offline));
    }

    /// The user picked a status. Persisted through callbacks and broadcast
    /// right away whether or not they are connected. Only the user's own
    /// connections ever see `invisible`.
    pub(crate) fn manual_changed(&self, user_id: &str, status: UserStatus, connected: bool) {
        // "offline" picked by a connected user is invisibility.
        let status = seed_manual(status).unwrap_or(UserStatus::Online);

        {
            let mut record = self.records.entry(user_id.to_string()).or_default();
            record.manual = Some(status);
            record.connected = connected;
        }

        tracing::info!(%user_id, %status, "manual status change");

        let callbacks = self.callbacks.read().manual_change.clone();
        for callback in callbacks {
            let user = user_id.to_string();
            let fut = callback(user.clone(), status);
            tokio::spawn(async move {
                if let Err(err) = fut.await {
                    tracing::warn!(user_id = %user, %err, callback = "manual_change", "presence callback failed");
                }
            });
        }

        if status == UserStatus::Invisible && connected {
            self.broadcaster
                .to_all_except(user_id, &Event::presence(user_id, UserStatus::Offline));
            self.broadcaster
                .to_user(user_id, &Event::presence(user_id, UserStatus::Invisible));
        } else {
            self.broadcaster
                .to_all(&Event::presence(user_id, status.visible()));
        }
    }
}

fn fire_user(callbacks: Vec<UserCallback>, kind: &'static str, user_id: &str) {
    for callback in callbacks {
        let user = user_id.to_string();
        let fut = callback(user.clone());
        tokio::spawn(async move {
            if let Err(err) = fut.await {
                tracing::warn!(user_id = %user, %err, callback = kind, "presence callback failed");
            }
        });
    }
}

/// Maps a persisted or requested status onto a manual selection.
fn seed_manual(status: UserStatus) -> Option<UserStatus> {
    match status {
        UserStatus::Online => None,
        UserStatus::Offline => Some(UserStatus::Invisible),
        other => Some(other),
    }
}
