use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::ApiError;
use crate::models::channel::Channel;
use crate::models::channel_override::ChannelOverride;
use crate::models::role::Role;
use crate::models::user::UserStatus;

use super::stores::{ChannelOverrideStore, ChannelStore, MembershipStore, RoleStore, UserStatusStore};

#[derive(Default)]
struct Inner {
    statuses: HashMap<String, UserStatus>,
    last_seen: HashMap<String, DateTime<Utc>>,
    roles: HashMap<String, Role>,
    /// server_id -> user_id -> explicitly assigned role IDs
    members: HashMap<String, BTreeMap<String, Vec<String>>>,
    channels: HashMap<String, Channel>,
    /// channel_id -> role_id -> override
    overrides: HashMap<String, BTreeMap<String, ChannelOverride>>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_role(&self, role: Role) {
        self.inner.write().roles.insert(role.id.clone(), role);
    }

    pub fn insert_channel(&self, channel: Channel) {
        self.inner.write().channels.insert(channel.id.clone(), channel);
    }

    /// Adds `user_id` to `server_id` holding `role_ids` (default roles are
    /// implicit). Re-adding replaces the role list.
    pub fn add_member(&self, server_id: &str, user_id: &str, role_ids: &[&str]) {
        self.inner
            .write()
            .members
            .entry(server_id.to_string())
            .or_default()
            .insert(
                user_id.to_string(),
                role_ids.iter().map(|id| id.to_string()).collect(),
            );
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.inner.read().last_seen.get(user_id).copied()
    }
}

#[async_trait]
impl UserStatusStore for MemoryStore {
    async fn status_of(&self, user_id: &str) -> Result<Option<UserStatus>, ApiError> {
        Ok(self.inner.read().statuses.get(user_id).copied())
    }

    async fn update_status(&self, user_id: &str, status: UserStatus) -> Result<(), ApiError> {
        self.inner.write().statuses.insert(user_id.to_string(), status);
        Ok(())
    }

    async fn mark_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        self.inner.write().last_seen.insert(user_id.to_string(), at);
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn roles_of(&self, server_id: &str, user_id: &str) -> Result<Vec<Role>, ApiError> {
        let inner = self.inner.read();
        let Some(assigned) = inner.members.get(server_id).and_then(|m| m.get(user_id)) else {
            return Ok(Vec::new());
        };

        let roles = inner
            .roles
            .values()
            .filter(|role| role.server_id == server_id)
            .filter(|role| role.is_default || assigned.contains(&role.id))
            .cloned()
            .collect();
        Ok(roles)
    }

    async fn role(&self, role_id: &str) -> Result<Option<Role>, ApiError> {
        Ok(self.inner.read().roles.get(role_id).cloned())
    }
}

#[async_trait]
impl ChannelOverrideStore for MemoryStore {
    async fn overrides_of(&self, channel_id: &str) -> Result<Vec<ChannelOverride>, ApiError> {
        Ok(self
            .inner
            .read()
            .overrides
            .get(channel_id)
            .map(|by_role| by_role.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_override(&self, ov: &ChannelOverride) -> Result<ChannelOverride, ApiError> {
        self.inner
            .write()
            .overrides
            .entry(ov.channel_id.clone())
            .or_default()
            .insert(ov.role_id.clone(), ov.clone());
        Ok(ov.clone())
    }

    async fn delete_override(&self, channel_id: &str, role_id: &str) -> Result<bool, ApiError> {
        Ok(self
            .inner
            .write()
            .overrides
            .get_mut(channel_id)
            .and_then(|by_role| by_role.remove(role_id))
            .is_some())
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, ApiError> {
        Ok(self.inner.read().channels.get(channel_id).cloned())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn server_ids_of(&self, user_id: &str) -> Result<Vec<String>, ApiError> {
        let servers: BTreeSet<String> = self
            .inner
            .read()
            .members
            .iter()
            .filter(|(_, members)| members.contains_key(user_id))
            .map(|(server_id, _)| server_id.clone())
            .collect();
        Ok(servers.into_iter().collect())
    }

    async fn is_member(&self, server_id: &str, user_id: &str) -> Result<bool, ApiError> {
        Ok(self
            .inner
            .read()
            .members
            .get(server_id)
            .is_some_and(|members| members.contains_key(user_id)))
    }
}
