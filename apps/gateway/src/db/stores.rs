//! Collaborator interfaces the gateway reads from and writes through.
//!
//! Backed by Postgres in production and [`super::memory::MemoryStore`] in
//! tests and store-less deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ApiError;
use crate::models::channel::Channel;
use crate::models::channel_override::ChannelOverride;
use crate::models::role::Role;
use crate::models::user::UserStatus;

#[async_trait]
pub trait UserStatusStore: Send + Sync {
    /// The user's persisted manual status, if one was ever stored.
    async fn status_of(&self, user_id: &str) -> Result<Option<UserStatus>, ApiError>;
    async fn update_status(&self, user_id: &str, status: UserStatus) -> Result<(), ApiError>;
    async fn mark_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), ApiError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Roles `user_id` holds in `server_id`, including the server's default
    /// roles. Empty for non-members.
    async fn roles_of(&self, server_id: &str, user_id: &str) -> Result<Vec<Role>, ApiError>;
    async fn role(&self, role_id: &str) -> Result<Option<Role>, ApiError>;
}

#[async_trait]
pub trait ChannelOverrideStore: Send + Sync {
    async fn overrides_of(&self, channel_id: &str) -> Result<Vec<ChannelOverride>, ApiError>;
    async fn upsert_override(&self, ov: &ChannelOverride) -> Result<ChannelOverride, ApiError>;
    /// Returns whether a row was removed.
    async fn delete_override(&self, channel_id: &str, role_id: &str) -> Result<bool, ApiError>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, ApiError>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn server_ids_of(&self, user_id: &str) -> Result<Vec<String>, ApiError>;
    async fn is_member(&self, server_id: &str, user_id: &str) -> Result<bool, ApiError>;
}
