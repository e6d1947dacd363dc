//! Postgres implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::OptionalExtension;

use crate::error::ApiError;
use crate::models::channel::Channel;
use crate::models::channel_override::ChannelOverride;
use crate::models::role::Role;
use crate::models::user::UserStatus;

use super::pool::DbPool;
use super::schema::{channel_overrides, channels, roles, server_members, user_statuses};
use super::stores::{ChannelOverrideStore, ChannelStore, MembershipStore, RoleStore, UserStatusStore};

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStatusStore for PgStore {
    async fn status_of(&self, user_id: &str) -> Result<Option<UserStatus>, ApiError> {
        let mut conn = self.pool.get().await?;

        let raw: Option<String> = diesel_async::RunQueryDsl::get_result(
            user_statuses::table
                .find(user_id)
                .select(user_statuses::status),
            &mut conn,
        )
        .await
        .optional()?;

        raw.map(|s| s.parse::<UserStatus>())
            .transpose()
            .map_err(|err| {
                tracing::error!(%err, user_id, "stored status is not recognised");
                ApiError::internal("An internal error occurred")
            })
    }

    async fn update_status(&self, user_id: &str, status: UserStatus) -> Result<(), ApiError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now();

        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(user_statuses::table)
                .values((
                    user_statuses::user_id.eq(user_id),
                    user_statuses::status.eq(status.as_str()),
                    user_statuses::updated_at.eq(now),
                ))
                .on_conflict(user_statuses::user_id)
                .do_update()
                .set((
                    user_statuses::status.eq(status.as_str()),
                    user_statuses::updated_at.eq(now),
                )),
            &mut conn,
        )
        .await?;

        Ok(())
    }

    async fn mark_last_seen(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), ApiError> {
        let mut conn = self.pool.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(user_statuses::table)
                .values((
                    user_statuses::user_id.eq(user_id),
                    user_statuses::status.eq(UserStatus::Online.as_str()),
                    user_statuses::last_seen_at.eq(Some(at)),
                    user_statuses::updated_at.eq(at),
                ))
                .on_conflict(user_statuses::user_id)
                .do_update()
                .set(user_statuses::last_seen_at.eq(Some(at))),
            &mut conn,
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn roles_of(&self, server_id: &str, user_id: &str) -> Result<Vec<Role>, ApiError> {
        let mut conn = self.pool.get().await?;

        let assigned: Option<Vec<String>> = diesel_async::RunQueryDsl::get_result(
            server_members::table
                .find((server_id, user_id))
                .select(server_members::roles),
            &mut conn,
        )
        .await
        .optional()?;

        // Non-members hold nothing, not even the default roles.
        let Some(assigned) = assigned else {
            return Ok(Vec::new());
        };

        let held: Vec<Role> = diesel_async::RunQueryDsl::load(
            roles::table
                .filter(roles::server_id.eq(server_id))
                .filter(roles::is_default.eq(true).or(roles::id.eq_any(&assigned)))
                .select(Role::as_select()),
            &mut conn,
        )
        .await?;

        Ok(held)
    }

    async fn role(&self, role_id: &str) -> Result<Option<Role>, ApiError> {
        let mut conn = self.pool.get().await?;

        let role = diesel_async::RunQueryDsl::get_result(
            roles::table.find(role_id).select(Role::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(role)
    }
}

#[async_trait]
impl ChannelOverrideStore for PgStore {
    async fn overrides_of(&self, channel_id: &str) -> Result<Vec<ChannelOverride>, ApiError> {
        let mut conn = self.pool.get().await?;

        let list = diesel_async::RunQueryDsl::load(
            channel_overrides::table
                .filter(channel_overrides::channel_id.eq(channel_id))
                .select(ChannelOverride::as_select()),
            &mut conn,
        )
        .await?;

        Ok(list)
    }

    async fn upsert_override(&self, ov: &ChannelOverride) -> Result<ChannelOverride, ApiError> {
        let mut conn = self.pool.get().await?;

        let stored = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(channel_overrides::table)
                .values(ov.as_new())
                .on_conflict((channel_overrides::channel_id, channel_overrides::role_id))
                .do_update()
                .set((
                    channel_overrides::allow.eq(ov.allow),
                    channel_overrides::deny.eq(ov.deny),
                ))
                .returning(ChannelOverride::as_returning()),
            &mut conn,
        )
        .await?;

        Ok(stored)
    }

    async fn delete_override(&self, channel_id: &str, role_id: &str) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;

        let deleted = diesel_async::RunQueryDsl::execute(
            diesel::delete(
                channel_overrides::table
                    .filter(channel_overrides::channel_id.eq(channel_id))
                    .filter(channel_overrides::role_id.eq(role_id)),
            ),
            &mut conn,
        )
        .await?;

        Ok(deleted > 0)
    }
}

#[async_trait]
impl ChannelStore for PgStore {
    async fn channel(&self, channel_id: &str) -> Result<Option<Channel>, ApiError> {
        let mut conn = self.pool.get().await?;

        let channel = diesel_async::RunQueryDsl::get_result(
            channels::table.find(channel_id).select(Channel::as_select()),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(channel)
    }
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn server_ids_of(&self, user_id: &str) -> Result<Vec<String>, ApiError> {
        let mut conn = self.pool.get().await?;

        let ids = diesel_async::RunQueryDsl::load(
            server_members::table
                .filter(server_members::user_id.eq(user_id))
                .select(server_members::server_id)
                .order(server_members::server_id.asc()),
            &mut conn,
        )
        .await?;

        Ok(ids)
    }

    async fn is_member(&self, server_id: &str, user_id: &str) -> Result<bool, ApiError> {
        let mut conn = self.pool.get().await?;

        let count: i64 = diesel_async::RunQueryDsl::get_result(
            server_members::table
                .filter(server_members::server_id.eq(server_id))
                .filter(server_members::user_id.eq(user_id))
                .count(),
            &mut conn,
        )
        .await?;

        Ok(count > 0)
    }
}
