//! Permission checks and override writes backed by the collaborator stores.
//!
//! Loads what [`crate::permissions`] needs and hands it the pure resolver.

use crate::db::Stores;
use crate::error::ApiError;
use crate::gateway::events::Event;
use crate::gateway::hub::Hub;
use crate::gateway::Scope;
use crate::models::channel::Channel;
use crate::models::channel_override::ChannelOverride;
use crate::permissions;

/// Load a channel or fail with 404.
pub async fn load_channel(stores: &Stores, channel_id: &str) -> Result<Channel, ApiError> {
    stores
        .channels
        .channel(channel_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Channel not found"))
}

/// Effective server-wide permissions of a user. Zero for non-members.
pub async fn server_permissions(
    stores: &Stores,
    server_id: &str,
    user_id: &str,
) -> Result<i64, ApiError> {
    let roles = stores.roles.roles_of(server_id, user_id).await?;
    Ok(permissions::server_permissions(&roles))
}

/// Effective permissions of a user in a channel, overrides applied.
pub async fn channel_permissions(
    stores: &Stores,
    channel: &Channel,
    user_id: &str,
) -> Result<i64, ApiError> {
    let roles = stores.roles.roles_of(&channel.server_id, user_id).await?;
    if roles.is_empty() {
        return Ok(0);
    }
    let overrides = stores.overrides.overrides_of(&channel.id).await?;
    Ok(permissions::resolve(&roles, &overrides))
}

/// Fail with 403 unless the user holds `required` server-wide.
pub async fn check_server_permission(
    stores: &Stores,
    server_id: &str,
    user_id: &str,
    required: i64,
) -> Result<(), ApiError> {
    let perms = server_permissions(stores, server_id, user_id).await?;
    if permissions::has(perms, required) {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "You do not have permission to perform this action",
        ))
    }
}

/// Fail with 403 unless the user holds `required` in the channel.
pub async fn check_channel_permission(
    stores: &Stores,
    channel: &Channel,
    user_id: &str,
    required: i64,
) -> Result<(), ApiError> {
    let perms = channel_permissions(stores, channel, user_id).await?;
    if permissions::has(perms, required) {
        Ok(())
    } else {
        Err(ApiError::forbidden(
            "You do not have permission to perform this action",
        ))
    }
}

/// Connected users of the channel's server that hold `required` in the
/// channel.
pub async fn channel_audience(
    stores: &Stores,
    hub: &Hub,
    channel: &Channel,
    required: i64,
) -> Result<Vec<String>, ApiError> {
    let overrides = stores.overrides.overrides_of(&channel.id).await?;

    let mut audience = Vec::new();
    for user_id in hub.users_in_server(&channel.server_id) {
        let roles = stores.roles.roles_of(&channel.server_id, &user_id).await?;
        if permissions::has(permissions::resolve(&roles, &overrides), required) {
            audience.push(user_id);
        }
    }
    audience.sort();
    Ok(audience)
}

/// Publish `event` to everybody connected who holds `required` in the
/// channel. Returns the number of connections reached.
pub async fn publish_to_channel(
    stores: &Stores,
    hub: &Hub,
    channel: &Channel,
    required: i64,
    event: &Event,
) -> Result<usize, ApiError> {
    let audience = channel_audience(stores, hub, channel, required).await?;
    if audience.is_empty() {
        return Ok(0);
    }
    Ok(hub.publish(&Scope::Users(audience), event))
}

/// Validate and store an override, then tell the channel's server about it.
/// An all-zero override removes the row instead. Returns what was stored,
/// or `None` if the row was removed.
pub async fn set_channel_override(
    stores: &Stores,
    hub: &Hub,
    channel: &Channel,
    role_id: &str,
    allow: i64,
    deny: i64,
) -> Result<Option<ChannelOverride>, ApiError> {
    permissions::validate_override(allow, deny)?;

    let role = stores
        .roles
        .role(role_id)
        .await?
        .filter(|role| role.server_id == channel.server_id)
        .ok_or_else(|| ApiError::not_found("Role not found"))?;

    let ov = ChannelOverride {
        channel_id: channel.id.clone(),
        role_id: role.id,
        allow,
        deny,
    };

    if ov.is_empty() {
        delete_channel_override(stores, hub, channel, role_id).await?;
        return Ok(None);
    }

    let stored = stores.overrides.upsert_override(&ov).await?;
    tracing::info!(
        channel_id = %stored.channel_id,
        role_id = %stored.role_id,
        allow = stored.allow,
        deny = stored.deny,
        "channel override updated"
    );
    hub.publish(
        &Scope::Server(channel.server_id.clone()),
        &Event::override_updated(&stored),
    );
    Ok(Some(stored))
}

/// Remove an override. Returns whether one existed; nothing is published
/// otherwise.
pub async fn delete_channel_override(
    stores: &Stores,
    hub: &Hub,
    channel: &Channel,
    role_id: &str,
) -> Result<bool, ApiError> {
    let removed = stores.overrides.delete_override(&channel.id, role_id).await?;
    if removed {
        tracing::info!(channel_id = %channel.id, %role_id, "channel override removed");
        hub.publish(
            &Scope::Server(channel.server_id.clone()),
            &Event::override_deleted(&channel.id, role_id),
        );
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::extract::ws::Utf8Bytes;
    use axum::http::StatusCode;
    use serde_json::Value;
    use tokio::sync::mpsc;

    use crate::db::memory::MemoryStore;
    use crate::db::stores::ChannelOverrideStore;
    use crate::gateway::hub::HubSettings;
    use crate::models::role::Role;
    use crate::permissions::{
        ADMINISTRATOR, MANAGE_ROLES, READ_MESSAGES, SEND_MESSAGES, SPEAK, VIEW_CHANNEL,
    };

    fn role(id: &str, position: i32, permissions: i64, is_default: bool) -> Role {
        Role {
            id: id.to_string(),
            server_id: "s1".to_string(),
            name: id.to_string(),
            position,
            permissions,
            is_default,
        }
    }

    fn fixture() -> (Arc<MemoryStore>, Stores, Channel) {
        let store = Arc::new(MemoryStore::new());
        store.insert_role(role("everyone", 0, SEND_MESSAGES | READ_MESSAGES | VIEW_CHANNEL, true));
        store.insert_role(role("mod", 5, MANAGE_ROLES, false));
        store.insert_role(role("admin", 10, ADMINISTRATOR, false));
        let channel = Channel {
            id: "c1".to_string(),
            server_id: "s1".to_string(),
            name: "general".to_string(),
        };
        store.insert_channel(channel.clone());
        store.add_member("s1", "alice", &[]);
        store.add_member("s1", "bob", &["mod"]);
        store.add_member("s1", "root", &["admin"]);
        (store.clone(), Stores::memory(store), channel)
    }

    fn frames(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(frame.as_str()).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn missing_channel_is_not_found() {
        let (_, stores, _) = fixture();
        let err = load_channel(&stores, "nope").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_members_have_nothing() {
        let (_, stores, channel) = fixture();
        assert_eq!(channel_permissions(&stores, &channel, "stranger").await.unwrap(), 0);
        let err = check_channel_permission(&stores, &channel, "stranger", READ_MESSAGES)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn server_checks_use_role_union() {
        let (_, stores, _) = fixture();
        check_server_permission(&stores, "s1", "bob", MANAGE_ROLES).await.unwrap();
        assert!(check_server_permission(&stores, "s1", "alice", MANAGE_ROLES)
            .await
            .is_err());
        check_server_permission(&stores, "s1", "root", MANAGE_ROLES).await.unwrap();
    }

    #[tokio::test]
    async fn override_write_changes_effective_permissions_and_publishes() {
        let (_, stores, channel) = fixture();
        let hub = Hub::start(HubSettings::default());
        let (_conn, mut rx) = hub.connect("alice", vec!["s1".to_string()], None).await.unwrap();
        frames(&mut rx);

        let stored = set_channel_override(&stores, &hub, &channel, "everyone", 0, SEND_MESSAGES)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.deny, SEND_MESSAGES);
        assert!(check_channel_permission(&stores, &channel, "alice", SEND_MESSAGES)
            .await
            .is_err());

        let seen = frames(&mut rx);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["op"], "channel_permission_update");
        assert_eq!(seen[0]["d"]["role_id"], "everyone");

        assert!(delete_channel_override(&stores, &hub, &channel, "everyone").await.unwrap());
        check_channel_permission(&stores, &channel, "alice", SEND_MESSAGES)
            .await
            .unwrap();
        let seen = frames(&mut rx);
        assert_eq!(seen[0]["op"], "channel_permission_delete");
    }

    #[tokio::test]
    async fn invalid_override_is_rejected_before_storage() {
        let (store, stores, channel) = fixture();
        let hub = Hub::start(HubSettings::default());

        let err = set_channel_override(&stores, &hub, &channel, "everyone", SPEAK, SPEAK)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = set_channel_override(&stores, &hub, &channel, "everyone", MANAGE_ROLES, 0)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        assert!(store.overrides_of("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn override_for_foreign_role_is_not_found() {
        let (store, stores, channel) = fixture();
        let mut foreign = role("elsewhere", 1, 0, false);
        foreign.server_id = "s2".to_string();
        store.insert_role(foreign);
        let hub = Hub::start(HubSettings::default());

        let err = set_channel_override(&stores, &hub, &channel, "elsewhere", SPEAK, 0)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn all_zero_override_means_inherit() {
        let (_, stores, channel) = fixture();
        let hub = Hub::start(HubSettings::default());

        set_channel_override(&stores, &hub, &channel, "everyone", SPEAK, 0)
            .await
            .unwrap();
        let result = set_channel_override(&stores, &hub, &channel, "everyone", 0, 0)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(stores.overrides.overrides_of("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn audience_excludes_users_denied_in_channel() {
        let (store, stores, channel) = fixture();
        store.insert_role(role("muted", 3, 0, false));
        store.add_member("s1", "carol", &["muted"]);
        let hub = Hub::start(HubSettings::default());
        set_channel_override(&stores, &hub, &channel, "muted", 0, VIEW_CHANNEL)
            .await
            .unwrap();

        let (_a, mut alice) = hub.connect("alice", vec!["s1".to_string()], None).await.unwrap();
        let (_c, mut carol) = hub.connect("carol", vec!["s1".to_string()], None).await.unwrap();
        let (_x, _outsider) = hub.connect("stranger", Vec::new(), None).await.unwrap();

        let audience = channel_audience(&stores, &hub, &channel, VIEW_CHANNEL).await.unwrap();
        assert_eq!(audience, vec!["alice"]);

        frames(&mut alice);
        frames(&mut carol);
        let reached = publish_to_channel(
            &stores,
            &hub,
            &channel,
            VIEW_CHANNEL,
            &Event::typing_start("bob", "c1"),
        )
        .await
        .unwrap();
        assert_eq!(reached, 1);
        assert_eq!(frames(&mut alice).len(), 1);
        assert!(frames(&mut carol).is_empty());
    }
}
