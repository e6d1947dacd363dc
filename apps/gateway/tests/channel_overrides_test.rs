mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;

use murmur_gateway::permissions::{
    ADMINISTRATOR, MANAGE_ROLES, READ_MESSAGES, SEND_MESSAGES, SPEAK, VIEW_CHANNEL,
};

fn bearer(user_id: &str) -> String {
    format!("Bearer {}", common::token_for(user_id))
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels/:channel_id/overrides
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_overrides_requires_manage_channels() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);
    let path = format!("/api/v1/channels/{}/overrides", seeded.channel_id);

    // Member -> 403.
    let resp = server
        .get(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.member_id))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);

    // Moderator -> 200 (empty list).
    let resp = server
        .get(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.moderator_id))
        .await;
    resp.assert_status_ok();
    let overrides: Vec<serde_json::Value> = resp.json();
    assert!(overrides.is_empty());
}

#[tokio::test]
async fn requests_without_token_are_unauthorized() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);

    let resp = server
        .get(&format!("/api/v1/channels/{}/overrides", seeded.channel_id))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json::<serde_json::Value>()["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn unknown_channel_is_not_found() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);

    let resp = server
        .get("/api/v1/channels/ch_missing/overrides")
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// PUT /api/v1/channels/:channel_id/overrides/:role_id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upsert_override_requires_manage_roles() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);
    let path = format!(
        "/api/v1/channels/{}/overrides/{}",
        seeded.channel_id, seeded.everyone_role
    );

    let resp = server
        .put(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.member_id))
        .json(&json!({ "allow": 0, "deny": SEND_MESSAGES }))
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);

    let resp = server
        .put(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.moderator_id))
        .json(&json!({ "allow": 0, "deny": SEND_MESSAGES }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["role_id"], seeded.everyone_role.as_str());
    assert_eq!(body["deny"], SEND_MESSAGES);

    // Listed afterwards.
    let resp = server
        .get(&format!("/api/v1/channels/{}/overrides", seeded.channel_id))
        .add_header(AUTHORIZATION, bearer(&seeded.moderator_id))
        .await;
    let overrides: Vec<serde_json::Value> = resp.json();
    assert_eq!(overrides.len(), 1);
}

#[tokio::test]
async fn upsert_override_rejects_invalid_masks() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);
    let path = format!(
        "/api/v1/channels/{}/overrides/{}",
        seeded.channel_id, seeded.everyone_role
    );

    // Same bit in allow and deny.
    let resp = server
        .put(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .json(&json!({ "allow": SPEAK, "deny": SPEAK }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);

    // Server management bits cannot be overridden per channel.
    let resp = server
        .put(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .json(&json!({ "allow": MANAGE_ROLES, "deny": 0 }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn upsert_override_for_unknown_role_is_not_found() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);

    let resp = server
        .put(&format!(
            "/api/v1/channels/{}/overrides/role_missing",
            seeded.channel_id
        ))
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .json(&json!({ "allow": SPEAK, "deny": 0 }))
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn all_zero_override_resets_to_inherit() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);
    let path = format!(
        "/api/v1/channels/{}/overrides/{}",
        seeded.channel_id, seeded.everyone_role
    );

    server
        .put(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .json(&json!({ "allow": SPEAK, "deny": 0 }))
        .await
        .assert_status_ok();

    let resp = server
        .put(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .json(&json!({ "allow": 0, "deny": 0 }))
        .await;
    resp.assert_status(StatusCode::NO_CONTENT);

    let resp = server
        .get(&format!("/api/v1/channels/{}/overrides", seeded.channel_id))
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .await;
    let overrides: Vec<serde_json::Value> = resp.json();
    assert!(overrides.is_empty());
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/channels/:channel_id/overrides/:role_id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_override_removes_and_then_404s() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);
    let path = format!(
        "/api/v1/channels/{}/overrides/{}",
        seeded.channel_id, seeded.everyone_role
    );

    server
        .put(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.moderator_id))
        .json(&json!({ "allow": 0, "deny": SEND_MESSAGES }))
        .await
        .assert_status_ok();

    // Member lacks MANAGE_ROLES.
    server
        .delete(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.member_id))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    server
        .delete(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.moderator_id))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    server
        .delete(&path)
        .add_header(AUTHORIZATION, bearer(&seeded.moderator_id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// GET /api/v1/channels/:channel_id/permissions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn effective_permissions_reflect_overrides() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);
    let perms_path = format!("/api/v1/channels/{}/permissions", seeded.channel_id);

    let resp = server
        .get(&perms_path)
        .add_header(AUTHORIZATION, bearer(&seeded.member_id))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["permissions"], VIEW_CHANNEL | READ_MESSAGES | SEND_MESSAGES);
    assert_eq!(body["administrator"], false);

    server
        .put(&format!(
            "/api/v1/channels/{}/overrides/{}",
            seeded.channel_id, seeded.everyone_role
        ))
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .json(&json!({ "allow": 0, "deny": SEND_MESSAGES }))
        .await
        .assert_status_ok();

    let body: serde_json::Value = server
        .get(&perms_path)
        .add_header(AUTHORIZATION, bearer(&seeded.member_id))
        .await
        .json();
    assert_eq!(body["permissions"], VIEW_CHANNEL | READ_MESSAGES);

    // Administrators ignore overrides entirely.
    let body: serde_json::Value = server
        .get(&perms_path)
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .await
        .json();
    assert_eq!(body["administrator"], true);
    assert_ne!(body["permissions"].as_i64().unwrap() & SEND_MESSAGES, 0);
    assert_ne!(body["permissions"].as_i64().unwrap() & ADMINISTRATOR, 0);
}

#[tokio::test]
async fn effective_permissions_forbidden_for_non_members() {
    let (app, _state, store) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let seeded = common::seed_server(&store);

    server
        .get(&format!("/api/v1/channels/{}/permissions", seeded.channel_id))
        .add_header(AUTHORIZATION, bearer(&common::new_user_id()))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn override_changes_are_pushed_to_connected_members() {
    let (state, store) = common::test_state();
    let seeded = common::seed_server(&store);
    let addr = common::start_ws_server(state.clone()).await;
    let app = murmur_gateway::routes::router().with_state(state);
    let server = TestServer::new(app).unwrap();

    let (mut ws, _) = common::connect(addr, &seeded.member_id).await;

    server
        .put(&format!(
            "/api/v1/channels/{}/overrides/{}",
            seeded.channel_id, seeded.everyone_role
        ))
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .json(&json!({ "allow": 0, "deny": SPEAK }))
        .await
        .assert_status_ok();

    let update = common::next_op(&mut ws, "channel_permission_update")
        .await
        .expect("update pushed");
    assert_eq!(update["d"]["channel_id"], seeded.channel_id.as_str());
    assert_eq!(update["d"]["deny"], SPEAK);

    server
        .delete(&format!(
            "/api/v1/channels/{}/overrides/{}",
            seeded.channel_id, seeded.everyone_role
        ))
        .add_header(AUTHORIZATION, bearer(&seeded.owner_id))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let deleted = common::next_op(&mut ws, "channel_permission_delete")
        .await
        .expect("delete pushed");
    assert_eq!(deleted["d"]["role_id"], seeded.everyone_role.as_str());
}
