//! Integration tests for the admin endpoints.
//!
//! Admin rights come from the persisted account, not the token.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;
use vs_test_utils::*;

async fn adjust(server: &TestVsServer, caller: Uuid, target: Uuid, amount: i64) -> Response {
    Client::new()
        .post(format!(
            "{}/api/v1/admin/users/{target}/tokens",
            server.url()
        ))
        .bearer_auth(user_token(caller))
        .json(&json!({ "amount": amount }))
        .send()
        .await
        .unwrap()
}

async fn set_ban(server: &TestVsServer, caller: Uuid, target: Uuid, banned: bool) -> Response {
    Client::new()
        .put(format!("{}/api/v1/admin/users/{target}/ban", server.url()))
        .bearer_auth(user_token(caller))
        .json(&json!({ "banned": banned }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_admin_adjusts_balance_both_ways() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let admin = seed_admin(server.store(), 0).await;
    let user = seed_user(server.store(), 2).await;

    let body: Value = adjust(&server, admin, user, 5).await.json().await?;
    assert_eq!(body["token_balance"], 7);
    assert_eq!(body["applied"], true);

    let body: Value = adjust(&server, admin, user, -3).await.json().await?;
    assert_eq!(body["token_balance"], 4);

    // Debit is recorded as an admin adjustment
    let usage = server.store().usage_records().await;
    assert_eq!(usage.len(), 1);
    assert_eq!(usage.first().unwrap().amount, 3);
    assert_eq!(usage.first().unwrap().action.as_str(), "admin_adjustment");

    Ok(())
}

#[tokio::test]
async fn test_admin_adjustment_cannot_overdraw() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let admin = seed_admin(server.store(), 0).await;
    let user = seed_user(server.store(), 2).await;

    let response = adjust(&server, admin, user, -100).await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let response = adjust(&server, admin, user, 0).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = adjust(&server, admin, Uuid::new_v4(), 5).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_non_admin_is_forbidden() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let user = seed_user(server.store(), 2).await;
    let other = seed_user(server.store(), 2).await;

    assert_eq!(
        adjust(&server, user, user, 100).await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        set_ban(&server, user, other, true).await.status(),
        StatusCode::FORBIDDEN
    );

    let sweep = Client::new()
        .post(format!("{}/api/v1/admin/sweep", server.url()))
        .bearer_auth(user_token(user))
        .send()
        .await?;
    assert_eq!(sweep.status(), StatusCode::FORBIDDEN);

    // Unknown callers are not admins either
    assert_eq!(
        adjust(&server, Uuid::new_v4(), user, 1).await.status(),
        StatusCode::FORBIDDEN
    );

    Ok(())
}

#[tokio::test]
async fn test_banned_user_cannot_create_meetings() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let admin = seed_admin(server.store(), 0).await;
    let user = seed_user(server.store(), 5).await;

    let response = set_ban(&server, admin, user, true).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["is_banned"], true);

    let response = Client::new()
        .post(format!("{}/api/v1/meetings", server.url()))
        .bearer_auth(user_token(user))
        .json(&json!({ "video_ref": TEST_VIDEO_REF, "title": "Nope" }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "USER_BANNED");

    // Balance untouched and still visible
    let me: Value = Client::new()
        .get(format!("{}/api/v1/me", server.url()))
        .bearer_auth(user_token(user))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(me["token_balance"], 5);
    assert_eq!(me["is_banned"], true);

    // Unban restores access
    set_ban(&server, admin, user, false).await;
    let response = Client::new()
        .post(format!("{}/api/v1/meetings", server.url()))
        .bearer_auth(user_token(user))
        .json(&json!({ "video_ref": TEST_VIDEO_REF, "title": "Back" }))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn test_admin_cannot_ban_self() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let admin = seed_admin(server.store(), 0).await;

    let response = set_ban(&server, admin, admin, true).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_admin_triggered_sweep_returns_report() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let admin = seed_admin(server.store(), 0).await;

    let response = Client::new()
        .post(format!("{}/api/v1/admin/sweep", server.url()))
        .bearer_auth(user_token(admin))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let report: Value = response.json().await?;
    assert_eq!(report["expired"], 0);
    assert_eq!(report["purged"], 0);
    assert_eq!(report["failures"], 0);

    Ok(())
}
