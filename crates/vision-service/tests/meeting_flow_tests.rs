//! Integration tests for the meeting lifecycle over HTTP.
//!
//! Covers:
//! - Creation and the token debit that pays for it
//! - First-access claiming, including concurrent joiners
//! - Additional authorization and its overwrite semantics
//! - Presence capacity and viewer-reported video state
//! - Owner-only management operations
//!
//! # Test Setup
//!
//! Tests use `TestVsServer` (in-memory store, static video table) and a
//! real HTTP client.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;
use vs_test_utils::*;

async fn create_meeting(server: &TestVsServer, owner: Uuid, body: Value) -> Response {
    Client::new()
        .post(format!("{}/api/v1/meetings", server.url()))
        .bearer_auth(user_token(owner))
        .json(&body)
        .send()
        .await
        .unwrap()
}

/// Create a meeting on the short test video and return its code.
async fn create_default(server: &TestVsServer, owner: Uuid) -> String {
    let response = create_meeting(
        server,
        owner,
        json!({ "video_ref": TEST_VIDEO_REF, "title": "Team sync" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    body["meeting"]["meeting_code"].as_str().unwrap().to_string()
}

async fn viewer_post(server: &TestVsServer, code: &str, action: &str, body: Value) -> Response {
    Client::new()
        .post(format!("{}/api/v1/meetings/{code}/{action}", server.url()))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn join_as_viewer(server: &TestVsServer, code: &str, viewer_id: &str) -> Response {
    viewer_post(server, code, "join", json!({ "viewer_id": viewer_id })).await
}

async fn join_as_user(server: &TestVsServer, code: &str, user_id: Uuid) -> Response {
    Client::new()
        .post(format!("{}/api/v1/meetings/{code}/join", server.url()))
        .bearer_auth(user_token(user_id))
        .send()
        .await
        .unwrap()
}

async fn owner_post(server: &TestVsServer, code: &str, action: &str, owner: Uuid) -> Response {
    Client::new()
        .post(format!("{}/api/v1/meetings/{code}/{action}", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await
        .unwrap()
}

async fn error_code(response: Response) -> String {
    let body: Value = response.json().await.unwrap();
    body["error"]["code"].as_str().unwrap().to_string()
}

async fn balance(server: &TestVsServer, user_id: Uuid) -> i64 {
    let body: Value = Client::new()
        .get(format!("{}/api/v1/me", server.url()))
        .bearer_auth(user_token(user_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["token_balance"].as_i64().unwrap()
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_debits_owner_and_records_usage() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 3).await;

    let response = create_meeting(
        &server,
        owner,
        json!({ "video_ref": TEST_VIDEO_REF, "title": "  Team sync  " }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: Value = response.json().await?;
    assert_eq!(body["token_balance"], 2);
    assert_eq!(body["meeting"]["title"], "Team sync");
    assert_eq!(body["meeting"]["status"], "not_started");
    assert_eq!(body["meeting"]["video_url"], TEST_VIDEO_URL);
    assert_eq!(body["meeting"]["video_duration_ms"], TEST_VIDEO_DURATION_MS);
    assert_eq!(body["meeting"]["max_participants"], 1);
    assert_eq!(body["meeting"]["first_accessed"], false);

    let code = body["meeting"]["meeting_code"].as_str().unwrap();
    assert_eq!(code.len(), 11);
    assert!(code
        .chars()
        .all(|c| c == '-' || c.is_ascii_lowercase()));

    let usage: Value = Client::new()
        .get(format!("{}/api/v1/me/token-usage", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await?
        .json()
        .await?;
    let entries = usage["usage"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "meeting_created");
    assert_eq!(entries[0]["amount"], 1);
    assert_eq!(entries[0]["meeting_code"], code);

    Ok(())
}

#[tokio::test]
async fn test_create_with_zero_balance_returns_402() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 0).await;

    let response = create_meeting(
        &server,
        owner,
        json!({ "video_ref": TEST_VIDEO_REF, "title": "Broke" }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(error_code(response).await, "INSUFFICIENT_FUNDS");
    assert_eq!(server.store().meeting_count().await, 0);
    assert_eq!(server.videos().call_count(), 0);
    assert!(server.store().usage_records().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_create_rejects_invalid_input_without_charging() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 5).await;

    let cases = [
        json!({ "video_ref": "no-such-video", "title": "Unknown" }),
        json!({ "video_ref": TEST_VIDEO_REF, "title": "   " }),
        json!({ "video_ref": TEST_VIDEO_REF, "title": "x".repeat(201) }),
        json!({ "video_ref": TEST_VIDEO_REF, "title": "Cap", "max_participants": 0 }),
        json!({ "title": "Missing video" }),
    ];

    for body in cases {
        let response = create_meeting(&server, owner, body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }

    assert_eq!(balance(&server, owner).await, 5);
    assert_eq!(server.store().meeting_count().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_create_requires_authentication() -> Result<()> {
    let server = TestVsServer::spawn().await?;

    let response = Client::new()
        .post(format!("{}/api/v1/meetings", server.url()))
        .json(&json!({ "video_ref": TEST_VIDEO_REF, "title": "Anon" }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));

    Ok(())
}

// ============================================================================
// Joining
// ============================================================================

#[tokio::test]
async fn test_full_viewer_flow() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;

    // First viewer claims the link and starts the meeting
    let response = join_as_viewer(&server, &code, "device-a").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["access"], "first_access");
    assert_eq!(body["status"], "active");
    assert_eq!(body["video_url"], TEST_VIDEO_URL);

    // Same viewer again
    let body: Value = join_as_viewer(&server, &code, "device-a").await.json().await?;
    assert_eq!(body["access"], "first_accessor");

    // Someone else
    let response = join_as_viewer(&server, &code, "device-b").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "NOT_AUTHORIZED");

    // Owner is always admitted
    let body: Value = join_as_user(&server, &code, owner).await.json().await?;
    assert_eq!(body["access"], "owner");

    // Viewer reports the video finished
    let response =
        viewer_post(&server, &code, "video-ended", json!({ "viewer_id": "device-a" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "ended");
    assert!(body["ended_at"].is_string());

    // Ended meetings admit nobody, not even the owner
    let response = join_as_viewer(&server, &code, "device-a").await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(error_code(response).await, "MEETING_ENDED");
    assert_eq!(
        join_as_user(&server, &code, owner).await.status(),
        StatusCode::GONE
    );

    // Owner view reflects views and duration
    let meeting: Value = Client::new()
        .get(format!("{}/api/v1/meetings/{code}", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(meeting["status"], "ended");
    assert_eq!(meeting["view_count"], 3);
    assert_eq!(meeting["first_accessed"], true);
    assert!(meeting["duration_ms"].as_i64().unwrap() >= 0);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_first_join_admits_exactly_one() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;

    let joins = (0..10).map(|i| {
        let url = format!("{}/api/v1/meetings/{code}/join", server.url());
        async move {
            Client::new()
                .post(url)
                .json(&json!({ "viewer_id": format!("device-{i}") }))
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = futures::future::join_all(joins).await;

    let admitted = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let denied = statuses
        .iter()
        .filter(|s| **s == StatusCode::FORBIDDEN)
        .count();
    assert_eq!(admitted, 1);
    assert_eq!(denied, 9);

    Ok(())
}

#[tokio::test]
async fn test_join_unknown_or_malformed_code_is_404() -> Result<()> {
    let server = TestVsServer::spawn().await?;

    for code in ["zzz-zzz-zzz", "not-a-code", "ABC-DEF-GHI"] {
        let response = join_as_viewer(&server, code, "device-a").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "code: {code}");
    }

    Ok(())
}

#[tokio::test]
async fn test_join_rejects_invalid_viewer_id() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;

    let response = join_as_viewer(&server, &code, "has spaces").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_anonymous_join_without_viewer_id_uses_address() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;

    assert_eq!(
        viewer_post(&server, &code, "join", json!({})).await.status(),
        StatusCode::OK
    );
    let body: Value = viewer_post(&server, &code, "join", json!({}))
        .await
        .json()
        .await?;
    assert_eq!(body["access"], "first_accessor");

    let meeting: Value = Client::new()
        .get(format!("{}/api/v1/meetings/{code}", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(meeting["first_accessed"], true);

    Ok(())
}

#[tokio::test]
async fn test_authorized_viewer_is_replaced_not_added() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;

    assert_eq!(
        join_as_viewer(&server, &code, "device-a").await.status(),
        StatusCode::OK
    );

    let authorize = |identity: &'static str| {
        let url = format!("{}/api/v1/meetings/{code}/authorized-viewer", server.url());
        async move {
            Client::new()
                .put(url)
                .bearer_auth(user_token(owner))
                .json(&json!({ "identity": identity }))
                .send()
                .await
                .unwrap()
        }
    };

    let response = authorize("viewer:device-b").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["authorized_additional_id"], "viewer:device-b");

    let body: Value = join_as_viewer(&server, &code, "device-b").await.json().await?;
    assert_eq!(body["access"], "authorized_additional");

    assert_eq!(authorize("viewer:device-c").await.status(), StatusCode::OK);

    assert_eq!(
        join_as_viewer(&server, &code, "device-b").await.status(),
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        join_as_viewer(&server, &code, "device-c").await.status(),
        StatusCode::OK
    );
    // First accessor is unaffected
    assert_eq!(
        join_as_viewer(&server, &code, "device-a").await.status(),
        StatusCode::OK
    );

    assert_eq!(
        authorize("nonsense").await.status(),
        StatusCode::BAD_REQUEST
    );

    Ok(())
}

// ============================================================================
// Viewer operations
// ============================================================================

#[tokio::test]
async fn test_presence_respects_capacity() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;
    join_as_viewer(&server, &code, "device-a").await;

    let response =
        viewer_post(&server, &code, "presence", json!({ "viewer_id": "device-a" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["current_participants"], 1);
    assert_eq!(body["max_participants"], 1);

    // Owner is a participant but the meeting is full
    let response = Client::new()
        .post(format!("{}/api/v1/meetings/{code}/presence", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(response).await, "CAPACITY_EXCEEDED");

    let response = Client::new()
        .delete(format!("{}/api/v1/meetings/{code}/presence", server.url()))
        .json(&json!({ "viewer_id": "device-a" }))
        .send()
        .await?;
    let body: Value = response.json().await?;
    assert_eq!(body["current_participants"], 0);

    // Strangers cannot occupy a slot
    let response =
        viewer_post(&server, &code, "presence", json!({ "viewer_id": "device-z" })).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn test_viewer_reported_video_duration() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let response = create_meeting(
        &server,
        owner,
        json!({ "video_ref": TEST_LIVE_VIDEO_REF, "title": "Live" }),
    )
    .await;
    let body: Value = response.json().await?;
    assert!(body["meeting"]["video_duration_ms"].is_null());
    let code = body["meeting"]["meeting_code"].as_str().unwrap().to_string();

    join_as_viewer(&server, &code, "device-a").await;

    let response = viewer_post(
        &server,
        &code,
        "video-duration",
        json!({ "viewer_id": "device-a", "duration_ms": 30_000 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["video_duration_ms"], 30_000);

    let response = viewer_post(
        &server,
        &code,
        "video-duration",
        json!({ "viewer_id": "device-a", "duration_ms": 0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = viewer_post(
        &server,
        &code,
        "video-duration",
        json!({ "viewer_id": "device-b", "duration_ms": 10_000 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    Ok(())
}

// ============================================================================
// Owner management
// ============================================================================

#[tokio::test]
async fn test_non_owner_cannot_manage_meeting() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let other = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;
    let client = Client::new();

    let get = client
        .get(format!("{}/api/v1/meetings/{code}", server.url()))
        .bearer_auth(user_token(other))
        .send()
        .await?;
    assert_eq!(get.status(), StatusCode::FORBIDDEN);

    let end = client
        .post(format!("{}/api/v1/meetings/{code}/end", server.url()))
        .bearer_auth(user_token(other))
        .send()
        .await?;
    assert_eq!(end.status(), StatusCode::FORBIDDEN);

    let delete = client
        .delete(format!("{}/api/v1/meetings/{code}", server.url()))
        .bearer_auth(user_token(other))
        .send()
        .await?;
    assert_eq!(delete.status(), StatusCode::FORBIDDEN);

    let list: Value = client
        .get(format!("{}/api/v1/meetings", server.url()))
        .bearer_auth(user_token(other))
        .send()
        .await?
        .json()
        .await?;
    assert!(list["meetings"].as_array().unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_rename_and_delete_only_before_start() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 2).await;
    let client = Client::new();

    let first = create_default(&server, owner).await;
    let renamed: Value = client
        .patch(format!("{}/api/v1/meetings/{first}", server.url()))
        .bearer_auth(user_token(owner))
        .json(&json!({ "title": "Renamed" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(renamed["title"], "Renamed");

    let deleted = client
        .delete(format!("{}/api/v1/meetings/{first}", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    // No refund
    assert_eq!(balance(&server, owner).await, 1);

    let second = create_default(&server, owner).await;
    let started = client
        .post(format!("{}/api/v1/meetings/{second}/start", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await?;
    assert_eq!(started.status(), StatusCode::OK);

    let rename = client
        .patch(format!("{}/api/v1/meetings/{second}", server.url()))
        .bearer_auth(user_token(owner))
        .json(&json!({ "title": "Too late" }))
        .send()
        .await?;
    assert_eq!(rename.status(), StatusCode::CONFLICT);

    let delete = client
        .delete(format!("{}/api/v1/meetings/{second}", server.url()))
        .bearer_auth(user_token(owner))
        .send()
        .await?;
    assert_eq!(delete.status(), StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn test_owner_end_is_idempotent() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let owner = seed_user(server.store(), 1).await;
    let code = create_default(&server, owner).await;

    // Ending requires a started meeting
    assert_eq!(
        owner_post(&server, &code, "end", owner).await.status(),
        StatusCode::CONFLICT
    );

    owner_post(&server, &code, "start", owner).await;

    let first: Value = owner_post(&server, &code, "end", owner).await.json().await?;
    assert_eq!(first["status"], "ended");

    let second = owner_post(&server, &code, "end", owner).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second: Value = second.json().await?;
    assert_eq!(second["ended_at"], first["ended_at"]);

    Ok(())
}
