//! Integration tests for POST /api/v1/payments/webhook.
//!
//! The payment collaborator may redeliver notifications; a transaction id
//! must be credited at most once.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;
use vision_service::repositories::UserRepository;
use vs_test_utils::*;

async fn deliver(server: &TestVsServer, secret: Option<&str>, body: Value) -> Response {
    let mut request = Client::new()
        .post(format!("{}/api/v1/payments/webhook", server.url()))
        .json(&body);
    if let Some(secret) = secret {
        request = request.header("X-Webhook-Secret", secret);
    }
    request.send().await.unwrap()
}

#[tokio::test]
async fn test_payment_credits_once_per_transaction() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let user = seed_user(server.store(), 2).await;
    let payment = json!({ "user_id": user, "tokens": 10, "transaction_id": "txn-001" });

    let response = deliver(&server, Some(TEST_WEBHOOK_SECRET), payment.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["applied"], true);
    assert_eq!(body["token_balance"], 12);

    // Redelivery
    let response = deliver(&server, Some(TEST_WEBHOOK_SECRET), payment).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await?;
    assert_eq!(body["applied"], false);
    assert_eq!(body["token_balance"], 12);

    // A new transaction is applied
    let body: Value = deliver(
        &server,
        Some(TEST_WEBHOOK_SECRET),
        json!({ "user_id": user, "tokens": 5, "transaction_id": "txn-002" }),
    )
    .await
    .json()
    .await?;
    assert_eq!(body["token_balance"], 17);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_redelivery_credits_once() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let user = seed_user(server.store(), 0).await;

    let deliveries = (0..8).map(|_| {
        deliver(
            &server,
            Some(TEST_WEBHOOK_SECRET),
            json!({ "user_id": user, "tokens": 4, "transaction_id": "txn-dup" }),
        )
    });
    let responses = futures::future::join_all(deliveries).await;

    let mut applied = 0;
    for response in responses {
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await?;
        if body["applied"] == true {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    let me: Value = Client::new()
        .get(format!("{}/api/v1/me", server.url()))
        .bearer_auth(user_token(user))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(me["token_balance"], 4);

    Ok(())
}

#[tokio::test]
async fn test_webhook_requires_secret() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let user = seed_user(server.store(), 0).await;
    let payment = json!({ "user_id": user, "tokens": 10, "transaction_id": "txn-001" });

    let missing = deliver(&server, None, payment.clone()).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = deliver(&server, Some("not-the-secret"), payment).await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let account = server.store().get_user(user).await?.unwrap();
    assert_eq!(account.token_balance, 0);

    Ok(())
}

#[tokio::test]
async fn test_webhook_validates_payload() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let user = seed_user(server.store(), 0).await;

    let bad = [
        json!({ "user_id": user, "tokens": 0, "transaction_id": "txn-1" }),
        json!({ "user_id": user, "tokens": -5, "transaction_id": "txn-2" }),
        json!({ "user_id": user, "tokens": 5, "transaction_id": "   " }),
        json!({ "user_id": user, "tokens": 5, "transaction_id": "t".repeat(129) }),
        json!({ "user_id": "not-a-uuid", "tokens": 5, "transaction_id": "txn-3" }),
        json!({ "tokens": 5 }),
    ];

    for body in bad {
        let response = deliver(&server, Some(TEST_WEBHOOK_SECRET), body.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
    }

    Ok(())
}

#[tokio::test]
async fn test_webhook_for_unknown_user_is_404() -> Result<()> {
    let server = TestVsServer::spawn().await?;

    let response = deliver(
        &server,
        Some(TEST_WEBHOOK_SECRET),
        json!({ "user_id": Uuid::new_v4(), "tokens": 5, "transaction_id": "txn-x" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_oversized_payment_is_rejected_and_balance_unchanged() -> Result<()> {
    let server = TestVsServer::spawn().await?;
    let user = seed_user(server.store(), 1).await;

    let response = deliver(
        &server,
        Some(TEST_WEBHOOK_SECRET),
        json!({ "user_id": user, "tokens": i64::MAX, "transaction_id": "txn-big" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let account = server.store().get_user(user).await?.unwrap();
    assert_eq!(account.token_balance, 1);

    Ok(())
}
