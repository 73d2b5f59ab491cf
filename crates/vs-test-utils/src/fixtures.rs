//! Fixed test values and seeded accounts.

use chrono::Utc;
use uuid::Uuid;
use vision_service::models::UserAccount;
use vision_service::repositories::InMemoryStore;
use vision_service::services::video::mock::StaticVideoResolver;

/// HS256 secret the test server validates user tokens with.
pub const TEST_JWT_SECRET: &str = "test-jwt-secret-at-least-32-bytes-long!!";

/// Shared secret the test server expects on payment webhooks.
pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Tokens charged per meeting on the test server.
pub const TEST_MEETING_COST: i64 = 1;

/// Known video with a duration reported by the video collaborator.
pub const TEST_VIDEO_REF: &str = "vid-short";
pub const TEST_VIDEO_URL: &str = "https://cdn.test/vid-short.mp4";
pub const TEST_VIDEO_DURATION_MS: i64 = 60_000;

/// Known video whose duration is only learned from viewers.
pub const TEST_LIVE_VIDEO_REF: &str = "vid-live";
pub const TEST_LIVE_VIDEO_URL: &str = "https://cdn.test/vid-live.m3u8";

/// Resolver that knows the two test videos.
pub fn test_videos() -> StaticVideoResolver {
    StaticVideoResolver::new()
        .with_video(TEST_VIDEO_REF, TEST_VIDEO_URL, Some(TEST_VIDEO_DURATION_MS))
        .with_video(TEST_LIVE_VIDEO_REF, TEST_LIVE_VIDEO_URL, None)
}

/// Seed a regular user with `balance` tokens.
pub async fn seed_user(store: &InMemoryStore, balance: i64) -> Uuid {
    seed_account(store, balance, false).await
}

/// Seed an admin with `balance` tokens.
pub async fn seed_admin(store: &InMemoryStore, balance: i64) -> Uuid {
    seed_account(store, balance, true).await
}

async fn seed_account(store: &InMemoryStore, balance: i64, is_admin: bool) -> Uuid {
    let user_id = Uuid::new_v4();
    store
        .insert_user(UserAccount {
            user_id,
            token_balance: balance,
            is_admin,
            is_banned: false,
            created_at: Utc::now(),
        })
        .await;
    user_id
}
