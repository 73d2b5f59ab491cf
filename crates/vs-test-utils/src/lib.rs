//! # VS Test Utilities
//!
//! Shared test utilities for the Vision Service.
//!
//! This crate provides:
//! - Server test harness (`TestVsServer` for E2E tests over an in-memory store)
//! - Token builders (`TestTokenBuilder`, `user_token`)
//! - Fixtures (fixed secrets and videos, seeded accounts)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vs_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestVsServer::spawn().await?;
//!     let owner = seed_user(server.store(), 10).await;
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/v1/me", server.url()))
//!         .bearer_auth(user_token(owner))
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
