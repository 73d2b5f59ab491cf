//! Middleware for Vision Service.
//!
//! # Components
//!
//! - `auth` - User token authentication (required and optional)
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{optional_user_auth, require_user_auth, AuthState, AuthenticatedUser};
pub use http_metrics::http_metrics_middleware;
