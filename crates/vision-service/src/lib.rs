//! Vision Service Library
//!
//! Meeting access and token ledger service. Owners spend tokens to create
//! shareable video meetings; the service decides who may watch, tracks the
//! meeting lifecycle, and keeps token balances consistent under concurrency.
//!
//! # Architecture
//!
//! The service follows the Handler -> Service -> Repository pattern:
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//! ```
//!
//! A background sweeper (`tasks::sweeper`) ends expired meetings and purges
//! old ended ones.
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Bearer token authentication and HTTP metrics
//! - `models` - Domain records and API payloads
//! - `observability` - Prometheus metrics
//! - `repositories` - Store traits with Postgres and in-memory backends
//! - `routes` - Axum router setup
//! - `services` - Access policy, token ledger, meeting lifecycle, video lookup
//! - `tasks` - Lifecycle sweeper

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
