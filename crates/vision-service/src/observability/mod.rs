//! Observability for Vision Service.
//!
//! Prometheus metrics definitions and recording helpers.

pub mod metrics;
