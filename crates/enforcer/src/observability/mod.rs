//! Observability: Prometheus metrics and health endpoints.

pub mod health;
pub mod metrics;

pub use health::{health_router, observability_router, HealthState};
