//! HTTP middleware shared by the worker and aggregator services.
//!
//! This module provides:
//! - Preshared-key authentication (health probes exempt)
//! - Rate limiting per remote identity (health probes exempt)
//! - Request logging with latency tracking

pub mod auth;
pub mod logging;
pub mod rate_limit;

pub use auth::{api_key_auth, ApiKeyAuth};
pub use logging::request_logging;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
