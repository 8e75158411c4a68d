//! # HTTP Middleware
//!
//! Request metrics. Tracing uses `tower_http::trace::TraceLayer` directly
//! and authentication lives in [`crate::auth`].

pub mod metrics;
