#![warn(clippy::unwrap_used)]

//! HTTP surface of the control plane: axum routers and handlers, the
//! tenant-resolution middleware, session auth, per-tenant rate limiting,
//! and the operator audit layer.

pub mod audit_layer;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rate_limit;
pub mod router;
pub mod sessions;
pub mod state;
pub mod tenant_layer;

pub use router::build_router;
pub use state::AppState;
