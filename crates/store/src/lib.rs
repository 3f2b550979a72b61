#![warn(clippy::unwrap_used)]

//! Isolating data access layer: tenant-scoped collections with automatic
//! read filtering, insert stamping, and cross-tenant mutation guards, plus
//! the platform-owned tenant registry and user directory.

pub mod database;
pub mod entities;
pub mod scoped;
pub mod tenants;
pub mod users;

pub use database::Database;
pub use scoped::{OperatorRow, ScopedCollection, TenantScoped};
pub use tenants::{Tenant, TenantRegistry, TenantStatus};
pub use users::{User, UserDirectory};
