#![warn(clippy::unwrap_used)]

//! Operator (SuperAdmin) surface: cross-tenant listing and dashboards,
//! impersonation grants, the admin audit log, and housekeeping operations.

pub mod audit;
pub mod console;
pub mod impersonation;

pub use audit::{AdminAudit, AdminAuditLog, AuditEntry};
pub use console::{
    OperatorConsole, OperatorDashboard, Page, TenantDetail, TenantListQuery, TenantScore,
    TenantSort, TenantSummaryRow,
};
pub use impersonation::{ImpersonationBroker, ImpersonationGrant};
