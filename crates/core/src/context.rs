//! Per-request tenant context and resolution.
//!
//! Every request resolves exactly one tenant id before any handler runs. The
//! context is an immutable value carried alongside the request (never a
//! process-wide singleton); background workers construct their own.

use crate::error::{PlatformError, PlatformResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant id used for platform scope (signup, operator endpoints).
pub const PLATFORM_TENANT: &str = "default";

/// Role names seeded into the global role catalog.
pub const ROLE_SUPER_ADMIN: &str = "SuperAdmin";
pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_HR: &str = "HR";
pub const ROLE_EMPLOYEE: &str = "Employee";

/// Subdomains that never resolve to a tenant.
const RESERVED_SUBDOMAINS: [&str; 4] = ["www", "api", "app", "admin"];

/// Where the tenant id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Claims,
    Subdomain,
    HeaderId,
    HeaderDomain,
    Impersonation,
    Platform,
}

/// Operator identity stamped onto an impersonated context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonationStamp {
    pub grant_id: Uuid,
    pub operator_id: Uuid,
    pub operator_email: String,
    pub expires_at: DateTime<Utc>,
}

/// Immutable per-request tenant identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
    pub source: ResolutionSource,
    /// SuperAdmin opt-out flag consulted by the data access layer on
    /// explicit cross-tenant reads.
    pub bypass_filter: bool,
    pub actor_user_id: Option<Uuid>,
    pub actor_email: Option<String>,
    pub role: Option<String>,
    pub impersonation: Option<ImpersonationStamp>,
}

impl TenantContext {
    /// Context for a resolved tenant acting as itself.
    pub fn for_tenant(tenant_id: impl Into<String>, source: ResolutionSource) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source,
            bypass_filter: false,
            actor_user_id: None,
            actor_email: None,
            role: None,
            impersonation: None,
        }
    }

    /// Platform ("default") scope, used for signup and operator endpoints.
    pub fn platform() -> Self {
        Self::for_tenant(PLATFORM_TENANT, ResolutionSource::Platform)
    }

    /// Context a background worker uses when acting inside one tenant.
    pub fn worker(tenant_id: impl Into<String>) -> Self {
        Self::for_tenant(tenant_id, ResolutionSource::Platform)
    }

    pub fn with_actor(mut self, user_id: Uuid, email: impl Into<String>, role: impl Into<String>) -> Self {
        self.actor_user_id = Some(user_id);
        self.actor_email = Some(email.into());
        let role = role.into();
        self.bypass_filter = role == ROLE_SUPER_ADMIN;
        self.role = Some(role);
        self
    }

    pub fn is_super_admin(&self) -> bool {
        self.role.as_deref() == Some(ROLE_SUPER_ADMIN)
    }

    pub fn is_impersonated(&self) -> bool {
        self.impersonation.is_some()
    }
}

/// Raw resolution inputs pulled off a request before routing.
#[derive(Debug, Default, Clone)]
pub struct ResolutionInputs<'a> {
    /// Tenant claim from the authenticated principal, if any.
    pub claim_tenant: Option<&'a str>,
    /// The request `Host` header (may carry a port).
    pub host: Option<&'a str>,
    pub header_tenant_id: Option<&'a str>,
    pub header_tenant_domain: Option<&'a str>,
}

/// Resolve the tenant id for a request. `domain_lookup` maps an
/// `X-Tenant-Domain` value to a tenant id through the tenant registry.
///
/// Priority: claims, then subdomain, then `X-Tenant-Id`, then
/// `X-Tenant-Domain`, then the platform scope. When the principal's claim
/// and the subdomain or id header disagree, resolution fails with
/// `TenantMismatch` rather than trusting either side.
pub fn resolve_tenant<F>(
    inputs: &ResolutionInputs<'_>,
    domain_lookup: F,
) -> PlatformResult<(String, ResolutionSource)>
where
    F: Fn(&str) -> Option<String>,
{
    let subdomain = inputs.host.and_then(tenant_subdomain);
    let header_id = inputs
        .header_tenant_id
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(claim) = inputs.claim_tenant.filter(|c| !c.is_empty()) {
        let conflicting = subdomain
            .as_deref()
            .filter(|s| *s != claim)
            .or(header_id.filter(|h| *h != claim));
        if conflicting.is_some() {
            return Err(PlatformError::TenantMismatch);
        }
        return Ok((claim.to_string(), ResolutionSource::Claims));
    }

    if let Some(sub) = subdomain {
        return Ok((sub, ResolutionSource::Subdomain));
    }

    if let Some(id) = header_id {
        return Ok((id.to_string(), ResolutionSource::HeaderId));
    }

    if let Some(domain) = inputs
        .header_tenant_domain
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return match domain_lookup(domain) {
            Some(id) => Ok((id, ResolutionSource::HeaderDomain)),
            None => Err(PlatformError::TenantNotFound(domain.to_string())),
        };
    }

    Ok((PLATFORM_TENANT.to_string(), ResolutionSource::Platform))
}

/// Extract a usable tenant subdomain from a host header.
///
/// The label must match `^[a-z0-9][a-z0-9-]*$`, must not be reserved, and
/// the host must have at least three labels (so `crewhq.io` itself and
/// `localhost` never resolve).
pub fn tenant_subdomain(host: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    if host == "localhost" {
        return None;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    let sub = labels[0];
    if RESERVED_SUBDOMAINS.contains(&sub) {
        return None;
    }
    let mut chars = sub.chars();
    let valid_first = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    if !valid_first || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return None;
    }
    Some(sub.to_string())
}
