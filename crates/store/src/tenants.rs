//! Platform-owned tenant registry. Rows are keyed by the canonical
//! stringified sequential id; name, domain, and idempotency token are
//! unique. Status transitions go through the lifecycle manager, which uses
//! the version counter for optimistic concurrency.

use chrono::{DateTime, Utc};
use crewhq_core::error::{PlatformError, PlatformResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

/// Tenant lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Provisioning,
    ProvisioningFailed,
    Active,
    Suspended,
    Cancelled,
    PendingDeletion,
    Deleted,
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Provisioning => "provisioning",
            Self::ProvisioningFailed => "provisioning_failed",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::PendingDeletion => "pending_deletion",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// A tenant organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Stable integer identity.
    pub id: i64,
    /// Canonical stringified id carried by every scoped row.
    pub tenant_id: String,
    pub name: String,
    pub domain: Option<String>,
    pub status: TenantStatus,
    pub admin_email: String,
    pub admin_name: Option<String>,
    /// External customer ids per billing provider.
    pub external_customer_ids: HashMap<String, String>,
    pub subscription_active: bool,
    /// Denormalized from the active plan.
    pub max_employees: u32,
    pub failure_reason: Option<String>,
    pub idempotency_token: String,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped on every write.
    pub version: u64,
}

/// Registry of all tenants, keyed by canonical id.
pub struct TenantRegistry {
    rows: DashMap<String, Tenant>,
    next_id: AtomicI64,
    /// Serializes create() so uniqueness checks and insert are atomic.
    create_lock: Mutex<()>,
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicI64::new(1),
            create_lock: Mutex::new(()),
        }
    }

    /// Create a tenant in `Provisioning`. Name, domain, and idempotency
    /// token must all be unused.
    pub fn create(
        &self,
        name: &str,
        domain: Option<&str>,
        admin_email: &str,
        idempotency_token: &str,
    ) -> PlatformResult<Tenant> {
        if name.trim().is_empty() {
            return Err(PlatformError::Validation("Tenant name is required".into()));
        }
        if admin_email.trim().is_empty() || !admin_email.contains('@') {
            return Err(PlatformError::Validation("Valid admin email is required".into()));
        }

        let _guard = self.create_lock.lock();

        if self.find_by_name(name).is_some() {
            return Err(PlatformError::Conflict(format!(
                "Tenant name already in use: {name}"
            )));
        }
        if let Some(d) = domain {
            if self.find_by_domain(d).is_some() {
                return Err(PlatformError::Conflict(format!(
                    "Tenant domain already in use: {d}"
                )));
            }
        }
        if self.find_by_idempotency_token(idempotency_token).is_some() {
            return Err(PlatformError::Conflict(format!(
                "Idempotency token already used: {idempotency_token}"
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let tenant = Tenant {
            id,
            tenant_id: id.to_string(),
            name: name.to_string(),
            domain: domain.map(str::to_string),
            status: TenantStatus::Provisioning,
            admin_email: admin_email.to_string(),
            admin_name: None,
            external_customer_ids: HashMap::new(),
            subscription_active: false,
            max_employees: 0,
            failure_reason: None,
            idempotency_token: idempotency_token.to_string(),
            provisioned_at: None,
            activated_at: None,
            suspended_at: None,
            grace_period_ends_at: None,
            cancelled_at: None,
            scheduled_deletion_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        info!(tenant_id = %tenant.tenant_id, name = %tenant.name, "Tenant created");
        self.rows.insert(tenant.tenant_id.clone(), tenant.clone());
        Ok(tenant)
    }

    pub fn get(&self, tenant_id: &str) -> Option<Tenant> {
        self.rows.get(tenant_id).map(|e| e.value().clone())
    }

    pub fn require(&self, tenant_id: &str) -> PlatformResult<Tenant> {
        self.get(tenant_id)
            .ok_or_else(|| PlatformError::TenantNotFound(tenant_id.to_string()))
    }

    pub fn exists(&self, tenant_id: &str) -> bool {
        self.rows.contains_key(tenant_id)
    }

    pub fn list(&self) -> Vec<Tenant> {
        self.rows.iter().map(|e| e.value().clone()).collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Tenant> {
        self.rows
            .iter()
            .find(|e| e.value().name.eq_ignore_ascii_case(name))
            .map(|e| e.value().clone())
    }

    pub fn find_by_domain(&self, domain: &str) -> Option<Tenant> {
        self.rows
            .iter()
            .find(|e| {
                e.value()
                    .domain
                    .as_deref()
                    .map(|d| d.eq_ignore_ascii_case(domain))
                    .unwrap_or(false)
            })
            .map(|e| e.value().clone())
    }

    pub fn find_by_idempotency_token(&self, token: &str) -> Option<Tenant> {
        self.rows
            .iter()
            .find(|e| e.value().idempotency_token == token)
            .map(|e| e.value().clone())
    }

    pub fn find_by_external_customer(&self, provider: &str, customer_id: &str) -> Option<Tenant> {
        self.rows
            .iter()
            .find(|e| {
                e.value()
                    .external_customer_ids
                    .get(provider)
                    .map(|c| c == customer_id)
                    .unwrap_or(false)
            })
            .map(|e| e.value().clone())
    }

    /// Apply a mutation when the caller's snapshot is current. Returns
    /// `Conflict` when the version moved, so the caller can re-read and
    /// retry the transition.
    pub fn update_versioned<F>(
        &self,
        tenant_id: &str,
        expected_version: u64,
        mutate: F,
    ) -> PlatformResult<Tenant>
    where
        F: FnOnce(&mut Tenant),
    {
        let mut entry = self
            .rows
            .get_mut(tenant_id)
            .ok_or_else(|| PlatformError::TenantNotFound(tenant_id.to_string()))?;
        let tenant = entry.value_mut();
        if tenant.version != expected_version {
            return Err(PlatformError::Conflict(format!(
                "Tenant {tenant_id} was modified concurrently"
            )));
        }
        mutate(tenant);
        tenant.version += 1;
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    /// Apply a mutation unconditionally (non-status bookkeeping fields).
    pub fn mutate<F>(&self, tenant_id: &str, mutate: F) -> PlatformResult<Tenant>
    where
        F: FnOnce(&mut Tenant),
    {
        let mut entry = self
            .rows
            .get_mut(tenant_id)
            .ok_or_else(|| PlatformError::TenantNotFound(tenant_id.to_string()))?;
        let tenant = entry.value_mut();
        mutate(tenant);
        tenant.version += 1;
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_string_ids() {
        let registry = TenantRegistry::new();
        let a = registry
            .create("Acme", Some("acme.test"), "a@acme.test", "tok-1")
            .unwrap();
        let b = registry.create("Globex", None, "b@globex.test", "tok-2").unwrap();
        assert_eq!(a.tenant_id, "1");
        assert_eq!(b.tenant_id, "2");
        assert_eq!(a.status, TenantStatus::Provisioning);
    }

    #[test]
    fn test_uniqueness() {
        let registry = TenantRegistry::new();
        registry
            .create("Acme", Some("acme.test"), "a@acme.test", "tok-1")
            .unwrap();

        assert!(matches!(
            registry.create("acme", None, "x@y.test", "tok-2"),
            Err(PlatformError::Conflict(_))
        ));
        assert!(matches!(
            registry.create("Other", Some("ACME.test"), "x@y.test", "tok-3"),
            Err(PlatformError::Conflict(_))
        ));
        assert!(matches!(
            registry.create("Third", None, "x@y.test", "tok-1"),
            Err(PlatformError::Conflict(_))
        ));
    }

    #[test]
    fn test_versioned_update_conflict() {
        let registry = TenantRegistry::new();
        let t = registry
            .create("Acme", None, "a@acme.test", "tok-1")
            .unwrap();

        let updated = registry
            .update_versioned(&t.tenant_id, t.version, |row| {
                row.status = TenantStatus::Active;
            })
            .unwrap();
        assert_eq!(updated.version, t.version + 1);

        // Stale snapshot is refused.
        assert!(matches!(
            registry.update_versioned(&t.tenant_id, t.version, |row| {
                row.status = TenantStatus::Suspended;
            }),
            Err(PlatformError::Conflict(_))
        ));
    }

    #[test]
    fn test_external_customer_lookup() {
        let registry = TenantRegistry::new();
        let t = registry
            .create("Acme", None, "a@acme.test", "tok-1")
            .unwrap();
        registry
            .mutate(&t.tenant_id, |row| {
                row.external_customer_ids
                    .insert("stripe".into(), "cus_123".into());
            })
            .unwrap();

        let found = registry.find_by_external_customer("stripe", "cus_123").unwrap();
        assert_eq!(found.tenant_id, t.tenant_id);
        assert!(registry.find_by_external_customer("stripe", "cus_999").is_none());
    }
}
