//! Cached entitlement lookups: what plan a tenant is on, its caps, and its
//! feature map. Entries carry a TTL and an explicit per-tenant invalidate
//! hook invoked by lifecycle and catalog writes.

use crate::plans::PlanCatalog;
use crate::subscriptions::{SubscriptionBook, SubscriptionStatus};
use chrono::{DateTime, Duration, Utc};
use crewhq_core::error::{PlatformError, PlatformResult};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot of a tenant's plan-derived entitlements.
#[derive(Debug, Clone, Serialize)]
pub struct TenantEntitlements {
    pub tenant_id: String,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub tier: String,
    pub subscription_status: SubscriptionStatus,
    pub max_employees: u32,
    pub max_users: Option<u32>,
    pub max_storage_bytes: Option<u64>,
    pub features: HashMap<String, String>,
    pub cached_at: DateTime<Utc>,
}

impl TenantEntitlements {
    /// True iff the subscription entitles and the feature value is truthy.
    pub fn has_feature(&self, key: &str) -> bool {
        if !self.subscription_status.entitles() {
            return false;
        }
        self.features
            .get(key)
            .map(|v| !matches!(v.trim(), "" | "0" | "false"))
            .unwrap_or(false)
    }
}

/// TTL-cached entitlement service over the catalog and subscription book.
pub struct EntitlementService {
    catalog: Arc<PlanCatalog>,
    book: Arc<SubscriptionBook>,
    cache: DashMap<String, TenantEntitlements>,
    ttl: Duration,
}

impl EntitlementService {
    pub fn new(catalog: Arc<PlanCatalog>, book: Arc<SubscriptionBook>, ttl_secs: i64) -> Self {
        Self {
            catalog,
            book,
            cache: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Current entitlements for a tenant, from cache when fresh.
    pub fn snapshot(&self, tenant_id: &str) -> PlatformResult<TenantEntitlements> {
        if let Some(cached) = self.cache.get(tenant_id) {
            if Utc::now() - cached.cached_at < self.ttl {
                return Ok(cached.value().clone());
            }
        }

        let sub = self.book.active_for_tenant(tenant_id).ok_or_else(|| {
            PlatformError::SubscriptionInactive(tenant_id.to_string())
        })?;
        let plan = self
            .catalog
            .get(sub.plan_id)
            .ok_or_else(|| PlatformError::NotFound(format!("plan {}", sub.plan_id)))?;

        let snapshot = TenantEntitlements {
            tenant_id: tenant_id.to_string(),
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            tier: plan.tier.clone(),
            subscription_status: sub.status,
            max_employees: plan.max_employees,
            max_users: plan.max_users,
            max_storage_bytes: plan.max_storage_bytes,
            features: plan
                .features
                .iter()
                .map(|f| (f.key.clone(), f.value.clone()))
                .collect(),
            cached_at: Utc::now(),
        };
        self.cache
            .insert(tenant_id.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub fn has_feature(&self, tenant_id: &str, key: &str) -> bool {
        self.snapshot(tenant_id)
            .map(|s| s.has_feature(key))
            .unwrap_or(false)
    }

    pub fn feature_value(&self, tenant_id: &str, key: &str) -> Option<String> {
        self.snapshot(tenant_id)
            .ok()
            .and_then(|s| s.features.get(key).cloned())
    }

    /// Drop the cached snapshot for one tenant. Invoked on every
    /// subscription or plan write affecting it.
    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.remove(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (Arc<PlanCatalog>, Arc<SubscriptionBook>, EntitlementService) {
        let catalog = Arc::new(PlanCatalog::new());
        catalog.seed_default_plans();
        let book = Arc::new(SubscriptionBook::new());
        let service = EntitlementService::new(catalog.clone(), book.clone(), 60);
        (catalog, book, service)
    }

    #[test]
    fn test_snapshot_and_features() {
        let (catalog, book, service) = service();
        let growth = catalog.find_by_tier("growth").unwrap();
        book.subscribe("1", &growth, false).unwrap();

        let snap = service.snapshot("1").unwrap();
        assert_eq!(snap.tier, "growth");
        assert_eq!(snap.max_employees, 500);
        assert!(service.has_feature("1", "payroll_export"));
        assert!(!service.has_feature("1", "sso"));
    }

    #[test]
    fn test_no_subscription_means_inactive() {
        let (_, _, service) = service();
        assert!(matches!(
            service.snapshot("9").unwrap_err(),
            PlatformError::SubscriptionInactive(_)
        ));
        assert!(!service.has_feature("9", "employee_directory"));
    }

    #[test]
    fn test_canceled_subscription_drops_features() {
        let (catalog, book, service) = service();
        let free = catalog.find_by_tier("free").unwrap();
        book.subscribe("1", &free, false).unwrap();
        assert!(service.has_feature("1", "employee_directory"));

        book.cancel_for_tenant("1").unwrap();
        service.invalidate("1");
        assert!(!service.has_feature("1", "employee_directory"));
    }

    #[test]
    fn test_invalidate_refreshes_plan_change() {
        let (catalog, book, service) = service();
        let free = catalog.find_by_tier("free").unwrap();
        let growth = catalog.find_by_tier("growth").unwrap();
        book.subscribe("1", &free, false).unwrap();
        assert_eq!(service.snapshot("1").unwrap().tier, "free");

        book.switch_plan("1", &growth).unwrap();
        // Stale until invalidated (TTL not yet elapsed).
        assert_eq!(service.snapshot("1").unwrap().tier, "free");
        service.invalidate("1");
        assert_eq!(service.snapshot("1").unwrap().tier, "growth");
    }
}
