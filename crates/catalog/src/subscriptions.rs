//! Per-tenant subscription records. At most one non-terminal subscription
//! per tenant; provider webhooks upsert by external id.

use crate::plans::SubscriptionPlan;
use chrono::{DateTime, Duration, Utc};
use crewhq_core::error::{PlatformError, PlatformResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Subscription lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Expired,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl SubscriptionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Expired)
    }

    /// Whether this status grants plan entitlements.
    pub fn entitles(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

/// A tenant's subscription to a plan at a billing period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: String,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub provider: Option<String>,
    pub external_subscription_id: Option<String>,
    /// Monthly price at the time of binding.
    pub price_snapshot: f64,
    pub currency: String,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// All subscriptions, with the one-active-per-tenant invariant.
pub struct SubscriptionBook {
    rows: DashMap<Uuid, Subscription>,
    create_lock: Mutex<()>,
}

impl Default for SubscriptionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionBook {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Bind a tenant to a plan. Fails with `Conflict` when a non-terminal
    /// subscription already exists.
    pub fn subscribe(
        &self,
        tenant_id: &str,
        plan: &SubscriptionPlan,
        start_trial: bool,
    ) -> PlatformResult<Subscription> {
        let _guard = self.create_lock.lock();
        if self.active_for_tenant(tenant_id).is_some() {
            return Err(PlatformError::Conflict(format!(
                "Tenant {tenant_id} already has an active subscription"
            )));
        }

        let now = Utc::now();
        let trial_ends_at = if start_trial {
            plan.trial_days
                .filter(|d| *d > 0)
                .map(|d| now + Duration::days(d as i64))
        } else {
            None
        };
        let sub = Subscription {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            plan_id: plan.id,
            status: if trial_ends_at.is_some() {
                SubscriptionStatus::Trialing
            } else {
                SubscriptionStatus::Active
            },
            provider: None,
            external_subscription_id: None,
            price_snapshot: plan.monthly_price,
            currency: plan.currency.clone(),
            current_period_start: now,
            current_period_end: now + Duration::days(30),
            trial_ends_at,
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };
        info!(
            tenant_id = %tenant_id,
            plan = %plan.name,
            status = ?sub.status,
            "Subscription created"
        );
        self.rows.insert(sub.id, sub.clone());
        Ok(sub)
    }

    pub fn get(&self, id: Uuid) -> Option<Subscription> {
        self.rows.get(&id).map(|e| e.value().clone())
    }

    /// The tenant's single non-terminal subscription, if any.
    pub fn active_for_tenant(&self, tenant_id: &str) -> Option<Subscription> {
        self.rows
            .iter()
            .find(|e| e.value().tenant_id == tenant_id && !e.value().status.is_terminal())
            .map(|e| e.value().clone())
    }

    pub fn find_by_external_id(&self, provider: &str, external_id: &str) -> Option<Subscription> {
        self.rows
            .iter()
            .find(|e| {
                e.value().provider.as_deref() == Some(provider)
                    && e.value().external_subscription_id.as_deref() == Some(external_id)
            })
            .map(|e| e.value().clone())
    }

    /// Full history for a tenant, most recent first.
    pub fn history_for_tenant(&self, tenant_id: &str) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .rows
            .iter()
            .filter(|e| e.value().tenant_id == tenant_id)
            .map(|e| e.value().clone())
            .collect();
        subs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        subs
    }

    pub fn set_status(&self, id: Uuid, status: SubscriptionStatus) -> PlatformResult<Subscription> {
        self.mutate(id, |sub| sub.status = status)
    }

    /// Point the active subscription at a new plan, snapshotting its price.
    pub fn switch_plan(
        &self,
        tenant_id: &str,
        new_plan: &SubscriptionPlan,
    ) -> PlatformResult<Subscription> {
        let current = self.active_for_tenant(tenant_id).ok_or_else(|| {
            PlatformError::NotFound(format!("active subscription for tenant {tenant_id}"))
        })?;
        self.mutate(current.id, |sub| {
            sub.plan_id = new_plan.id;
            sub.price_snapshot = new_plan.monthly_price;
            sub.currency = new_plan.currency.clone();
        })
    }

    /// Upsert from a billing provider event. Matches on external id first,
    /// then the tenant's active subscription, else creates a new record.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_external(
        &self,
        tenant_id: &str,
        plan: &SubscriptionPlan,
        provider: &str,
        external_id: &str,
        status: SubscriptionStatus,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> PlatformResult<Subscription> {
        if let Some(existing) = self.find_by_external_id(provider, external_id) {
            return self.mutate(existing.id, |sub| {
                sub.plan_id = plan.id;
                sub.status = status;
                sub.price_snapshot = plan.monthly_price;
                sub.current_period_start = period_start;
                sub.current_period_end = period_end;
            });
        }
        if let Some(existing) = self.active_for_tenant(tenant_id) {
            return self.mutate(existing.id, |sub| {
                sub.plan_id = plan.id;
                sub.status = status;
                sub.provider = Some(provider.to_string());
                sub.external_subscription_id = Some(external_id.to_string());
                sub.price_snapshot = plan.monthly_price;
                sub.current_period_start = period_start;
                sub.current_period_end = period_end;
            });
        }

        let now = Utc::now();
        let sub = Subscription {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            plan_id: plan.id,
            status,
            provider: Some(provider.to_string()),
            external_subscription_id: Some(external_id.to_string()),
            price_snapshot: plan.monthly_price,
            currency: plan.currency.clone(),
            current_period_start: period_start,
            current_period_end: period_end,
            trial_ends_at: None,
            auto_renew: true,
            created_at: now,
            updated_at: now,
        };
        self.rows.insert(sub.id, sub.clone());
        Ok(sub)
    }

    /// Cancel the tenant's active subscription, if any.
    pub fn cancel_for_tenant(&self, tenant_id: &str) -> Option<Subscription> {
        let current = self.active_for_tenant(tenant_id)?;
        self.mutate(current.id, |sub| {
            sub.status = SubscriptionStatus::Canceled;
            sub.auto_renew = false;
        })
        .ok()
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> PlatformResult<Subscription>
    where
        F: FnOnce(&mut Subscription),
    {
        let mut entry = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| PlatformError::NotFound(format!("subscription {id}")))?;
        let sub = entry.value_mut();
        f(sub);
        sub.updated_at = Utc::now();
        Ok(sub.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::PlanCatalog;

    fn catalog() -> PlanCatalog {
        let c = PlanCatalog::new();
        c.seed_default_plans();
        c
    }

    #[test]
    fn test_single_active_subscription() {
        let catalog = catalog();
        let book = SubscriptionBook::new();
        let free = catalog.find_by_tier("free").unwrap();

        book.subscribe("1", &free, false).unwrap();
        let err = book.subscribe("1", &free, false).unwrap_err();
        assert!(matches!(err, PlatformError::Conflict(_)));

        // After cancellation a new subscription is allowed.
        book.cancel_for_tenant("1").unwrap();
        book.subscribe("1", &free, false).unwrap();
        assert_eq!(book.history_for_tenant("1").len(), 2);
    }

    #[test]
    fn test_trial_window() {
        let catalog = catalog();
        let book = SubscriptionBook::new();
        let starter = catalog.find_by_tier("starter").unwrap();

        let sub = book.subscribe("1", &starter, true).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Trialing);
        assert!(sub.trial_ends_at.is_some());
        assert!(sub.status.entitles());
    }

    #[test]
    fn test_upsert_external_idempotent_by_external_id() {
        let catalog = catalog();
        let book = SubscriptionBook::new();
        let growth = catalog.find_by_tier("growth").unwrap();
        let now = Utc::now();

        let first = book
            .upsert_external("1", &growth, "stripe", "sub_123", SubscriptionStatus::Active, now, now + Duration::days(30))
            .unwrap();
        let second = book
            .upsert_external("1", &growth, "stripe", "sub_123", SubscriptionStatus::PastDue, now, now + Duration::days(30))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, SubscriptionStatus::PastDue);
        assert_eq!(book.history_for_tenant("1").len(), 1);
    }
}
