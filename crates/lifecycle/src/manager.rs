//! Lifecycle manager: drives the tenant status state machine. Every status
//! change appends a lifecycle event; the two writes happen under one lock so
//! the log never disagrees with the row.

use crate::events::{EventLog, LifecycleEvent, LifecycleEventType};
use crate::state::transition_allowed;
use chrono::{Duration, Utc};
use crewhq_alerts::{AlertHub, AlertSeverity, AlertType};
use crewhq_catalog::{EntitlementService, PlanCatalog, Subscription, SubscriptionBook};
use crewhq_core::config::PlatformConfig;
use crewhq_core::error::{PlatformError, PlatformResult};
use crewhq_core::mailer::{Mailer, OutboundEmail};
use crewhq_store::{Database, Tenant, TenantStatus};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Engines holding tenant-keyed rows outside the platform store register a
/// purge hook so hard deletion removes their data too.
pub trait TenantDataPurge: Send + Sync {
    fn name(&self) -> &'static str;
    fn purge_tenant(&self, tenant_id: &str) -> usize;
}

/// Signup input. The idempotency token collapses duplicate requests.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub tenant_name: String,
    pub domain: Option<String>,
    pub admin_email: String,
    pub admin_name: Option<String>,
    pub idempotency_token: String,
}

pub struct LifecycleManager {
    pub(crate) db: Arc<Database>,
    pub(crate) catalog: Arc<PlanCatalog>,
    pub(crate) book: Arc<SubscriptionBook>,
    pub(crate) entitlements: Arc<EntitlementService>,
    pub(crate) alerts: Arc<AlertHub>,
    pub(crate) events: Arc<EventLog>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) config: Arc<PlatformConfig>,
    purge_hooks: Mutex<Vec<Arc<dyn TenantDataPurge>>>,
    /// Serializes status transitions so the row update and the event append
    /// are atomic with respect to each other.
    transition_lock: Mutex<()>,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        catalog: Arc<PlanCatalog>,
        book: Arc<SubscriptionBook>,
        entitlements: Arc<EntitlementService>,
        alerts: Arc<AlertHub>,
        events: Arc<EventLog>,
        mailer: Arc<dyn Mailer>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        Self {
            db,
            catalog,
            book,
            entitlements,
            alerts,
            events,
            mailer,
            config,
            purge_hooks: Mutex::new(Vec::new()),
            transition_lock: Mutex::new(()),
        }
    }

    pub fn register_purge_hook(&self, hook: Arc<dyn TenantDataPurge>) {
        self.purge_hooks.lock().push(hook);
    }

    pub fn entitlements(&self) -> &EntitlementService {
        &self.entitlements
    }

    pub fn event_log(&self) -> &EventLog {
        &self.events
    }

    // ─── Signup & provisioning ─────────────────────────────────────────────

    /// Create a tenant in `Provisioning`. A repeated call with the same
    /// idempotency token returns the existing tenant; a duplicate name or
    /// domain is a conflict.
    pub fn signup(&self, req: &SignupRequest) -> PlatformResult<Tenant> {
        if let Some(existing) = self
            .db
            .tenants
            .find_by_idempotency_token(&req.idempotency_token)
        {
            info!(
                tenant_id = %existing.tenant_id,
                token = %req.idempotency_token,
                "Signup replay, returning existing tenant"
            );
            return Ok(existing);
        }

        let mut tenant = self.db.tenants.create(
            &req.tenant_name,
            req.domain.as_deref(),
            &req.admin_email,
            &req.idempotency_token,
        )?;
        if let Some(name) = &req.admin_name {
            tenant = self.db.tenants.mutate(&tenant.tenant_id, |row| {
                row.admin_name = Some(name.clone());
            })?;
        }
        self.append_event(
            &tenant.tenant_id,
            LifecycleEventType::Created,
            None,
            Some(TenantStatus::Provisioning),
            None,
            "signup",
            serde_json::json!({ "name": tenant.name, "domain": tenant.domain }),
        );
        Ok(tenant)
    }

    /// Run the provisioning workflow for a tenant in `Provisioning`. Safe to
    /// re-run after a crash: each step skips work that already exists. On a
    /// fatal step the tenant moves to `ProvisioningFailed` with the reason
    /// and partial data is kept for an operator retry.
    pub fn provision(&self, tenant_id: &str) -> PlatformResult<Tenant> {
        let tenant = self.db.tenants.require(tenant_id)?;
        match tenant.status {
            TenantStatus::Provisioning => {}
            TenantStatus::Active => return Ok(tenant),
            other => {
                return Err(PlatformError::InvalidTransition {
                    from: other.to_string(),
                    to: TenantStatus::Active.to_string(),
                })
            }
        }

        match self.run_provisioning_steps(&tenant) {
            Ok(max_employees) => self.transition(
                tenant_id,
                TenantStatus::Active,
                LifecycleEventType::ProvisioningCompleted,
                None,
                "provisioning",
                serde_json::json!({}),
                |row| {
                    let now = Utc::now();
                    row.provisioned_at = Some(now);
                    row.activated_at = Some(now);
                    row.subscription_active = true;
                    row.max_employees = max_employees;
                    row.failure_reason = None;
                },
            ),
            Err(e) => {
                error!(tenant_id = %tenant_id, error = %e, "Provisioning failed");
                let reason = e.to_string();
                self.transition(
                    tenant_id,
                    TenantStatus::ProvisioningFailed,
                    LifecycleEventType::ProvisioningFailed,
                    Some(reason.clone()),
                    "provisioning",
                    serde_json::json!({}),
                    |row| row.failure_reason = Some(reason.clone()),
                )?;
                Err(e)
            }
        }
    }

    /// Operator retry: move a failed tenant back to `Provisioning` and run
    /// the workflow again over the kept partial data.
    pub fn retry_provisioning(&self, tenant_id: &str, triggered_by: &str) -> PlatformResult<Tenant> {
        self.transition(
            tenant_id,
            TenantStatus::Provisioning,
            LifecycleEventType::Created,
            Some("provisioning retry".into()),
            triggered_by,
            serde_json::json!({}),
            |row| row.failure_reason = None,
        )?;
        self.provision(tenant_id)
    }

    // ─── Suspension / resume ───────────────────────────────────────────────

    /// Suspend an active tenant: start the grace window, raise a Suspension
    /// alert, and notify the tenant admin.
    pub fn suspend(
        &self,
        tenant_id: &str,
        reason: &str,
        triggered_by: &str,
    ) -> PlatformResult<Tenant> {
        let grace_days = self.config.lifecycle.grace_period_days;
        let updated = self.transition(
            tenant_id,
            TenantStatus::Suspended,
            LifecycleEventType::Suspended,
            Some(reason.to_string()),
            triggered_by,
            serde_json::json!({ "grace_days": grace_days }),
            |row| {
                let now = Utc::now();
                row.suspended_at = Some(now);
                row.grace_period_ends_at = Some(now + Duration::days(grace_days));
                row.subscription_active = false;
            },
        )?;

        self.alerts.raise(
            tenant_id,
            self.book.active_for_tenant(tenant_id).map(|s| s.id),
            AlertType::Suspension,
            None,
            AlertSeverity::High,
            &format!("Tenant {} suspended: {reason}", updated.name),
            serde_json::json!({ "triggered_by": triggered_by }),
        );
        self.mailer.send(OutboundEmail {
            to: updated.admin_email.clone(),
            subject: format!("{} account suspended", updated.name),
            body: format!(
                "Your account was suspended: {reason}. Self-service recovery is available until {}.",
                updated
                    .grace_period_ends_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            ),
        });
        self.entitlements.invalidate(tenant_id);
        Ok(updated)
    }

    /// Resume a suspended tenant. Payment recovery and tenant self-service
    /// must land inside the grace window; an operator resume (`forced`)
    /// works at any time.
    pub fn resume(
        &self,
        tenant_id: &str,
        triggered_by: &str,
        forced: bool,
    ) -> PlatformResult<Tenant> {
        let tenant = self.db.tenants.require(tenant_id)?;
        if !forced {
            let grace_elapsed = tenant
                .grace_period_ends_at
                .map(|t| t < Utc::now())
                .unwrap_or(false);
            if grace_elapsed {
                return Err(PlatformError::Conflict(
                    "Grace period elapsed; operator resume required".into(),
                ));
            }
        }

        let updated = self.transition(
            tenant_id,
            TenantStatus::Active,
            LifecycleEventType::Resumed,
            None,
            triggered_by,
            serde_json::json!({ "forced": forced }),
            |row| {
                row.suspended_at = None;
                row.grace_period_ends_at = None;
                row.subscription_active = true;
            },
        )?;
        self.alerts
            .resolve_matching(tenant_id, AlertType::Suspension, None);
        self.entitlements.invalidate(tenant_id);
        Ok(updated)
    }

    // ─── Cancellation / deletion ───────────────────────────────────────────

    /// Cancel a tenant and schedule hard deletion after the retention
    /// window. The export bundle stays retrievable until then.
    pub fn cancel(
        &self,
        tenant_id: &str,
        reason: &str,
        triggered_by: &str,
    ) -> PlatformResult<Tenant> {
        let retention_days = self.config.lifecycle.deletion_retention_days.max(1);
        let updated = self.transition(
            tenant_id,
            TenantStatus::Cancelled,
            LifecycleEventType::Cancelled,
            Some(reason.to_string()),
            triggered_by,
            serde_json::json!({ "retention_days": retention_days }),
            |row| {
                let now = Utc::now();
                row.cancelled_at = Some(now);
                row.scheduled_deletion_at = Some(now + Duration::days(retention_days));
                row.subscription_active = false;
            },
        )?;
        self.book.cancel_for_tenant(tenant_id);
        self.entitlements.invalidate(tenant_id);
        Ok(updated)
    }

    /// `Cancelled -> PendingDeletion` once the retention window opens.
    pub fn mark_for_deletion(&self, tenant_id: &str, triggered_by: &str) -> PlatformResult<Tenant> {
        self.transition(
            tenant_id,
            TenantStatus::PendingDeletion,
            LifecycleEventType::MarkedForDeletion,
            None,
            triggered_by,
            serde_json::json!({}),
            |_| {},
        )
    }

    /// Hard-delete all tenant-scoped rows. The registry row is kept as
    /// `Deleted` so the id is never reused. Returns rows removed.
    pub fn delete(&self, tenant_id: &str, triggered_by: &str) -> PlatformResult<usize> {
        self.transition(
            tenant_id,
            TenantStatus::Deleted,
            LifecycleEventType::Deleted,
            None,
            triggered_by,
            serde_json::json!({}),
            |_| {},
        )?;

        // Child tables first, then users, then engine-registered stores.
        let mut removed = self.db.purge_tenant(tenant_id).total();
        for hook in self.purge_hooks.lock().iter() {
            let n = hook.purge_tenant(tenant_id);
            info!(tenant_id = %tenant_id, store = hook.name(), rows = n, "Purged tenant rows");
            removed += n;
        }
        Ok(removed)
    }

    // ─── Plan changes ──────────────────────────────────────────────────────

    /// Switch the tenant to another plan: subscription and the denormalized
    /// employee cap move together, an Upgraded/Downgraded event is recorded
    /// (direction from the monthly price), and the admin is notified.
    pub fn change_plan(
        &self,
        tenant_id: &str,
        new_tier: &str,
        triggered_by: &str,
    ) -> PlatformResult<Subscription> {
        let tenant = self.db.tenants.require(tenant_id)?;
        let current = self.book.active_for_tenant(tenant_id).ok_or_else(|| {
            PlatformError::SubscriptionInactive(tenant_id.to_string())
        })?;
        let old_price = current.price_snapshot;
        let new_plan = self
            .catalog
            .find_by_tier(new_tier)
            .ok_or_else(|| PlatformError::NotFound(format!("plan tier {new_tier}")))?;

        let updated = self.book.switch_plan(tenant_id, &new_plan)?;
        self.db.tenants.mutate(tenant_id, |row| {
            row.max_employees = new_plan.max_employees;
        })?;

        let event_type = if new_plan.monthly_price >= old_price {
            LifecycleEventType::Upgraded
        } else {
            LifecycleEventType::Downgraded
        };
        self.append_event(
            tenant_id,
            event_type,
            None,
            None,
            None,
            triggered_by,
            serde_json::json!({
                "old_price": old_price,
                "new_price": new_plan.monthly_price,
                "new_tier": new_plan.tier,
            }),
        );

        self.mailer.send(OutboundEmail {
            to: tenant.admin_email,
            subject: format!("{} plan changed to {}", tenant.name, new_plan.name),
            body: format!(
                "Your subscription is now on the {} plan ({} {}/month).",
                new_plan.name, new_plan.monthly_price, new_plan.currency
            ),
        });
        self.entitlements.invalidate(tenant_id);
        Ok(updated)
    }

    /// Supplementary event with no status change (payment failures, etc.).
    pub fn record_event(
        &self,
        tenant_id: &str,
        event_type: LifecycleEventType,
        reason: Option<String>,
        triggered_by: &str,
        metadata: serde_json::Value,
    ) {
        self.append_event(tenant_id, event_type, None, None, reason, triggered_by, metadata);
    }

    // ─── Internals ─────────────────────────────────────────────────────────

    /// Apply a status transition with its lifecycle event. Validates the
    /// transition table, retries on version conflicts, and holds the
    /// transition lock across row update and event append.
    fn transition<F>(
        &self,
        tenant_id: &str,
        to: TenantStatus,
        event_type: LifecycleEventType,
        reason: Option<String>,
        triggered_by: &str,
        metadata: serde_json::Value,
        mutate_extra: F,
    ) -> PlatformResult<Tenant>
    where
        F: Fn(&mut Tenant),
    {
        let _guard = self.transition_lock.lock();

        for attempt in 0..self.config.lifecycle.transition_retries.max(1) {
            let tenant = self.db.tenants.require(tenant_id)?;
            let from = tenant.status;
            if !transition_allowed(from, to) {
                return Err(PlatformError::InvalidTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }

            match self
                .db
                .tenants
                .update_versioned(tenant_id, tenant.version, |row| {
                    row.status = to;
                    mutate_extra(row);
                }) {
                Ok(updated) => {
                    self.append_event(
                        tenant_id,
                        event_type,
                        Some(from),
                        Some(to),
                        reason.clone(),
                        triggered_by,
                        metadata.clone(),
                    );
                    info!(
                        tenant_id = %tenant_id,
                        from = %from,
                        to = %to,
                        "Tenant status changed"
                    );
                    return Ok(updated);
                }
                Err(PlatformError::Conflict(_)) => {
                    warn!(
                        tenant_id = %tenant_id,
                        attempt,
                        "Version conflict during transition, retrying"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(PlatformError::Transient(format!(
            "Transition retries exhausted for tenant {tenant_id}"
        )))
    }

    #[allow(clippy::too_many_arguments)]
    fn append_event(
        &self,
        tenant_id: &str,
        event_type: LifecycleEventType,
        previous_status: Option<TenantStatus>,
        new_status: Option<TenantStatus>,
        reason: Option<String>,
        triggered_by: &str,
        metadata: serde_json::Value,
    ) {
        self.events.append(LifecycleEvent {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            event_type,
            previous_status,
            new_status,
            reason,
            triggered_by: triggered_by.to_string(),
            metadata,
            event_date: Utc::now(),
        });
    }
}
