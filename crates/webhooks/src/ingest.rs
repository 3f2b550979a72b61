//! Webhook ledger and dispatcher.
//!
//! Contract: the raw payload is persisted before any processing and never
//! discarded; `(provider, external_event_id)` has at most one business
//! effect no matter how many deliveries arrive; `processed` flips only
//! after the effect commits.

use chrono::{DateTime, Duration, Utc};
use crewhq_alerts::{AlertHub, AlertSeverity, AlertType};
use crewhq_catalog::{PlanCatalog, SubscriptionBook, SubscriptionStatus};
use crewhq_core::config::PlatformConfig;
use crewhq_core::error::{PlatformError, PlatformResult};
use crewhq_lifecycle::{LifecycleEventType, LifecycleManager};
use crewhq_store::{Database, TenantStatus};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Durable record of one inbound provider callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub external_event_id: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
    /// Tenant reference parsed from the payload, when resolvable.
    pub tenant_id: Option<String>,
    pub subscription_external_id: Option<String>,
    pub signature_valid: bool,
    pub processed: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Retries exhausted; surfaced to the operator as an Error alert.
    pub abandoned: bool,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

type EventKey = (String, String);

/// Webhook ingestion engine.
pub struct WebhookIngestor {
    pub(crate) db: Arc<Database>,
    pub(crate) catalog: Arc<PlanCatalog>,
    pub(crate) book: Arc<SubscriptionBook>,
    pub(crate) lifecycle: Arc<LifecycleManager>,
    pub(crate) alerts: Arc<AlertHub>,
    pub(crate) config: Arc<PlatformConfig>,
    events: DashMap<EventKey, WebhookEvent>,
    /// Dispatch lock: at most one concurrent dispatch per event key.
    in_flight: DashMap<EventKey, ()>,
    /// Consecutive payment failures per tenant, reset on payment success.
    payment_failures: DashMap<String, u32>,
}

impl WebhookIngestor {
    pub fn new(
        db: Arc<Database>,
        catalog: Arc<PlanCatalog>,
        book: Arc<SubscriptionBook>,
        lifecycle: Arc<LifecycleManager>,
        alerts: Arc<AlertHub>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        info!("Webhook ingestor initialized");
        Self {
            db,
            catalog,
            book,
            lifecycle,
            alerts,
            config,
            events: DashMap::new(),
            in_flight: DashMap::new(),
            payment_failures: DashMap::new(),
        }
    }

    /// Receive one provider event. Persists first, deduplicates on
    /// `(provider, external_event_id)`, then attempts dispatch. A dispatch
    /// failure is recorded on the event for the retry worker and does not
    /// surface to the provider: once persisted, the answer is 200.
    pub fn ingest(
        &self,
        provider: &str,
        external_event_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        signature_valid: bool,
    ) -> PlatformResult<WebhookEvent> {
        if provider.trim().is_empty() || external_event_id.trim().is_empty() {
            return Err(PlatformError::Validation(
                "provider and event id are required".into(),
            ));
        }

        let key: EventKey = (provider.to_string(), external_event_id.to_string());

        // Persist before any processing.
        let event = self
            .events
            .entry(key.clone())
            .or_insert_with(|| WebhookEvent {
                id: Uuid::new_v4(),
                provider: provider.to_string(),
                external_event_id: external_event_id.to_string(),
                event_type: event_type.to_string(),
                raw_payload: payload.clone(),
                tenant_id: self.parse_tenant(provider, &payload),
                subscription_external_id: payload
                    .get("subscription_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                signature_valid,
                processed: false,
                attempts: 0,
                last_error: None,
                abandoned: false,
                received_at: Utc::now(),
                processed_at: None,
                next_retry_at: None,
            })
            .value()
            .clone();

        if event.processed {
            info!(
                provider = %provider,
                event_id = %external_event_id,
                "Duplicate webhook delivery, already processed"
            );
            return Ok(event);
        }

        if !event.signature_valid {
            warn!(
                provider = %provider,
                event_id = %external_event_id,
                "Webhook kept for review, signature invalid; dispatch skipped"
            );
            return Ok(event);
        }

        self.try_dispatch(&key)
    }

    /// Attempt dispatch under the per-event in-flight lock. Called from
    /// ingest and from the retry worker.
    pub(crate) fn try_dispatch(&self, key: &EventKey) -> PlatformResult<WebhookEvent> {
        if self.in_flight.insert(key.clone(), ()).is_some() {
            // Another worker owns this event right now.
            return self
                .get(&key.0, &key.1)
                .ok_or_else(|| PlatformError::NotFound("webhook event".into()));
        }

        let result = self.dispatch_locked(key);
        self.in_flight.remove(key);
        result
    }

    fn dispatch_locked(&self, key: &EventKey) -> PlatformResult<WebhookEvent> {
        let event = self
            .get(&key.0, &key.1)
            .ok_or_else(|| PlatformError::NotFound("webhook event".into()))?;
        if event.processed {
            return Ok(event);
        }

        match self.apply_effect(&event) {
            Ok(()) => {
                let mut entry = self
                    .events
                    .get_mut(key)
                    .ok_or_else(|| PlatformError::NotFound("webhook event".into()))?;
                entry.value_mut().processed = true;
                entry.value_mut().processed_at = Some(Utc::now());
                entry.value_mut().next_retry_at = None;
                Ok(entry.value().clone())
            }
            Err(e) => {
                warn!(
                    provider = %key.0,
                    event_id = %key.1,
                    error = %e,
                    "Webhook dispatch failed"
                );
                let backoff = &self.config.billing.webhook_retry_backoff_secs;
                let mut entry = self
                    .events
                    .get_mut(key)
                    .ok_or_else(|| PlatformError::NotFound("webhook event".into()))?;
                let row = entry.value_mut();
                row.attempts += 1;
                row.last_error = Some(e.to_string());
                match backoff.get(row.attempts as usize - 1) {
                    Some(secs) => {
                        row.next_retry_at = Some(Utc::now() + Duration::seconds(*secs as i64));
                    }
                    None => {
                        row.abandoned = true;
                        row.next_retry_at = None;
                        let tenant_id = row.tenant_id.clone().unwrap_or_default();
                        let message = format!(
                            "Webhook {}/{} failed after {} attempts: {e}",
                            row.provider, row.external_event_id, row.attempts
                        );
                        drop(entry);
                        self.alerts.raise(
                            &tenant_id,
                            None,
                            AlertType::Error,
                            Some(&key.1),
                            AlertSeverity::High,
                            &message,
                            serde_json::json!({ "provider": key.0 }),
                        );
                        return self
                            .get(&key.0, &key.1)
                            .ok_or_else(|| PlatformError::NotFound("webhook event".into()));
                    }
                }
                Ok(row.clone())
            }
        }
    }

    /// Map the event type to its business effect.
    fn apply_effect(&self, event: &WebhookEvent) -> PlatformResult<()> {
        let tenant_id = event.tenant_id.clone().ok_or_else(|| {
            PlatformError::Transient("Tenant not resolvable from payload yet".into())
        })?;
        let tenant = self.db.tenants.require(&tenant_id)?;

        match event.event_type.as_str() {
            "subscription.created" | "subscription.updated" => {
                let tier = event
                    .raw_payload
                    .get("plan_tier")
                    .and_then(|v| v.as_str())
                    .unwrap_or("free");
                let plan = self
                    .catalog
                    .find_by_tier(tier)
                    .ok_or_else(|| PlatformError::NotFound(format!("plan tier {tier}")))?;
                let status = match event
                    .raw_payload
                    .get("status")
                    .and_then(|v| v.as_str())
                    .unwrap_or("active")
                {
                    "trialing" => SubscriptionStatus::Trialing,
                    "past_due" => SubscriptionStatus::PastDue,
                    "canceled" => SubscriptionStatus::Canceled,
                    _ => SubscriptionStatus::Active,
                };
                let now = Utc::now();
                self.book.upsert_external(
                    &tenant_id,
                    &plan,
                    &event.provider,
                    event
                        .subscription_external_id
                        .as_deref()
                        .unwrap_or(&event.external_event_id),
                    status,
                    now,
                    now + Duration::days(30),
                )?;
                self.db.tenants.mutate(&tenant_id, |row| {
                    row.max_employees = plan.max_employees;
                })?;
                self.lifecycle.entitlements().invalidate(&tenant_id);
                if status == SubscriptionStatus::Active
                    && tenant.status == TenantStatus::Suspended
                {
                    self.lifecycle.resume(&tenant_id, "billing-webhook", false)?;
                }
                Ok(())
            }
            "invoice.payment_failed" => {
                let sub = self.book.active_for_tenant(&tenant_id);
                if let Some(sub) = &sub {
                    self.book.set_status(sub.id, SubscriptionStatus::PastDue)?;
                }
                self.lifecycle.record_event(
                    &tenant_id,
                    LifecycleEventType::PaymentFailed,
                    Some("invoice payment failed".into()),
                    "billing-webhook",
                    event.raw_payload.clone(),
                );
                self.alerts.raise(
                    &tenant_id,
                    sub.as_ref().map(|s| s.id),
                    AlertType::PaymentFailure,
                    sub.as_ref()
                        .and_then(|s| s.external_subscription_id.as_deref()),
                    AlertSeverity::High,
                    &format!("Invoice payment failed for {}", tenant.name),
                    event.raw_payload.clone(),
                );

                let mut failures = self
                    .payment_failures
                    .entry(tenant_id.clone())
                    .or_insert(0);
                *failures += 1;
                let over_threshold =
                    *failures >= self.config.billing.payment_failure_threshold;
                drop(failures);
                if over_threshold && tenant.status == TenantStatus::Active {
                    self.lifecycle.suspend(
                        &tenant_id,
                        "repeated payment failures",
                        "billing-webhook",
                    )?;
                }
                Ok(())
            }
            "invoice.paid" => {
                self.payment_failures.remove(&tenant_id);
                if let Some(sub) = self.book.active_for_tenant(&tenant_id) {
                    self.book.set_status(sub.id, SubscriptionStatus::Active)?;
                    self.alerts.resolve_matching(
                        &tenant_id,
                        AlertType::PaymentFailure,
                        sub.external_subscription_id.as_deref(),
                    );
                }
                self.alerts
                    .resolve_matching(&tenant_id, AlertType::PaymentFailure, None);
                self.lifecycle.entitlements().invalidate(&tenant_id);
                if tenant.status == TenantStatus::Suspended {
                    self.lifecycle.resume(&tenant_id, "billing-webhook", false)?;
                }
                Ok(())
            }
            "subscription.canceled" => {
                self.alerts.raise(
                    &tenant_id,
                    self.book.active_for_tenant(&tenant_id).map(|s| s.id),
                    AlertType::Cancellation,
                    None,
                    AlertSeverity::Medium,
                    &format!("Subscription canceled for {}", tenant.name),
                    event.raw_payload.clone(),
                );
                if matches!(
                    tenant.status,
                    TenantStatus::Active | TenantStatus::Suspended
                ) {
                    self.lifecycle.cancel(
                        &tenant_id,
                        "provider subscription canceled",
                        "billing-webhook",
                    )?;
                } else {
                    self.book.cancel_for_tenant(&tenant_id);
                }
                Ok(())
            }
            other => {
                info!(event_type = %other, "Ignoring unhandled webhook event type");
                Ok(())
            }
        }
    }

    fn parse_tenant(&self, provider: &str, payload: &serde_json::Value) -> Option<String> {
        if let Some(id) = payload.get("tenant_id").and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
        payload
            .get("customer_id")
            .and_then(|v| v.as_str())
            .and_then(|customer| {
                self.db
                    .tenants
                    .find_by_external_customer(provider, customer)
            })
            .map(|t| t.tenant_id)
    }

    pub fn get(&self, provider: &str, external_event_id: &str) -> Option<WebhookEvent> {
        self.events
            .get(&(provider.to_string(), external_event_id.to_string()))
            .map(|e| e.value().clone())
    }

    /// Unprocessed, non-abandoned events due for a retry.
    pub fn due_for_retry(&self) -> Vec<WebhookEvent> {
        let now = Utc::now();
        self.events
            .iter()
            .filter(|e| {
                let ev = e.value();
                ev.signature_valid
                    && !ev.processed
                    && !ev.abandoned
                    && ev.next_retry_at.map(|at| at <= now).unwrap_or(false)
            })
            .map(|e| e.value().clone())
            .collect()
    }

    /// Force an event's retry schedule (test support).
    #[cfg(test)]
    pub(crate) fn force_due(&self, provider: &str, external_event_id: &str, at: DateTime<Utc>) {
        if let Some(mut entry) = self
            .events
            .get_mut(&(provider.to_string(), external_event_id.to_string()))
        {
            entry.value_mut().next_retry_at = Some(at);
        }
    }

    /// Events kept for operator review (invalid signature or abandoned).
    pub fn needing_review(&self) -> Vec<WebhookEvent> {
        self.events
            .iter()
            .filter(|e| !e.value().signature_valid || e.value().abandoned)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crewhq_catalog::EntitlementService;
    use crewhq_core::mailer::RecordingMailer;
    use crewhq_lifecycle::{EventLog, SignupRequest};
    use crewhq_store::Tenant;

    pub(crate) fn ingestor() -> (Arc<WebhookIngestor>, Arc<LifecycleManager>) {
        let db = Arc::new(Database::new());
        let catalog = Arc::new(PlanCatalog::new());
        catalog.seed_default_plans();
        let book = Arc::new(SubscriptionBook::new());
        let entitlements = Arc::new(EntitlementService::new(catalog.clone(), book.clone(), 0));
        let alerts = Arc::new(AlertHub::new());
        let events = Arc::new(EventLog::new());
        let mailer = Arc::new(RecordingMailer::new());
        let config = Arc::new(PlatformConfig::default());
        let lifecycle = Arc::new(LifecycleManager::new(
            db.clone(),
            catalog.clone(),
            book.clone(),
            entitlements,
            alerts.clone(),
            events,
            mailer,
            config.clone(),
        ));
        let ingestor = Arc::new(WebhookIngestor::new(
            db,
            catalog,
            book,
            lifecycle.clone(),
            alerts,
            config,
        ));
        (ingestor, lifecycle)
    }

    pub(crate) fn active_tenant(lifecycle: &LifecycleManager, token: &str) -> Tenant {
        let tenant = lifecycle
            .signup(&SignupRequest {
                tenant_name: format!("acme-{token}"),
                domain: None,
                admin_email: format!("admin-{token}@acme.test"),
                admin_name: None,
                idempotency_token: token.into(),
            })
            .unwrap();
        lifecycle.provision(&tenant.tenant_id).unwrap()
    }

    fn paid_payload(tenant_id: &str) -> serde_json::Value {
        serde_json::json!({ "tenant_id": tenant_id, "subscription_id": "sub_1" })
    }

    #[test]
    fn test_persist_first_and_dedup() {
        let (ingestor, lifecycle) = ingestor();
        let tenant = active_tenant(&lifecycle, "tok-1");
        let payload = serde_json::json!({
            "tenant_id": tenant.tenant_id,
            "subscription_id": "sub_1",
            "plan_tier": "growth",
            "status": "active",
        });

        let first = ingestor
            .ingest("stripe", "evt_1", "subscription.updated", payload.clone(), true)
            .unwrap();
        assert!(first.processed);
        assert_eq!(first.raw_payload, payload);

        // Re-delivery has no second effect.
        let before = ingestor.book.history_for_tenant(&tenant.tenant_id).len();
        let second = ingestor
            .ingest("stripe", "evt_1", "subscription.updated", payload, true)
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            ingestor.book.history_for_tenant(&tenant.tenant_id).len(),
            before
        );
    }

    #[test]
    fn test_invalid_signature_persisted_not_dispatched() {
        let (ingestor, lifecycle) = ingestor();
        let tenant = active_tenant(&lifecycle, "tok-1");

        let event = ingestor
            .ingest(
                "stripe",
                "evt_bad",
                "subscription.canceled",
                paid_payload(&tenant.tenant_id),
                false,
            )
            .unwrap();
        assert!(!event.processed);
        assert_eq!(event.attempts, 0);
        // Tenant untouched; event visible for review.
        assert_eq!(
            ingestor.db.tenants.require(&tenant.tenant_id).unwrap().status,
            TenantStatus::Active
        );
        assert_eq!(ingestor.needing_review().len(), 1);
    }

    #[test]
    fn test_payment_failures_escalate_to_suspension() {
        let (ingestor, lifecycle) = ingestor();
        let tenant = active_tenant(&lifecycle, "tok-1");
        let id = tenant.tenant_id.clone();

        for n in 0..3 {
            ingestor
                .ingest(
                    "stripe",
                    &format!("evt_fail_{n}"),
                    "invoice.payment_failed",
                    paid_payload(&id),
                    true,
                )
                .unwrap();
        }

        // One PaymentFailure alert despite three events, and the tenant is
        // suspended at the configured threshold.
        let alerts = ingestor.alerts.list_for_tenant(&id);
        assert_eq!(
            alerts
                .iter()
                .filter(|a| a.alert_type == AlertType::PaymentFailure)
                .count(),
            1
        );
        assert!(alerts.iter().any(|a| a.alert_type == AlertType::Suspension));
        assert_eq!(
            ingestor.db.tenants.require(&id).unwrap().status,
            TenantStatus::Suspended
        );

        // Payment recovery resumes the tenant and clears the alerts.
        ingestor
            .ingest("stripe", "evt_paid", "invoice.paid", paid_payload(&id), true)
            .unwrap();
        assert_eq!(
            ingestor.db.tenants.require(&id).unwrap().status,
            TenantStatus::Active
        );
        let active: Vec<_> = ingestor
            .alerts
            .list_for_tenant(&id)
            .into_iter()
            .filter(|a| a.status == crewhq_alerts::AlertStatus::Active)
            .collect();
        assert!(active.iter().all(|a| a.alert_type != AlertType::PaymentFailure));
    }

    #[test]
    fn test_provider_cancellation() {
        let (ingestor, lifecycle) = ingestor();
        let tenant = active_tenant(&lifecycle, "tok-1");
        let id = tenant.tenant_id.clone();

        ingestor
            .ingest(
                "stripe",
                "evt_cancel",
                "subscription.canceled",
                paid_payload(&id),
                true,
            )
            .unwrap();

        assert_eq!(
            ingestor.db.tenants.require(&id).unwrap().status,
            TenantStatus::Cancelled
        );
        assert!(ingestor
            .alerts
            .list_for_tenant(&id)
            .iter()
            .any(|a| a.alert_type == AlertType::Cancellation));
    }

    #[test]
    fn test_failed_dispatch_schedules_retry() {
        let (ingestor, _) = ingestor();
        // Unknown tenant: effect fails, event stays unprocessed with a
        // retry schedule and the raw payload intact.
        let event = ingestor
            .ingest(
                "stripe",
                "evt_orphan",
                "invoice.payment_failed",
                serde_json::json!({ "tenant_id": "404" }),
                true,
            )
            .unwrap();
        assert!(!event.processed);
        assert_eq!(event.attempts, 1);
        assert!(event.last_error.is_some());
        assert!(event.next_retry_at.is_some());
    }

    #[test]
    fn test_customer_id_lookup() {
        let (ingestor, lifecycle) = ingestor();
        let tenant = active_tenant(&lifecycle, "tok-1");
        ingestor
            .db
            .tenants
            .mutate(&tenant.tenant_id, |row| {
                row.external_customer_ids
                    .insert("stripe".into(), "cus_42".into());
            })
            .unwrap();

        let event = ingestor
            .ingest(
                "stripe",
                "evt_cust",
                "invoice.payment_failed",
                serde_json::json!({ "customer_id": "cus_42" }),
                true,
            )
            .unwrap();
        assert_eq!(event.tenant_id.as_deref(), Some(tenant.tenant_id.as_str()));
        assert!(event.processed);
    }
}
