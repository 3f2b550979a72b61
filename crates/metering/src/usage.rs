//! Per-tenant usage counters rolled up into monthly period rows.
//!
//! Exactly one row exists per `(tenant_id, period_start)`; the first access
//! in a new month creates it with live counts materialized from the store.
//! The feature-usage map is persisted as a JSON string and deserialized
//! lazily on mutation.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use crewhq_alerts::AlertHub;
use crewhq_catalog::EntitlementService;
use crewhq_core::config::PlatformConfig;
use crewhq_core::error::{PlatformError, PlatformResult};
use crewhq_core::mailer::Mailer;
use crewhq_lifecycle::{LifecycleManager, TenantDataPurge};
use crewhq_store::Database;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One month of counters for one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMetricRow {
    pub id: Uuid,
    pub tenant_id: String,
    /// First day of the calendar month (UTC).
    pub period_start: NaiveDate,
    pub employee_count: u64,
    pub user_count: u64,
    /// Cumulative API requests this period.
    pub api_request_count: u64,
    pub api_request_count_today: u64,
    pub last_api_request_date: Option<NaiveDate>,
    pub storage_bytes_used: u64,
    /// JSON map of feature key -> integer counter.
    pub feature_usage: String,
    pub last_updated: DateTime<Utc>,
}

impl UsageMetricRow {
    /// Deserialize the feature-usage payload. Malformed payloads count as
    /// empty rather than poisoning the row.
    pub fn feature_usage_map(&self) -> HashMap<String, i64> {
        serde_json::from_str(&self.feature_usage).unwrap_or_default()
    }
}

/// First day of the month containing `date`.
pub(crate) fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

/// Usage metering engine.
pub struct UsageEngine {
    pub(crate) db: Arc<Database>,
    pub(crate) entitlements: Arc<EntitlementService>,
    pub(crate) alerts: Arc<AlertHub>,
    pub(crate) lifecycle: Arc<LifecycleManager>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) config: Arc<PlatformConfig>,
    rows: DashMap<(String, NaiveDate), UsageMetricRow>,
    /// Consecutive over-limit scans per tenant, for the suspension window.
    pub(crate) over_limit_scans: DashMap<String, u32>,
    /// Periods for which a 90% warning email already went out, per
    /// `(tenant, resource)`.
    pub(crate) warned: DashMap<(String, String), NaiveDate>,
}

impl UsageEngine {
    pub fn new(
        db: Arc<Database>,
        entitlements: Arc<EntitlementService>,
        alerts: Arc<AlertHub>,
        lifecycle: Arc<LifecycleManager>,
        mailer: Arc<dyn Mailer>,
        config: Arc<PlatformConfig>,
    ) -> Self {
        info!("Usage metering engine initialized");
        Self {
            db,
            entitlements,
            alerts,
            lifecycle,
            mailer,
            config,
            rows: DashMap::new(),
            over_limit_scans: DashMap::new(),
            warned: DashMap::new(),
        }
    }

    /// The current-period row for a tenant, created if-not-exists with live
    /// counts. The entry lock makes concurrent first accesses converge on a
    /// single row.
    pub fn ensure_period(&self, tenant_id: &str) -> UsageMetricRow {
        let period = month_start(Utc::now().date_naive());
        self.rows
            .entry((tenant_id.to_string(), period))
            .or_insert_with(|| UsageMetricRow {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                period_start: period,
                employee_count: self.db.employees.count_for_tenant(tenant_id) as u64,
                user_count: self.db.users.count_for_tenant(tenant_id) as u64,
                api_request_count: 0,
                api_request_count_today: 0,
                last_api_request_date: None,
                storage_bytes_used: 0,
                feature_usage: "{}".to_string(),
                last_updated: Utc::now(),
            })
            .value()
            .clone()
    }

    /// Increment the cumulative and daily API counters; the daily counter
    /// resets when the stored date differs from today.
    pub fn increment_api_requests(&self, tenant_id: &str) -> UsageMetricRow {
        let today = Utc::now().date_naive();
        self.mutate_current(tenant_id, |row| {
            row.api_request_count += 1;
            if row.last_api_request_date != Some(today) {
                row.api_request_count_today = 0;
                row.last_api_request_date = Some(today);
            }
            row.api_request_count_today += 1;
        })
    }

    /// Recompute the stored employee count from the store.
    pub fn update_employee_count(&self, tenant_id: &str) -> UsageMetricRow {
        let count = self.db.employees.count_for_tenant(tenant_id) as u64;
        self.mutate_current(tenant_id, |row| row.employee_count = count)
    }

    /// Recompute the stored user count from the directory.
    pub fn update_user_count(&self, tenant_id: &str) -> UsageMetricRow {
        let count = self.db.users.count_for_tenant(tenant_id) as u64;
        self.mutate_current(tenant_id, |row| row.user_count = count)
    }

    /// Adjust storage usage; the delta may be negative and saturates at 0.
    pub fn add_storage_bytes(&self, tenant_id: &str, delta: i64) -> UsageMetricRow {
        self.mutate_current(tenant_id, |row| {
            row.storage_bytes_used = if delta >= 0 {
                row.storage_bytes_used.saturating_add(delta as u64)
            } else {
                row.storage_bytes_used.saturating_sub(delta.unsigned_abs())
            };
        })
    }

    /// Bump one feature counter inside the JSON payload. Deserialize,
    /// update, and re-serialize happen under the row's entry lock so
    /// concurrent updates are not lost.
    pub fn increment_feature_usage(
        &self,
        tenant_id: &str,
        feature_key: &str,
        delta: i64,
    ) -> PlatformResult<UsageMetricRow> {
        if feature_key.trim().is_empty() {
            return Err(PlatformError::Validation("Feature key is required".into()));
        }
        Ok(self.mutate_current(tenant_id, |row| {
            let mut map = row.feature_usage_map();
            let counter = map.entry(feature_key.to_string()).or_insert(0);
            *counter += delta;
            row.feature_usage =
                serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string());
        }))
    }

    /// Current-period snapshot without creating side effects beyond the
    /// if-not-exists row.
    pub fn current(&self, tenant_id: &str) -> UsageMetricRow {
        self.ensure_period(tenant_id)
    }

    /// Current-period row without creating one (operator listings).
    pub fn current_if_exists(&self, tenant_id: &str) -> Option<UsageMetricRow> {
        let period = month_start(Utc::now().date_naive());
        self.row_for_period(tenant_id, period)
    }

    /// Row for an arbitrary period, if one exists.
    pub fn row_for_period(&self, tenant_id: &str, period_start: NaiveDate) -> Option<UsageMetricRow> {
        self.rows
            .get(&(tenant_id.to_string(), period_start))
            .map(|e| e.value().clone())
    }

    /// All rows for one period across tenants (operator aggregates).
    pub fn rows_for_period(&self, period_start: NaiveDate) -> Vec<UsageMetricRow> {
        self.rows
            .iter()
            .filter(|e| e.value().period_start == period_start)
            .map(|e| e.value().clone())
            .collect()
    }

    fn mutate_current<F>(&self, tenant_id: &str, f: F) -> UsageMetricRow
    where
        F: FnOnce(&mut UsageMetricRow),
    {
        self.ensure_period(tenant_id);
        let period = month_start(Utc::now().date_naive());
        let mut entry = self
            .rows
            .entry((tenant_id.to_string(), period))
            .or_insert_with(|| UsageMetricRow {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                period_start: period,
                employee_count: 0,
                user_count: 0,
                api_request_count: 0,
                api_request_count_today: 0,
                last_api_request_date: None,
                storage_bytes_used: 0,
                feature_usage: "{}".to_string(),
                last_updated: Utc::now(),
            });
        f(entry.value_mut());
        entry.value_mut().last_updated = Utc::now();
        entry.value().clone()
    }
}

impl TenantDataPurge for UsageEngine {
    fn name(&self) -> &'static str {
        "usage_metrics"
    }

    fn purge_tenant(&self, tenant_id: &str) -> usize {
        let keys: Vec<(String, NaiveDate)> = self
            .rows
            .iter()
            .filter(|e| e.value().tenant_id == tenant_id)
            .map(|e| e.key().clone())
            .collect();
        for key in &keys {
            self.rows.remove(key);
        }
        self.over_limit_scans.remove(tenant_id);
        keys.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crewhq_catalog::{PlanCatalog, SubscriptionBook};
    use crewhq_core::mailer::RecordingMailer;
    use crewhq_lifecycle::{EventLog, SignupRequest};
    use crewhq_store::Tenant;

    pub(crate) struct Fixture {
        pub engine: Arc<UsageEngine>,
        pub lifecycle: Arc<LifecycleManager>,
        pub mailer: Arc<RecordingMailer>,
    }

    pub(crate) fn fixture() -> Fixture {
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
            catalog,
            book.clone(),
            entitlements.clone(),
            alerts.clone(),
            events,
            mailer.clone(),
            config.clone(),
        ));
        let engine = Arc::new(UsageEngine::new(
            db,
            entitlements,
            alerts,
            lifecycle.clone(),
            mailer.clone(),
            config,
        ));
        lifecycle.register_purge_hook(engine.clone());
        Fixture {
            engine,
            lifecycle,
            mailer,
        }
    }

    pub(crate) fn provisioned_tenant(fx: &Fixture, token: &str) -> Tenant {
        let tenant = fx
            .lifecycle
            .signup(&SignupRequest {
                tenant_name: format!("acme-{token}"),
                domain: None,
                admin_email: format!("admin-{token}@acme.test"),
                admin_name: None,
                idempotency_token: token.into(),
            })
            .unwrap();
        fx.lifecycle.provision(&tenant.tenant_id).unwrap()
    }

    #[test]
    fn test_single_period_row_per_month() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = &tenant.tenant_id;

        let first = fx.engine.ensure_period(id);
        let second = fx.engine.ensure_period(id);
        assert_eq!(first.id, second.id);
        assert_eq!(first.period_start.day(), 1);
        // Initial counts come from the live store (provisioned admin user).
        assert_eq!(first.user_count, 1);
    }

    #[test]
    fn test_api_counter_daily_reset() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = &tenant.tenant_id;

        fx.engine.increment_api_requests(id);
        fx.engine.increment_api_requests(id);
        let row = fx.engine.increment_api_requests(id);
        assert_eq!(row.api_request_count, 3);
        assert_eq!(row.api_request_count_today, 3);

        // Simulate the last request having been yesterday.
        let yesterday = Utc::now().date_naive().pred_opt().unwrap();
        fx.engine.mutate_current(id, |r| {
            r.last_api_request_date = Some(yesterday);
        });
        let row = fx.engine.increment_api_requests(id);
        assert_eq!(row.api_request_count, 4);
        assert_eq!(row.api_request_count_today, 1);
    }

    #[test]
    fn test_storage_delta_saturates() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = &tenant.tenant_id;

        let row = fx.engine.add_storage_bytes(id, 1000);
        assert_eq!(row.storage_bytes_used, 1000);
        let row = fx.engine.add_storage_bytes(id, -400);
        assert_eq!(row.storage_bytes_used, 600);
        let row = fx.engine.add_storage_bytes(id, -10_000);
        assert_eq!(row.storage_bytes_used, 0);
    }

    #[test]
    fn test_feature_usage_json_roundtrip() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = &tenant.tenant_id;

        fx.engine.increment_feature_usage(id, "custom_reports", 1).unwrap();
        fx.engine.increment_feature_usage(id, "custom_reports", 2).unwrap();
        let row = fx.engine.increment_feature_usage(id, "payroll_export", 1).unwrap();

        let map = row.feature_usage_map();
        assert_eq!(map["custom_reports"], 3);
        assert_eq!(map["payroll_export"], 1);
        // Persisted as a JSON string payload.
        assert!(row.feature_usage.contains("custom_reports"));

        assert!(fx.engine.increment_feature_usage(id, "  ", 1).is_err());
    }
}
