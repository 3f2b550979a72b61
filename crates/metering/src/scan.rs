//! The background usage scan: overage alerts, 90% warning emails, the
//! sustained-overage suspension window, and cross-tenant aggregates for the
//! operator dashboard.

use crate::limits::LimitCheck;
use crate::usage::{month_start, UsageEngine};
use chrono::{NaiveDate, Utc};
use crewhq_alerts::{AlertSeverity, AlertType};
use crewhq_core::error::PlatformResult;
use crewhq_core::mailer::OutboundEmail;
use crewhq_store::{Tenant, TenantStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Cross-tenant totals for one period.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageAggregate {
    pub period_start: Option<NaiveDate>,
    pub tenant_count: u64,
    pub total_employees: u64,
    pub total_users: u64,
    pub total_api_requests: u64,
    pub total_storage_bytes: u64,
}

/// Current-period totals with deltas against the previous month.
#[derive(Debug, Clone, Serialize)]
pub struct UsageTrend {
    pub current: UsageAggregate,
    pub previous: UsageAggregate,
    pub employee_delta_pct: f64,
    pub api_delta_pct: f64,
    pub storage_delta_pct: f64,
}

fn delta_pct(current: u64, previous: u64) -> f64 {
    if previous == 0 {
        if current == 0 {
            0.0
        } else {
            100.0
        }
    } else {
        (current as f64 - previous as f64) / previous as f64 * 100.0
    }
}

impl UsageEngine {
    /// Evaluate every limit for one tenant: raise overage alerts (High past
    /// 1.5x the limit, else Medium), resolve alerts whose condition
    /// cleared, email the admin at the warning threshold, and track the
    /// sustained-overage window that ends in suspension.
    pub fn scan_tenant(&self, tenant: &Tenant) -> PlatformResult<Vec<LimitCheck>> {
        let tenant_id = &tenant.tenant_id;
        let checks = self.check_all_limits(tenant_id)?;
        let mut any_over = false;

        for check in &checks {
            let resource = check.dimension.to_string();
            match (check.allowed, check.limit) {
                (false, Some(limit)) => {
                    any_over = true;
                    let severity = if check.current as f64 > 1.5 * limit as f64 {
                        AlertSeverity::High
                    } else {
                        AlertSeverity::Medium
                    };
                    self.alerts.raise(
                        tenant_id,
                        None,
                        AlertType::Overage,
                        Some(&resource),
                        severity,
                        &format!(
                            "{} usage {} exceeds plan limit {}",
                            resource, check.current, limit
                        ),
                        serde_json::json!({ "current": check.current, "limit": limit }),
                    );
                }
                _ => {
                    self.alerts
                        .resolve_matching(tenant_id, AlertType::Overage, Some(&resource));
                    if check.limit.is_some()
                        && check.percent() >= self.config.usage.warn_threshold_percent
                    {
                        self.warn_approaching_limit(tenant, check, &resource);
                    }
                }
            }
        }

        if any_over {
            let mut scans = self.over_limit_scans.entry(tenant_id.clone()).or_insert(0);
            *scans += 1;
            if *scans >= self.config.usage.over_limit_suspend_after_scans {
                drop(scans);
                self.over_limit_scans.remove(tenant_id);
                warn!(tenant_id = %tenant_id, "Sustained overage, suspending tenant");
                self.lifecycle
                    .suspend(tenant_id, "sustained usage overage", "usage-scan")?;
            }
        } else {
            self.over_limit_scans.remove(tenant_id);
        }

        Ok(checks)
    }

    /// One pass over every Active tenant.
    pub fn check_all_tenants_usage(&self) {
        for tenant in self.db.tenants.list() {
            if tenant.status != TenantStatus::Active {
                continue;
            }
            if let Err(e) = self.scan_tenant(&tenant) {
                warn!(tenant_id = %tenant.tenant_id, error = %e, "Usage scan failed for tenant");
            }
        }
    }

    /// Totals across all tenants for one period.
    pub fn aggregate_for_period(&self, period_start: NaiveDate) -> UsageAggregate {
        let rows = self.rows_for_period(period_start);
        let mut aggregate = UsageAggregate {
            period_start: Some(period_start),
            ..Default::default()
        };
        for row in rows {
            aggregate.tenant_count += 1;
            aggregate.total_employees += row.employee_count;
            aggregate.total_users += row.user_count;
            aggregate.total_api_requests += row.api_request_count;
            aggregate.total_storage_bytes += row.storage_bytes_used;
        }
        aggregate
    }

    /// Current-month totals with previous-month trend deltas.
    pub fn aggregate_with_trend(&self) -> UsageTrend {
        let today = Utc::now().date_naive();
        let current_period = month_start(today);
        let previous_period = month_start(
            current_period
                .pred_opt()
                .unwrap_or(current_period),
        );

        let current = self.aggregate_for_period(current_period);
        let previous = self.aggregate_for_period(previous_period);
        UsageTrend {
            employee_delta_pct: delta_pct(current.total_employees, previous.total_employees),
            api_delta_pct: delta_pct(current.total_api_requests, previous.total_api_requests),
            storage_delta_pct: delta_pct(
                current.total_storage_bytes,
                previous.total_storage_bytes,
            ),
            current,
            previous,
        }
    }

    /// Warning email at the threshold, at most once per period per resource.
    fn warn_approaching_limit(&self, tenant: &Tenant, check: &LimitCheck, resource: &str) {
        let period = month_start(Utc::now().date_naive());
        let key = (tenant.tenant_id.clone(), resource.to_string());
        if self.warned.get(&key).map(|p| *p == period).unwrap_or(false) {
            return;
        }
        self.warned.insert(key, period);
        info!(
            tenant_id = %tenant.tenant_id,
            resource = %resource,
            percent = check.percent(),
            "Usage warning threshold reached"
        );
        self.mailer.send(OutboundEmail {
            to: tenant.admin_email.clone(),
            subject: format!("{} usage warning for {}", resource, tenant.name),
            body: format!(
                "Your {} usage is at {:.0}% of the plan limit ({} of {}).",
                resource,
                check.percent(),
                check.current,
                check.limit.unwrap_or(0)
            ),
        });
    }
}

/// Periodic scan runner.
pub struct UsageScanWorker {
    engine: Arc<UsageEngine>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl UsageScanWorker {
    pub fn new(engine: Arc<UsageEngine>, interval_secs: u64, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(interval_secs.max(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Usage scan worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.engine.check_all_tenants_usage(),
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Usage scan worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::LimitDimension;
    use crate::usage::tests::{fixture, provisioned_tenant};
    use crewhq_alerts::AlertStatus;
    use crewhq_core::context::TenantContext;
    use crewhq_store::entities::Employee;

    fn add_employees(fx: &crate::usage::tests::Fixture, tenant_id: &str, n: usize) {
        let ctx = TenantContext::worker(tenant_id);
        let start = fx.engine.db.employees.count_for_tenant(tenant_id);
        for i in start..start + n {
            fx.engine
                .db
                .create_employee(
                    &ctx,
                    Employee::new(format!("EMP{i:03}"), "First", "Last", format!("e{i}@acme.test")),
                )
                .unwrap();
        }
        fx.engine.update_employee_count(tenant_id);
    }

    #[test]
    fn test_overage_alert_raised_and_resolved() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = tenant.tenant_id.clone();

        // 11 employees on a 10-cap Free plan.
        add_employees(&fx, &id, 11);
        let tenant = fx.engine.db.tenants.require(&id).unwrap();
        fx.engine.scan_tenant(&tenant).unwrap();

        let alerts = fx.engine.alerts.list_for_tenant(&id);
        let overage = alerts
            .iter()
            .find(|a| a.alert_type == AlertType::Overage)
            .unwrap();
        assert_eq!(overage.severity, AlertSeverity::Medium);
        assert_eq!(overage.resource.as_deref(), Some("employees"));

        // Re-scan does not duplicate; severity escalates past 1.5x.
        add_employees(&fx, &id, 5); // 16 > 15
        fx.engine.scan_tenant(&tenant).unwrap();
        let alerts = fx.engine.alerts.list_for_tenant(&id);
        let overages: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == AlertType::Overage)
            .collect();
        assert_eq!(overages.len(), 1);
        assert_eq!(overages[0].severity, AlertSeverity::High);

        // Back under the limit: the housekeeper resolves the alert.
        let ctx = TenantContext::worker(&id);
        for employee in fx.engine.db.employees.list(&ctx) {
            fx.engine.db.employees.delete(&ctx, employee.id).unwrap();
        }
        fx.engine.update_employee_count(&id);
        fx.engine.scan_tenant(&tenant).unwrap();
        let overage = fx
            .engine
            .alerts
            .list_for_tenant(&id)
            .into_iter()
            .find(|a| a.alert_type == AlertType::Overage)
            .unwrap();
        assert_eq!(overage.status, AlertStatus::Resolved);
    }

    #[test]
    fn test_warning_email_once_per_period() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = tenant.tenant_id.clone();

        // 9 of 10 employees = 90%.
        add_employees(&fx, &id, 9);
        let tenant = fx.engine.db.tenants.require(&id).unwrap();
        fx.engine.scan_tenant(&tenant).unwrap();
        fx.engine.scan_tenant(&tenant).unwrap();

        let warnings: Vec<_> = fx
            .mailer
            .sent()
            .into_iter()
            .filter(|m| m.subject.contains("usage warning"))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_sustained_overage_suspends() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = tenant.tenant_id.clone();
        add_employees(&fx, &id, 11);

        let scans_needed = fx.engine.config.usage.over_limit_suspend_after_scans;
        let tenant_row = fx.engine.db.tenants.require(&id).unwrap();
        for _ in 0..scans_needed {
            fx.engine.scan_tenant(&tenant_row).unwrap();
        }

        let row = fx.engine.db.tenants.require(&id).unwrap();
        assert_eq!(row.status, TenantStatus::Suspended);
        // Suspended tenants drop out of the scan loop.
        fx.engine.check_all_tenants_usage();
    }

    #[test]
    fn test_aggregates_and_trend() {
        let fx = fixture();
        let a = provisioned_tenant(&fx, "tok-1");
        let b = provisioned_tenant(&fx, "tok-2");
        add_employees(&fx, &a.tenant_id, 3);
        add_employees(&fx, &b.tenant_id, 2);
        fx.engine.increment_api_requests(&a.tenant_id);
        fx.engine.add_storage_bytes(&b.tenant_id, 2048);

        let period = month_start(Utc::now().date_naive());
        let aggregate = fx.engine.aggregate_for_period(period);
        assert_eq!(aggregate.tenant_count, 2);
        assert_eq!(aggregate.total_employees, 5);
        assert_eq!(aggregate.total_api_requests, 1);
        assert_eq!(aggregate.total_storage_bytes, 2048);

        let trend = fx.engine.aggregate_with_trend();
        // No previous-month rows: deltas report growth from zero.
        assert_eq!(trend.previous.tenant_count, 0);
        assert!((trend.employee_delta_pct - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_limit_check_dimension_coverage() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let checks = fx.engine.check_all_limits(&tenant.tenant_id).unwrap();
        assert_eq!(checks.len(), LimitDimension::ALL.len());
    }
}
