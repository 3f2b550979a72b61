//! Cross-tenant operator console: paginated tenant listings with
//! denormalized snapshots, tenant detail, and the aggregated dashboard.

use crewhq_alerts::{AlertHub, SeverityHistogram};
use crewhq_catalog::{PlanCatalog, Subscription, SubscriptionBook};
use crewhq_core::error::PlatformResult;
use crewhq_lifecycle::{LifecycleEvent, LifecycleManager};
use crewhq_metering::scan::UsageTrend;
use crewhq_metering::{UsageEngine, UsageMetricRow};
use crewhq_store::{Database, Tenant, TenantStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const GIB: f64 = 1_073_741_824.0;

/// Listing query: pagination, filters, sort.
#[derive(Debug, Clone, Deserialize)]
pub struct TenantListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub status: Option<TenantStatus>,
    pub plan_tier: Option<String>,
    /// Case-insensitive substring match on name or domain.
    pub search: Option<String>,
    #[serde(default)]
    pub sort: TenantSort,
}

fn default_page() -> usize {
    1
}
fn default_page_size() -> usize {
    25
}

impl Default for TenantListQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            page_size: default_page_size(),
            status: None,
            plan_tier: None,
            search: None,
            sort: TenantSort::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSort {
    #[default]
    Name,
    CreatedAt,
    Employees,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Denormalized listing row: tenant + subscription + usage snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TenantSummaryRow {
    pub tenant: Tenant,
    pub plan_name: Option<String>,
    pub plan_tier: Option<String>,
    pub subscription_status: Option<String>,
    pub employee_count: u64,
    pub user_count: u64,
    pub api_requests_today: u64,
    pub storage_bytes_used: u64,
    pub active_alerts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantDetail {
    pub tenant: Tenant,
    pub subscriptions: Vec<Subscription>,
    pub recent_events: Vec<LifecycleEvent>,
    pub usage: Option<UsageMetricRow>,
    pub employee_count: usize,
    pub user_count: usize,
    pub alerts: Vec<crewhq_alerts::Alert>,
}

/// Weighted usage score entry for the dashboard's top-N list.
#[derive(Debug, Clone, Serialize)]
pub struct TenantScore {
    pub tenant_id: String,
    pub name: String,
    pub score: f64,
    pub employees: u64,
    pub api_requests: u64,
    pub storage_gb: f64,
    pub active_alerts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorDashboard {
    pub total_tenants: u64,
    pub tenants_by_status: HashMap<String, u64>,
    pub tenants_by_tier: HashMap<String, u64>,
    pub usage: UsageTrend,
    pub top_tenants: Vec<TenantScore>,
    pub alert_histogram: SeverityHistogram,
    pub alerts_by_type: HashMap<String, u64>,
}

pub struct OperatorConsole {
    db: Arc<Database>,
    catalog: Arc<PlanCatalog>,
    book: Arc<SubscriptionBook>,
    usage: Arc<UsageEngine>,
    alerts: Arc<AlertHub>,
    lifecycle: Arc<LifecycleManager>,
}

impl OperatorConsole {
    pub fn new(
        db: Arc<Database>,
        catalog: Arc<PlanCatalog>,
        book: Arc<SubscriptionBook>,
        usage: Arc<UsageEngine>,
        alerts: Arc<AlertHub>,
        lifecycle: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            db,
            catalog,
            book,
            usage,
            alerts,
            lifecycle,
        }
    }

    /// Paginated tenant listing with filters and sort.
    pub fn list_tenants(&self, query: &TenantListQuery) -> Page<TenantSummaryRow> {
        let mut rows: Vec<TenantSummaryRow> = self
            .db
            .tenants
            .list()
            .into_iter()
            .filter(|t| query.status.map(|s| t.status == s).unwrap_or(true))
            .filter(|t| {
                query
                    .search
                    .as_deref()
                    .map(|needle| {
                        let needle = needle.to_ascii_lowercase();
                        t.name.to_ascii_lowercase().contains(&needle)
                            || t.domain
                                .as_deref()
                                .map(|d| d.to_ascii_lowercase().contains(&needle))
                                .unwrap_or(false)
                    })
                    .unwrap_or(true)
            })
            .map(|t| self.summarize(t))
            .filter(|row| {
                query
                    .plan_tier
                    .as_deref()
                    .map(|tier| row.plan_tier.as_deref() == Some(tier))
                    .unwrap_or(true)
            })
            .collect();

        match query.sort {
            TenantSort::Name => rows.sort_by(|a, b| a.tenant.name.cmp(&b.tenant.name)),
            TenantSort::CreatedAt => {
                rows.sort_by(|a, b| b.tenant.created_at.cmp(&a.tenant.created_at))
            }
            TenantSort::Employees => {
                rows.sort_by(|a, b| b.employee_count.cmp(&a.employee_count))
            }
        }

        let total = rows.len();
        let page = query.page.max(1);
        let page_size = query.page_size.clamp(1, 200);
        let items = rows
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Page {
            items,
            total,
            page,
            page_size,
        }
    }

    fn summarize(&self, tenant: Tenant) -> TenantSummaryRow {
        let sub = self.book.active_for_tenant(&tenant.tenant_id);
        let plan = sub.as_ref().and_then(|s| self.catalog.get(s.plan_id));
        let usage = self.usage.current_if_exists(&tenant.tenant_id);
        TenantSummaryRow {
            plan_name: plan.as_ref().map(|p| p.name.clone()),
            plan_tier: plan.as_ref().map(|p| p.tier.clone()),
            subscription_status: sub.as_ref().map(|s| s.status.to_string()),
            employee_count: usage
                .as_ref()
                .map(|u| u.employee_count)
                .unwrap_or_else(|| self.db.employees.count_for_tenant(&tenant.tenant_id) as u64),
            user_count: usage
                .as_ref()
                .map(|u| u.user_count)
                .unwrap_or_else(|| self.db.users.count_for_tenant(&tenant.tenant_id) as u64),
            api_requests_today: usage
                .as_ref()
                .map(|u| u.api_request_count_today)
                .unwrap_or(0),
            storage_bytes_used: usage.as_ref().map(|u| u.storage_bytes_used).unwrap_or(0),
            active_alerts: self.alerts.active_count_for_tenant(&tenant.tenant_id),
            tenant,
        }
    }

    /// Full detail view for one tenant.
    pub fn tenant_detail(&self, tenant_id: &str) -> PlatformResult<TenantDetail> {
        let tenant = self.db.tenants.require(tenant_id)?;
        Ok(TenantDetail {
            subscriptions: self.book.history_for_tenant(tenant_id),
            recent_events: self.lifecycle.event_log().recent_for_tenant(tenant_id, 20),
            usage: self.usage.current_if_exists(tenant_id),
            employee_count: self.db.employees.count_for_tenant(tenant_id),
            user_count: self.db.users.count_for_tenant(tenant_id),
            alerts: self.alerts.list_for_tenant(tenant_id),
            tenant,
        })
    }

    /// Aggregated cross-tenant dashboard.
    pub fn dashboard(&self, top_n: usize) -> OperatorDashboard {
        let tenants = self.db.tenants.list();
        let mut by_status: HashMap<String, u64> = HashMap::new();
        let mut by_tier: HashMap<String, u64> = HashMap::new();
        for tenant in &tenants {
            *by_status.entry(tenant.status.to_string()).or_default() += 1;
            if let Some(sub) = self.book.active_for_tenant(&tenant.tenant_id) {
                if let Some(plan) = self.catalog.get(sub.plan_id) {
                    *by_tier.entry(plan.tier).or_default() += 1;
                }
            }
        }

        OperatorDashboard {
            total_tenants: tenants.len() as u64,
            tenants_by_status: by_status,
            tenants_by_tier: by_tier,
            usage: self.usage.aggregate_with_trend(),
            top_tenants: self.top_tenants(top_n),
            alert_histogram: self.alerts.severity_histogram(),
            alerts_by_type: self.alerts.active_by_type(),
        }
    }

    /// Top-N tenants by the weighted usage score: 40% employees, 30% API
    /// (normalized against the fleet maximum), 20% storage in GB, 10%
    /// alert weight.
    pub fn top_tenants(&self, n: usize) -> Vec<TenantScore> {
        let tenants = self.db.tenants.list();
        let usage: Vec<(Tenant, Option<UsageMetricRow>)> = tenants
            .into_iter()
            .map(|t| {
                let row = self.usage.current_if_exists(&t.tenant_id);
                (t, row)
            })
            .collect();

        let fleet_max_api = usage
            .iter()
            .filter_map(|(_, row)| row.as_ref().map(|r| r.api_request_count))
            .max()
            .unwrap_or(0)
            .max(1);

        let mut scores: Vec<TenantScore> = usage
            .into_iter()
            .map(|(tenant, row)| {
                let employees = row
                    .as_ref()
                    .map(|r| r.employee_count)
                    .unwrap_or_else(|| self.db.employees.count_for_tenant(&tenant.tenant_id) as u64);
                let api = row.as_ref().map(|r| r.api_request_count).unwrap_or(0);
                let storage_gb = row
                    .as_ref()
                    .map(|r| r.storage_bytes_used as f64 / GIB)
                    .unwrap_or(0.0);
                let active_alerts = self.alerts.active_count_for_tenant(&tenant.tenant_id);
                let score = 0.4 * employees as f64
                    + 0.3 * (api as f64 / fleet_max_api as f64 * 100.0)
                    + 0.2 * storage_gb
                    + 0.1 * (active_alerts as f64 * 10.0);
                TenantScore {
                    tenant_id: tenant.tenant_id,
                    name: tenant.name,
                    score,
                    employees,
                    api_requests: api,
                    storage_gb,
                    active_alerts,
                }
            })
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores.truncate(n);
        scores
    }

    // ─── Housekeeping ──────────────────────────────────────────────────────

    pub fn retry_provisioning(&self, tenant_id: &str, operator: &str) -> PlatformResult<Tenant> {
        self.lifecycle.retry_provisioning(tenant_id, operator)
    }

    pub fn force_suspend(&self, tenant_id: &str, reason: &str, operator: &str) -> PlatformResult<Tenant> {
        self.lifecycle.suspend(tenant_id, reason, operator)
    }

    pub fn force_resume(&self, tenant_id: &str, operator: &str) -> PlatformResult<Tenant> {
        self.lifecycle.resume(tenant_id, operator, true)
    }

    pub fn force_cancel(&self, tenant_id: &str, reason: &str, operator: &str) -> PlatformResult<Tenant> {
        self.lifecycle.cancel(tenant_id, reason, operator)
    }

    pub fn trigger_usage_rescan(&self) {
        self.usage.check_all_tenants_usage();
    }

    pub fn export_tenant(&self, tenant_id: &str) -> PlatformResult<serde_json::Value> {
        self.db.export_tenant(tenant_id)
    }
}
