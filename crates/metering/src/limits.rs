//! Plan limit checks and write-path enforcement.

use crate::usage::UsageEngine;
use crewhq_core::error::{PlatformError, PlatformResult};
use crewhq_store::TenantStatus;
use serde::Serialize;

/// A metered dimension compared against plan caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitDimension {
    Employees,
    Users,
    Storage,
    ApiRequestsPerDay,
}

impl LimitDimension {
    pub const ALL: [LimitDimension; 4] = [
        Self::Employees,
        Self::Users,
        Self::Storage,
        Self::ApiRequestsPerDay,
    ];
}

impl std::fmt::Display for LimitDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Employees => "employees",
            Self::Users => "users",
            Self::Storage => "storage",
            Self::ApiRequestsPerDay => "api_requests_per_day",
        };
        f.write_str(s)
    }
}

/// Outcome of a limit check. `limit` of `None` means unbounded.
#[derive(Debug, Clone, Serialize)]
pub struct LimitCheck {
    pub dimension: LimitDimension,
    pub allowed: bool,
    pub current: u64,
    pub limit: Option<u64>,
}

impl LimitCheck {
    /// Usage as a percentage of the limit; 0 when unbounded.
    pub fn percent(&self) -> f64 {
        match self.limit {
            Some(limit) if limit > 0 => self.current as f64 / limit as f64 * 100.0,
            _ => 0.0,
        }
    }
}

impl UsageEngine {
    /// Compare one dimension against the tenant's plan cap. Headroom means
    /// `current < limit`; an absent cap is unbounded.
    pub fn check_limit(
        &self,
        tenant_id: &str,
        dimension: LimitDimension,
    ) -> PlatformResult<LimitCheck> {
        let snapshot = self.entitlements.snapshot(tenant_id)?;
        let row = self.current(tenant_id);

        let (current, limit) = match dimension {
            LimitDimension::Employees => (
                self.db.employees.count_for_tenant(tenant_id) as u64,
                (snapshot.max_employees != u32::MAX).then_some(snapshot.max_employees as u64),
            ),
            LimitDimension::Users => (
                self.db.users.count_for_tenant(tenant_id) as u64,
                snapshot.max_users.map(u64::from),
            ),
            LimitDimension::Storage => (row.storage_bytes_used, snapshot.max_storage_bytes),
            LimitDimension::ApiRequestsPerDay => (
                row.api_request_count_today,
                self.config
                    .usage
                    .api_limit_per_day
                    .get(&snapshot.tier)
                    .copied(),
            ),
        };

        Ok(LimitCheck {
            dimension,
            allowed: limit.map(|l| current < l).unwrap_or(true),
            current,
            limit,
        })
    }

    pub fn check_all_limits(&self, tenant_id: &str) -> PlatformResult<Vec<LimitCheck>> {
        LimitDimension::ALL
            .into_iter()
            .map(|d| self.check_limit(tenant_id, d))
            .collect()
    }

    /// Fail a write when the dimension has no headroom left.
    pub fn enforce_limit(&self, tenant_id: &str, dimension: LimitDimension) -> PlatformResult<()> {
        let check = self.check_limit(tenant_id, dimension)?;
        if check.allowed {
            return Ok(());
        }
        Err(PlatformError::LimitExceeded {
            resource: dimension.to_string(),
            current: check.current,
            limit: check.limit.unwrap_or(0),
        })
    }

    /// Refuse non-idempotent writes for tenants that are not active (e.g.
    /// suspended pending payment).
    pub fn ensure_writable(&self, tenant_id: &str) -> PlatformResult<()> {
        let tenant = self.db.tenants.require(tenant_id)?;
        if tenant.status != TenantStatus::Active || !tenant.subscription_active {
            return Err(PlatformError::SubscriptionInactive(tenant_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::tests::{fixture, provisioned_tenant};
    use crewhq_core::context::TenantContext;
    use crewhq_store::entities::Employee;

    #[test]
    fn test_employee_limit_on_free_plan() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = tenant.tenant_id.clone();
        let ctx = TenantContext::worker(&id);

        // Free plan caps employees at 10.
        for i in 0..10 {
            fx.engine.enforce_limit(&id, LimitDimension::Employees).unwrap();
            fx.engine
                .db
                .create_employee(
                    &ctx,
                    Employee::new(format!("EMP{i:03}"), "First", "Last", format!("e{i}@acme.test")),
                )
                .unwrap();
            fx.engine.update_employee_count(&id);
        }

        let err = fx
            .engine
            .enforce_limit(&id, LimitDimension::Employees)
            .unwrap_err();
        match err {
            PlatformError::LimitExceeded { resource, current, limit } => {
                assert_eq!(resource, "employees");
                assert_eq!(current, 10);
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_api_daily_cap_from_config() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = tenant.tenant_id.clone();

        let check = fx
            .engine
            .check_limit(&id, LimitDimension::ApiRequestsPerDay)
            .unwrap();
        // Free tier daily cap comes from configuration.
        assert_eq!(check.limit, Some(1_000));
        assert!(check.allowed);
    }

    #[test]
    fn test_unbounded_dimensions_pass() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = tenant.tenant_id.clone();
        fx.lifecycle.change_plan(&id, "enterprise", "test").unwrap();

        let checks = fx.engine.check_all_limits(&id).unwrap();
        for check in checks {
            match check.dimension {
                // Enterprise has no employee/user/storage caps.
                LimitDimension::Employees | LimitDimension::Users | LimitDimension::Storage => {
                    assert_eq!(check.limit, None);
                    assert!(check.allowed);
                }
                LimitDimension::ApiRequestsPerDay => assert!(check.limit.is_some()),
            }
        }
    }

    #[test]
    fn test_suspended_tenant_refuses_writes() {
        let fx = fixture();
        let tenant = provisioned_tenant(&fx, "tok-1");
        let id = tenant.tenant_id.clone();

        fx.engine.ensure_writable(&id).unwrap();
        fx.lifecycle.suspend(&id, "payment failure", "test").unwrap();
        assert!(matches!(
            fx.engine.ensure_writable(&id),
            Err(PlatformError::SubscriptionInactive(_))
        ));
    }

    #[test]
    fn test_percent() {
        let check = LimitCheck {
            dimension: LimitDimension::Employees,
            allowed: true,
            current: 9,
            limit: Some(10),
        };
        assert!((check.percent() - 90.0).abs() < f64::EPSILON);
    }
}
