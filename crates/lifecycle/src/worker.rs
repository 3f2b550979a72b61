//! Background maintenance: re-drives interrupted provisioning and walks
//! cancelled tenants through retention into hard deletion. Crash-safe by
//! construction: all work is derived from durable tenant rows.

use crate::manager::LifecycleManager;
use chrono::Utc;
use crewhq_store::TenantStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

pub struct MaintenanceWorker {
    manager: Arc<LifecycleManager>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl MaintenanceWorker {
    pub fn new(
        manager: Arc<LifecycleManager>,
        interval_secs: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            manager,
            interval: Duration::from_secs(interval_secs.max(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Maintenance worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Maintenance worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over all tenants. Also invoked directly by the operator
    /// housekeeping endpoint.
    pub fn sweep(&self) {
        let now = Utc::now();
        for tenant in self.manager.db.tenants.list() {
            if *self.shutdown.borrow() {
                // Finish the in-flight tenant, then stop picking up work.
                return;
            }
            let id = tenant.tenant_id.clone();
            let due = tenant
                .scheduled_deletion_at
                .map(|at| at <= now)
                .unwrap_or(false);
            let result = match tenant.status {
                TenantStatus::Provisioning => self.manager.provision(&id).map(|_| ()),
                TenantStatus::Cancelled if due => {
                    self.manager.mark_for_deletion(&id, "maintenance").map(|_| ())
                }
                TenantStatus::PendingDeletion if due => {
                    self.manager.delete(&id, "maintenance").map(|_| ())
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                error!(tenant_id = %id, error = %e, "Maintenance step failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::manager_with_mailer;
    use crate::manager::SignupRequest;
    use chrono::Duration as ChronoDuration;

    fn worker(manager: Arc<LifecycleManager>) -> MaintenanceWorker {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        MaintenanceWorker::new(manager, 60, rx)
    }

    #[test]
    fn test_sweep_completes_interrupted_provisioning() {
        let (manager, _) = manager_with_mailer();
        let tenant = manager
            .signup(&SignupRequest {
                tenant_name: "acme".into(),
                domain: None,
                admin_email: "a@acme.test".into(),
                admin_name: None,
                idempotency_token: "tok-1".into(),
            })
            .unwrap();

        worker(manager.clone()).sweep();
        let row = manager.db.tenants.require(&tenant.tenant_id).unwrap();
        assert_eq!(row.status, TenantStatus::Active);
    }

    #[test]
    fn test_sweep_walks_retention_into_deletion() {
        let (manager, _) = manager_with_mailer();
        let tenant = manager
            .signup(&SignupRequest {
                tenant_name: "acme".into(),
                domain: None,
                admin_email: "a@acme.test".into(),
                admin_name: None,
                idempotency_token: "tok-1".into(),
            })
            .unwrap();
        let id = tenant.tenant_id.clone();
        manager.provision(&id).unwrap();
        manager.cancel(&id, "churn", "operator").unwrap();

        let w = worker(manager.clone());

        // Retention not elapsed: nothing moves.
        w.sweep();
        assert_eq!(
            manager.db.tenants.require(&id).unwrap().status,
            TenantStatus::Cancelled
        );

        // Backdate the deletion schedule past due.
        manager
            .db
            .tenants
            .mutate(&id, |row| {
                row.scheduled_deletion_at = Some(Utc::now() - ChronoDuration::days(1));
            })
            .unwrap();

        w.sweep();
        assert_eq!(
            manager.db.tenants.require(&id).unwrap().status,
            TenantStatus::PendingDeletion
        );

        w.sweep();
        let row = manager.db.tenants.require(&id).unwrap();
        assert_eq!(row.status, TenantStatus::Deleted);
        assert_eq!(manager.db.employees.count_for_tenant(&id), 0);
    }
}
