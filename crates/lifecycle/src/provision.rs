//! The provisioning workflow: seed reference data, bind the default plan,
//! create the tenant admin identity, and dispatch the invitation.
//!
//! Every step is written to tolerate a re-run over partial data, so a crash
//! or a failed step can be retried without cleanup.

use crate::manager::LifecycleManager;
use crewhq_core::context::{
    TenantContext, ROLE_ADMIN, ROLE_EMPLOYEE, ROLE_HR, ROLE_SUPER_ADMIN,
};
use crewhq_core::error::{PlatformError, PlatformResult};
use crewhq_core::mailer::OutboundEmail;
use crewhq_core::password;
use crewhq_catalog::{Subscription, SubscriptionPlan};
use crewhq_store::entities::{Department, ModuleEntry, Position, RoleAssignment, RolePermission};
use crewhq_store::{Tenant, User};
use tracing::{debug, info};

/// Global role catalog; effectively immutable at runtime.
pub const GLOBAL_ROLES: [&str; 4] = [ROLE_SUPER_ADMIN, ROLE_ADMIN, ROLE_HR, ROLE_EMPLOYEE];

const DEFAULT_MODULES: [(&str, &str); 8] = [
    ("dashboard", "Dashboard"),
    ("employees", "Employees"),
    ("departments", "Departments"),
    ("positions", "Positions"),
    ("leave", "Leave"),
    ("attendance", "Attendance"),
    ("reports", "Reports"),
    ("settings", "Settings"),
];

const DEFAULT_DEPARTMENTS: [&str; 3] = ["Administration", "Human Resources", "Operations"];

const DEFAULT_POSITIONS: [&str; 4] = ["Administrator", "HR Manager", "Team Lead", "Staff"];

const PAGES: [(&str, &str); 8] = [
    ("/dashboard", "Dashboard"),
    ("/employees", "Employees"),
    ("/departments", "Departments"),
    ("/positions", "Positions"),
    ("/leave", "Leave"),
    ("/attendance", "Attendance"),
    ("/reports", "Reports"),
    ("/settings", "Settings"),
];

/// Hours an invitation reset token stays valid.
const INVITE_TOKEN_TTL_HOURS: i64 = 72;

impl LifecycleManager {
    /// Steps 1-7 of the provisioning workflow. Returns the employee cap of
    /// the bound plan for denormalization onto the tenant row.
    pub(crate) fn run_provisioning_steps(&self, tenant: &Tenant) -> PlatformResult<u32> {
        debug!(roles = ?GLOBAL_ROLES, "Global role catalog present");

        let ctx = TenantContext::worker(&tenant.tenant_id);
        self.seed_reference_data(&ctx)?;
        let (_, plan) = self.ensure_subscription(&tenant.tenant_id)?;
        let (admin, reset_token) = self.ensure_admin_identity(&ctx, tenant)?;
        self.dispatch_invitation(tenant, &admin, &reset_token);

        info!(
            tenant_id = %tenant.tenant_id,
            admin = %admin.email,
            plan = %plan.name,
            "Provisioning steps completed"
        );
        Ok(plan.max_employees)
    }

    /// Seed the module catalog, default departments and positions, and the
    /// role permission matrix. Skips any group that already has rows.
    fn seed_reference_data(&self, ctx: &TenantContext) -> PlatformResult<()> {
        if self.db.modules.count(ctx) == 0 {
            let rows = DEFAULT_MODULES
                .iter()
                .enumerate()
                .map(|(i, (key, label))| ModuleEntry::new(*key, *label, i as u32 + 1))
                .collect();
            self.db.modules.save_many(ctx, rows)?;
        }

        if self.db.departments.count(ctx) == 0 {
            let rows = DEFAULT_DEPARTMENTS.iter().map(|n| Department::new(*n)).collect();
            self.db.departments.save_many(ctx, rows)?;
        }

        if self.db.positions.count(ctx) == 0 {
            let rows = DEFAULT_POSITIONS.iter().map(|t| Position::new(*t)).collect();
            self.db.positions.save_many(ctx, rows)?;
        }

        for (path, name) in PAGES {
            self.db
                .upsert_role_permission(ctx, RolePermission::full(ROLE_ADMIN, path, name))?;
        }
        for (path, name) in PAGES {
            let permission = match path {
                "/employees" | "/leave" | "/attendance" => {
                    RolePermission::full(ROLE_HR, path, name)
                }
                "/settings" => continue,
                _ => RolePermission::read_only(ROLE_HR, path, name),
            };
            self.db.upsert_role_permission(ctx, permission)?;
        }
        for (path, name) in [("/dashboard", "Dashboard"), ("/leave", "Leave")] {
            self.db
                .upsert_role_permission(ctx, RolePermission::read_only(ROLE_EMPLOYEE, path, name))?;
        }
        Ok(())
    }

    /// Bind the default Free plan unless a subscription already exists.
    fn ensure_subscription(
        &self,
        tenant_id: &str,
    ) -> PlatformResult<(Subscription, SubscriptionPlan)> {
        if let Some(existing) = self.book.active_for_tenant(tenant_id) {
            let plan = self
                .catalog
                .get(existing.plan_id)
                .ok_or_else(|| PlatformError::NotFound(format!("plan {}", existing.plan_id)))?;
            return Ok((existing, plan));
        }
        let plan = self
            .catalog
            .find_by_tier("free")
            .ok_or_else(|| PlatformError::NotFound("default free plan".into()))?;
        let sub = self.book.subscribe(tenant_id, &plan, false)?;
        Ok((sub, plan))
    }

    /// Create or link the tenant admin identity and issue a reset token.
    fn ensure_admin_identity(
        &self,
        ctx: &TenantContext,
        tenant: &Tenant,
    ) -> PlatformResult<(User, String)> {
        let admin = match self.db.users.find_by_email(&tenant.admin_email) {
            Some(existing) => self.db.users.assign_tenant(
                existing.id,
                &tenant.tenant_id,
                ROLE_ADMIN,
            )?,
            None => {
                let generated = self.config.password_policy.generate();
                self.db.users.create(
                    &tenant.admin_email,
                    tenant.admin_name.as_deref().unwrap_or(&tenant.admin_email),
                    &password::digest(&generated),
                    Some(&tenant.tenant_id),
                    ROLE_ADMIN,
                )?
            }
        };

        let already_assigned = self
            .db
            .role_assignments
            .list(ctx)
            .into_iter()
            .any(|a| a.user_id == admin.id && a.role_name == ROLE_ADMIN);
        if !already_assigned {
            self.db
                .role_assignments
                .insert(ctx, RoleAssignment::new(admin.id, ROLE_ADMIN));
        }

        let token = password::reset_token();
        self.db
            .users
            .issue_reset_token(admin.id, &token, INVITE_TOKEN_TTL_HOURS)?;
        Ok((admin, token))
    }

    /// Step 7: invitation email carrying the reset token and activation link.
    fn dispatch_invitation(&self, tenant: &Tenant, admin: &User, reset_token: &str) {
        let host = tenant
            .domain
            .clone()
            .unwrap_or_else(|| format!("{}.crewhq.io", tenant.tenant_id));
        self.mailer.send(OutboundEmail {
            to: admin.email.clone(),
            subject: format!("You have been invited to {}", tenant.name),
            body: format!(
                "Set your password to activate your workspace: https://{host}/activate?token={reset_token}"
            ),
        });
    }
}
