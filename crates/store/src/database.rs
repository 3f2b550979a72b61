//! The platform database: one struct bundling the tenant registry, the user
//! directory, and every tenant-scoped collection, with the cross-collection
//! operations (uniqueness checks, tenant purge, archive export).

use crate::entities::{
    Department, Employee, ModuleEntry, Position, RoleAssignment, RolePermission,
};
use crate::scoped::ScopedCollection;
use crate::tenants::TenantRegistry;
use crate::users::UserDirectory;
use crewhq_core::context::TenantContext;
use crewhq_core::error::{PlatformError, PlatformResult};
use serde::Serialize;
use tracing::info;

/// Row counts removed by a tenant purge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeSummary {
    pub role_assignments: usize,
    pub role_permissions: usize,
    pub employees: usize,
    pub positions: usize,
    pub departments: usize,
    pub modules: usize,
    pub users: usize,
}

impl PurgeSummary {
    pub fn total(&self) -> usize {
        self.role_assignments
            + self.role_permissions
            + self.employees
            + self.positions
            + self.departments
            + self.modules
            + self.users
    }
}

/// In-memory platform store. Swap for PostgreSQL in production; the API
/// surface stays the same.
pub struct Database {
    pub tenants: TenantRegistry,
    pub users: UserDirectory,
    pub employees: ScopedCollection<Employee>,
    pub departments: ScopedCollection<Department>,
    pub positions: ScopedCollection<Position>,
    pub modules: ScopedCollection<ModuleEntry>,
    pub role_permissions: ScopedCollection<RolePermission>,
    pub role_assignments: ScopedCollection<RoleAssignment>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    pub fn new() -> Self {
        info!("Platform store initialized (in-memory, development mode)");
        Self {
            tenants: TenantRegistry::new(),
            users: UserDirectory::new(),
            employees: ScopedCollection::new("employee"),
            departments: ScopedCollection::new("department"),
            positions: ScopedCollection::new("position"),
            modules: ScopedCollection::new("module"),
            role_permissions: ScopedCollection::new("role_permission"),
            role_assignments: ScopedCollection::new("role_assignment"),
        }
    }

    /// Insert an employee, enforcing the `(tenant_id, employee_id)` unique
    /// index.
    pub fn create_employee(
        &self,
        ctx: &TenantContext,
        employee: Employee,
    ) -> PlatformResult<Employee> {
        let duplicate = self
            .employees
            .list(ctx)
            .into_iter()
            .any(|e| e.employee_id == employee.employee_id);
        if duplicate {
            return Err(PlatformError::Conflict(format!(
                "Employee id already in use: {}",
                employee.employee_id
            )));
        }
        Ok(self.employees.insert(ctx, employee))
    }

    /// Insert or update a role permission, enforcing the
    /// `(tenant_id, role_name, page_path)` unique index.
    pub fn upsert_role_permission(
        &self,
        ctx: &TenantContext,
        permission: RolePermission,
    ) -> PlatformResult<RolePermission> {
        let existing = self
            .role_permissions
            .list(ctx)
            .into_iter()
            .find(|p| p.role_name == permission.role_name && p.page_path == permission.page_path);

        match existing {
            Some(current) => self.role_permissions.update(ctx, current.id, |row| {
                row.page_name = permission.page_name.clone();
                row.can_access = permission.can_access;
                row.can_view = permission.can_view;
                row.can_create = permission.can_create;
                row.can_edit = permission.can_edit;
                row.can_delete = permission.can_delete;
            }),
            None => Ok(self.role_permissions.insert(ctx, permission)),
        }
    }

    /// Look up the effective permission row for a role on a page.
    /// SuperAdmin short-circuits every check.
    pub fn permission_allows(
        &self,
        ctx: &TenantContext,
        role_name: &str,
        page_path: &str,
    ) -> bool {
        if ctx.is_super_admin() {
            return true;
        }
        self.role_permissions
            .list(ctx)
            .into_iter()
            .find(|p| p.role_name == role_name && p.page_path == page_path)
            .map(|p| p.can_access)
            .unwrap_or(false)
    }

    /// Remove every row owned by a tenant, child tables before parents.
    /// The tenant registry row itself is kept (status `Deleted`).
    pub fn purge_tenant(&self, tenant_id: &str) -> PurgeSummary {
        let summary = PurgeSummary {
            role_assignments: self.role_assignments.purge_tenant(tenant_id),
            role_permissions: self.role_permissions.purge_tenant(tenant_id),
            employees: self.employees.purge_tenant(tenant_id),
            positions: self.positions.purge_tenant(tenant_id),
            departments: self.departments.purge_tenant(tenant_id),
            modules: self.modules.purge_tenant(tenant_id),
            users: self.users.purge_tenant(tenant_id),
        };
        info!(
            tenant_id = %tenant_id,
            rows = summary.total(),
            "Tenant data purged"
        );
        summary
    }

    /// Full JSON bundle of a tenant's scoped rows, for the export endpoint
    /// available during the retention window.
    pub fn export_tenant(&self, tenant_id: &str) -> PlatformResult<serde_json::Value> {
        let tenant = self.tenants.require(tenant_id)?;
        let ctx = TenantContext::worker(tenant_id);
        Ok(serde_json::json!({
            "tenant": tenant,
            "employees": self.employees.list(&ctx),
            "departments": self.departments.list(&ctx),
            "positions": self.positions.list(&ctx),
            "modules": self.modules.list(&ctx),
            "role_permissions": self.role_permissions.list(&ctx),
            "role_assignments": self.role_assignments.list(&ctx),
            "users": self.users.list_for_tenant(tenant_id),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewhq_core::context::ResolutionSource;

    fn ctx(tenant: &str) -> TenantContext {
        TenantContext::for_tenant(tenant, ResolutionSource::Claims)
    }

    #[test]
    fn test_employee_business_key_unique_per_tenant() {
        let db = Database::new();
        let a = ctx("1");
        db.create_employee(&a, Employee::new("EMP001", "Ada", "Lovelace", "ada@acme.test"))
            .unwrap();

        let err = db
            .create_employee(&a, Employee::new("EMP001", "Dup", "Person", "dup@acme.test"))
            .unwrap_err();
        assert!(matches!(err, PlatformError::Conflict(_)));

        // Same business key under another tenant is fine.
        db.create_employee(&ctx("2"), Employee::new("EMP001", "Grace", "Hopper", "g@globex.test"))
            .unwrap();
    }

    #[test]
    fn test_role_permission_upsert() {
        let db = Database::new();
        let a = ctx("1");
        db.upsert_role_permission(&a, RolePermission::full("Admin", "/employees", "Employees"))
            .unwrap();
        db.upsert_role_permission(&a, RolePermission::read_only("Admin", "/employees", "Employees"))
            .unwrap();

        let rows = db.role_permissions.list(&a);
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].can_edit);
        assert!(db.permission_allows(&a, "Admin", "/employees"));
        assert!(!db.permission_allows(&a, "Admin", "/payroll"));
    }

    #[test]
    fn test_purge_and_export() {
        let db = Database::new();
        let t = db
            .tenants
            .create("Acme", None, "a@acme.test", "tok-1")
            .unwrap();
        let a = ctx(&t.tenant_id);
        db.departments.insert(&a, Department::new("Engineering"));
        db.create_employee(&a, Employee::new("EMP001", "Ada", "Lovelace", "ada@acme.test"))
            .unwrap();

        let bundle = db.export_tenant(&t.tenant_id).unwrap();
        assert_eq!(bundle["employees"].as_array().unwrap().len(), 1);
        assert_eq!(bundle["departments"].as_array().unwrap().len(), 1);

        let summary = db.purge_tenant(&t.tenant_id);
        assert_eq!(summary.employees, 1);
        assert_eq!(summary.departments, 1);
        assert_eq!(db.employees.count_for_tenant(&t.tenant_id), 0);
    }
}
