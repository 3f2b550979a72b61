//! Tenant-scoped reference entities. The HR domain itself is out of scope;
//! these rows exist so isolation, provisioning seeds, and usage counting
//! have real data to operate on.

use crate::scoped::TenantScoped;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub tenant_id: String,
    /// Business key, unique within a tenant (e.g. "EMP001").
    pub employee_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
    pub position_id: Option<Uuid>,
    pub hired_on: Option<NaiveDate>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn new(employee_id: impl Into<String>, first_name: impl Into<String>, last_name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: String::new(),
            employee_id: employee_id.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            department_id: None,
            position_id: None,
            hired_on: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Department {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: String::new(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub tenant_id: String,
    pub title: String,
    pub department_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Position {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: String::new(),
            title: title.into(),
            department_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Ordered navigation entry seeded per tenant at provisioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub key: String,
    pub label: String,
    pub nav_order: u32,
    pub enabled: bool,
}

impl ModuleEntry {
    pub fn new(key: impl Into<String>, label: impl Into<String>, nav_order: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: String::new(),
            key: key.into(),
            label: label.into(),
            nav_order,
            enabled: true,
        }
    }
}

/// Per-tenant page permission for a role. Unique on
/// `(tenant_id, role_name, page_path)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermission {
    pub id: Uuid,
    pub tenant_id: String,
    pub role_name: String,
    pub page_path: String,
    pub page_name: String,
    pub can_access: bool,
    pub can_view: bool,
    pub can_create: bool,
    pub can_edit: bool,
    pub can_delete: bool,
}

impl RolePermission {
    pub fn full(role_name: impl Into<String>, page_path: impl Into<String>, page_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: String::new(),
            role_name: role_name.into(),
            page_path: page_path.into(),
            page_name: page_name.into(),
            can_access: true,
            can_view: true,
            can_create: true,
            can_edit: true,
            can_delete: true,
        }
    }

    pub fn read_only(role_name: impl Into<String>, page_path: impl Into<String>, page_name: impl Into<String>) -> Self {
        Self {
            can_create: false,
            can_edit: false,
            can_delete: false,
            ..Self::full(role_name, page_path, page_name)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: Uuid,
    pub role_name: String,
    pub assigned_at: DateTime<Utc>,
}

impl RoleAssignment {
    pub fn new(user_id: Uuid, role_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: String::new(),
            user_id,
            role_name: role_name.into(),
            assigned_at: Utc::now(),
        }
    }
}

macro_rules! impl_tenant_scoped {
    ($($ty:ty),+) => {
        $(impl TenantScoped for $ty {
            fn key(&self) -> Uuid {
                self.id
            }
            fn tenant_id(&self) -> &str {
                &self.tenant_id
            }
            fn stamp_tenant(&mut self, tenant_id: &str) {
                self.tenant_id = tenant_id.to_string();
            }
        })+
    };
}

impl_tenant_scoped!(
    Employee,
    Department,
    Position,
    ModuleEntry,
    RolePermission,
    RoleAssignment
);
