//! Request/response DTOs for the HTTP surface.

use chrono::{DateTime, Utc};
use crewhq_metering::{LimitCheck, UsageMetricRow};
use crewhq_store::TenantStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub tenant_id: String,
    pub status: TenantStatus,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub tenant_id: Option<String>,
    pub role: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordBody {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeBody {
    pub employee_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
    pub position_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateEmployeeBody {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub usage: UsageMetricRow,
    pub limits: Vec<LimitCheck>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub processed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImpersonateBody {
    pub tenant_id: String,
}

#[derive(Debug, Serialize)]
pub struct ImpersonateResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub banner: String,
}

#[derive(Debug, Deserialize)]
pub struct RevokeImpersonationBody {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ReasonBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanBody {
    pub tier: String,
}

#[derive(Debug, Deserialize)]
pub struct OperatorEmployeesQuery {
    /// Empty or absent means all tenants.
    #[serde(default)]
    pub tenant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
    pub tenant_id: Option<String>,
}

fn default_audit_limit() -> usize {
    100
}
