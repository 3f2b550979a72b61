//! Axum handlers for the control plane API.

use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::Utc;
use crewhq_core::context::{TenantContext, PLATFORM_TENANT};
use crewhq_core::error::{PlatformError, PlatformResult};
use crewhq_lifecycle::SignupRequest;
use crewhq_operator::{OperatorDashboard, Page, TenantDetail, TenantListQuery, TenantSummaryRow};
use crewhq_store::entities::Employee;
use crewhq_store::{OperatorRow, Tenant};
use crewhq_webhooks::WebhookEvent;
use uuid::Uuid;

/// Tenant-scoped endpoints need a real, registered tenant.
fn require_tenant(state: &AppState, ctx: &TenantContext) -> PlatformResult<Tenant> {
    if ctx.tenant_id == PLATFORM_TENANT {
        return Err(PlatformError::TenantRequired);
    }
    state.db.tenants.require(&ctx.tenant_id)
}

// ─── Health ────────────────────────────────────────────────────────────────

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

// ─── Signup & auth ─────────────────────────────────────────────────────────

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let tenant = state.lifecycle.signup(&req)?;
    // Drive provisioning inline; a failure leaves the row for the
    // maintenance worker and the response reports the current status.
    let tenant = match state.lifecycle.provision(&tenant.tenant_id) {
        Ok(t) => t,
        Err(_) => state.db.tenants.require(&tenant.tenant_id)?,
    };
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            tenant_id: tenant.tenant_id,
            status: tenant.status,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session = state
        .sessions
        .login(&state.db.users, &body.email, &body.password)?;
    Ok(Json(LoginResponse {
        token: session.token.clone(),
        tenant_id: session.tenant_id.clone(),
        role: session.role.clone(),
        expires_at: session.expires_at,
    }))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordBody>,
) -> Result<StatusCode, ApiError> {
    state.config.password_policy.validate(&body.new_password)?;
    let digest = crewhq_core::password::digest(&body.new_password);
    state.db.users.consume_reset_token(&body.token, &digest)?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Employees (tenant-scoped) ─────────────────────────────────────────────

pub async fn list_employees(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<Vec<Employee>>, ApiError> {
    require_tenant(&state, &ctx)?;
    state.track_api_request(&ctx)?;
    Ok(Json(state.db.employees.list(&ctx)))
}

pub async fn create_employee(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<CreateEmployeeBody>,
) -> Result<(StatusCode, Json<Employee>), ApiError> {
    require_tenant(&state, &ctx)?;
    state.track_api_request(&ctx)?;
    state.usage.ensure_writable(&ctx.tenant_id)?;
    state
        .usage
        .enforce_limit(&ctx.tenant_id, crewhq_metering::LimitDimension::Employees)?;

    let mut employee = Employee::new(body.employee_id, body.first_name, body.last_name, body.email);
    employee.department_id = body.department_id;
    employee.position_id = body.position_id;
    let employee = state.db.create_employee(&ctx, employee)?;
    state.usage.update_employee_count(&ctx.tenant_id);
    Ok((StatusCode::CREATED, Json(employee)))
}

pub async fn get_employee(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Employee>, ApiError> {
    require_tenant(&state, &ctx)?;
    state.track_api_request(&ctx)?;
    Ok(Json(state.db.employees.get(&ctx, id)?))
}

pub async fn update_employee(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateEmployeeBody>,
) -> Result<Json<Employee>, ApiError> {
    require_tenant(&state, &ctx)?;
    state.track_api_request(&ctx)?;
    state.usage.ensure_writable(&ctx.tenant_id)?;
    let employee = state.db.employees.update(&ctx, id, |e| {
        if let Some(first_name) = &body.first_name {
            e.first_name = first_name.clone();
        }
        if let Some(last_name) = &body.last_name {
            e.last_name = last_name.clone();
        }
        if let Some(email) = &body.email {
            e.email = email.clone();
        }
        if let Some(active) = body.active {
            e.active = active;
        }
        e.updated_at = Utc::now();
    })?;
    Ok(Json(employee))
}

pub async fn delete_employee(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require_tenant(&state, &ctx)?;
    state.track_api_request(&ctx)?;
    state.usage.ensure_writable(&ctx.tenant_id)?;
    state.db.employees.delete(&ctx, id)?;
    state.usage.update_employee_count(&ctx.tenant_id);
    Ok(StatusCode::NO_CONTENT)
}

// ─── Plans & usage ─────────────────────────────────────────────────────────

pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<crewhq_catalog::SubscriptionPlan>> {
    Json(state.catalog.list_visible())
}

pub async fn tenant_usage(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> Result<Json<UsageResponse>, ApiError> {
    require_tenant(&state, &ctx)?;
    Ok(Json(UsageResponse {
        usage: state.usage.current(&ctx.tenant_id),
        limits: state.usage.check_all_limits(&ctx.tenant_id)?,
    }))
}

pub async fn change_plan(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<ChangePlanBody>,
) -> Result<Json<crewhq_catalog::Subscription>, ApiError> {
    require_tenant(&state, &ctx)?;
    let actor = ctx.actor_email.clone().unwrap_or_else(|| "tenant-admin".into());
    Ok(Json(state.lifecycle.change_plan(
        &ctx.tenant_id,
        &body.tier,
        &actor,
    )?))
}

// ─── Webhooks ──────────────────────────────────────────────────────────────

pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<WebhookAck>, ApiError> {
    let event_id = payload
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlatformError::Validation("event id is required".into()))?
        .to_string();
    let event_type = payload
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    // Signature verification belongs to the transport; its verdict arrives
    // as a header and invalid events are kept for review, not dispatched.
    let signature_valid = headers
        .get("x-webhook-signature")
        .map(|_| true)
        .unwrap_or(false);

    let event = state
        .ingestor
        .ingest(&provider, &event_id, &event_type, payload, signature_valid)?;
    Ok(Json(WebhookAck {
        received: true,
        processed: event.processed,
    }))
}

// ─── Operator surface ──────────────────────────────────────────────────────

pub async fn operator_list_tenants(
    State(state): State<AppState>,
    Query(query): Query<TenantListQuery>,
) -> Json<Page<TenantSummaryRow>> {
    Json(state.console.list_tenants(&query))
}

pub async fn operator_tenant_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TenantDetail>, ApiError> {
    Ok(Json(state.console.tenant_detail(&id)?))
}

pub async fn operator_dashboard(State(state): State<AppState>) -> Json<OperatorDashboard> {
    Json(state.console.dashboard(10))
}

pub async fn operator_employees(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<OperatorEmployeesQuery>,
) -> Result<Json<Vec<OperatorRow<Employee>>>, ApiError> {
    Ok(Json(
        state.db.employees.list_for_operator(&ctx, &query.tenant_id)?,
    ))
}

pub async fn operator_suspend(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<Tenant>, ApiError> {
    let operator = operator_name(&ctx);
    Ok(Json(state.console.force_suspend(&id, &body.reason, &operator)?))
}

pub async fn operator_resume(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    Ok(Json(state.console.force_resume(&id, &operator_name(&ctx))?))
}

pub async fn operator_cancel(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Json<Tenant>, ApiError> {
    let operator = operator_name(&ctx);
    Ok(Json(state.console.force_cancel(&id, &body.reason, &operator)?))
}

pub async fn operator_retry_provisioning(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    Ok(Json(
        state.console.retry_provisioning(&id, &operator_name(&ctx))?,
    ))
}

pub async fn operator_usage_rescan(State(state): State<AppState>) -> StatusCode {
    state.console.trigger_usage_rescan();
    StatusCode::ACCEPTED
}

pub async fn operator_export_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.console.export_tenant(&id)?))
}

pub async fn operator_impersonate(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<ImpersonateBody>,
) -> Result<(StatusCode, Json<ImpersonateResponse>), ApiError> {
    state.db.tenants.require(&body.tenant_id)?;
    let operator_id = ctx.actor_user_id.ok_or(PlatformError::Unauthenticated)?;
    let operator_email = ctx.actor_email.clone().ok_or(PlatformError::Unauthenticated)?;
    let grant = state
        .impersonation
        .issue(operator_id, &operator_email, &body.tenant_id);
    Ok((
        StatusCode::CREATED,
        Json(ImpersonateResponse {
            token: grant.token.clone(),
            expires_at: grant.expires_at,
            banner: grant.banner(),
        }),
    ))
}

pub async fn operator_revoke_impersonation(
    State(state): State<AppState>,
    Json(body): Json<RevokeImpersonationBody>,
) -> Result<StatusCode, ApiError> {
    if state.impersonation.revoke(&body.token) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PlatformError::NotFound("impersonation grant".into()).into())
    }
}

pub async fn operator_list_alerts(State(state): State<AppState>) -> Json<Vec<crewhq_alerts::Alert>> {
    Json(state.alerts.list_active())
}

pub async fn operator_acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crewhq_alerts::Alert>, ApiError> {
    Ok(Json(state.alerts.acknowledge(id)?))
}

pub async fn operator_resolve_alert(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crewhq_alerts::Alert>, ApiError> {
    Ok(Json(state.alerts.resolve(id)?))
}

pub async fn operator_audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Json<Vec<crewhq_operator::AdminAudit>> {
    Json(
        state
            .audit_log
            .query(None, query.tenant_id.as_deref(), None, query.limit),
    )
}

pub async fn operator_webhook_review(
    State(state): State<AppState>,
) -> Json<Vec<WebhookEvent>> {
    Json(state.ingestor.needing_review())
}

fn operator_name(ctx: &TenantContext) -> String {
    ctx.actor_email.clone().unwrap_or_else(|| "operator".into())
}
