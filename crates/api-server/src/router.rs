//! Router assembly. Tenant resolution runs before every route; the operator
//! subtree adds the SuperAdmin guard; the audit layer wraps operator and
//! impersonated traffic.

use crate::audit_layer;
use crate::handlers;
use crate::state::AppState;
use crate::tenant_layer;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route("/tenants", get(handlers::operator_list_tenants))
        .route("/tenants/:id", get(handlers::operator_tenant_detail))
        .route("/tenants/:id/suspend", post(handlers::operator_suspend))
        .route("/tenants/:id/resume", post(handlers::operator_resume))
        .route("/tenants/:id/cancel", post(handlers::operator_cancel))
        .route(
            "/tenants/:id/retry-provisioning",
            post(handlers::operator_retry_provisioning),
        )
        .route("/tenants/:id/export", get(handlers::operator_export_tenant))
        .route("/employees", get(handlers::operator_employees))
        .route("/dashboard", get(handlers::operator_dashboard))
        .route("/usage/rescan", post(handlers::operator_usage_rescan))
        .route(
            "/impersonate",
            post(handlers::operator_impersonate)
                .delete(handlers::operator_revoke_impersonation),
        )
        .route("/alerts", get(handlers::operator_list_alerts))
        .route(
            "/alerts/:id/acknowledge",
            post(handlers::operator_acknowledge_alert),
        )
        .route("/alerts/:id/resolve", post(handlers::operator_resolve_alert))
        .route("/audit-log", get(handlers::operator_audit_log))
        .route("/webhooks/review", get(handlers::operator_webhook_review))
        .route_layer(middleware::from_fn(audit_layer::operator_guard));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::readiness))
        .route("/api/v1/signup", post(handlers::signup))
        .route("/api/v1/auth/login", post(handlers::login))
        .route("/api/v1/auth/reset-password", post(handlers::reset_password))
        .route("/api/v1/plans", get(handlers::list_plans))
        .route("/api/v1/usage", get(handlers::tenant_usage))
        .route("/api/v1/subscription/plan", post(handlers::change_plan))
        .route(
            "/api/v1/employees",
            get(handlers::list_employees).post(handlers::create_employee),
        )
        .route(
            "/api/v1/employees/:id",
            get(handlers::get_employee)
                .put(handlers::update_employee)
                .delete(handlers::delete_employee),
        )
        .route("/webhooks/:provider", post(handlers::receive_webhook))
        .nest("/api/v1/operator", operator_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            audit_layer::audit_trail,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            tenant_layer::resolve_tenant_layer,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
