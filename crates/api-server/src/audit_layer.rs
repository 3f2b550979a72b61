//! Operator guard and audit trail middleware.
//!
//! The audit layer wraps every operator endpoint and every impersonated
//! request: one Admin Audit row per invocation, with status, duration, and
//! the truncated request body. The row is written after the handler has
//! produced its response, so auditing never alters the business result.

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use crewhq_core::context::TenantContext;
use crewhq_core::error::PlatformError;
use crewhq_operator::AuditEntry;
use std::time::Instant;
use uuid::Uuid;

const MAX_CAPTURED_BODY_BYTES: usize = 1 << 20;

/// Restrict a subtree to SuperAdmin principals.
pub async fn operator_guard(req: Request<Body>, next: Next) -> Response {
    let allowed = req
        .extensions()
        .get::<TenantContext>()
        .map(TenantContext::is_super_admin)
        .unwrap_or(false);
    if !allowed {
        return ApiError(PlatformError::PermissionDenied(
            "operator endpoints require SuperAdmin".into(),
        ))
        .into_response();
    }
    next.run(req).await
}

/// Record an Admin Audit row for operator endpoints and impersonated
/// requests.
pub async fn audit_trail(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ctx = req.extensions().get::<TenantContext>().cloned();
    let impersonated = ctx.as_ref().map(TenantContext::is_impersonated).unwrap_or(false);
    let operator_path = req.uri().path().starts_with("/api/v1/operator");
    if !impersonated && !operator_path {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let ip_address = header_string(&req, "x-forwarded-for");
    let user_agent = header_string(&req, "user-agent");

    // Buffer the body so it can be both audited and handed to the handler.
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_CAPTURED_BODY_BYTES)
        .await
        .unwrap_or_else(|_| Bytes::new());
    let payload = (!bytes.is_empty()).then(|| String::from_utf8_lossy(&bytes).to_string());
    let req = Request::from_parts(parts, Body::from(bytes));

    let started = Instant::now();
    let response = next.run(req).await;
    let status_code = response.status().as_u16();

    let (actor_user_id, actor_email) = match &ctx {
        Some(c) => (
            c.actor_user_id.unwrap_or_else(Uuid::nil),
            c.actor_email.clone().unwrap_or_default(),
        ),
        None => (Uuid::nil(), String::new()),
    };
    let target_tenant_id = if impersonated {
        ctx.as_ref().map(|c| c.tenant_id.clone())
    } else {
        tenant_from_path(&path)
    };

    let entry = AuditEntry {
        actor_user_id,
        actor_email,
        method,
        endpoint: path,
        status_code,
        target_tenant_id,
        target_entity: None,
        request_payload: payload,
        error_message: (status_code >= 400).then(|| format!("request failed ({status_code})")),
        impersonated,
        ip_address,
        user_agent,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    state.audit_log.record(entry);

    response
}

fn header_string(req: &Request<Body>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `/api/v1/operator/tenants/{id}/...` -> `{id}`.
fn tenant_from_path(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "tenants" {
            return segments.next().map(str::to_string);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_from_path() {
        assert_eq!(
            tenant_from_path("/api/v1/operator/tenants/7/suspend"),
            Some("7".to_string())
        );
        assert_eq!(
            tenant_from_path("/api/v1/operator/tenants/7"),
            Some("7".to_string())
        );
        assert_eq!(tenant_from_path("/api/v1/operator/dashboard"), None);
    }
}
