//! Tenant resolution middleware. Runs before routing handlers: derives the
//! request's tenant context from the bearer credential, host subdomain, or
//! tenant headers and publishes it as a request extension. Downstream code
//! never reads the tenant headers again.

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, COOKIE, HOST};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use crewhq_core::context::{
    resolve_tenant, ImpersonationStamp, ResolutionInputs, ResolutionSource, TenantContext,
    ROLE_ADMIN,
};
use crewhq_core::error::{PlatformError, PlatformResult};

pub async fn resolve_tenant_layer(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match build_context(&state, req.headers()) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => ApiError(e).into_response(),
    }
}

fn build_context(state: &AppState, headers: &HeaderMap) -> PlatformResult<TenantContext> {
    let token = bearer_token(headers);

    // An impersonation token swaps the tenant context; isolation then
    // treats the operator exactly like a tenant admin.
    if let Some(token) = token.as_deref() {
        if let Some(session) = state.sessions.validate(token) {
            return resolve_for_session(state, headers, session);
        }
        if let Ok(grant) = state.impersonation.validate(token) {
            let mut ctx =
                TenantContext::for_tenant(&grant.tenant_id, ResolutionSource::Impersonation);
            ctx.actor_user_id = Some(grant.operator_id);
            ctx.actor_email = Some(grant.operator_email.clone());
            ctx.role = Some(ROLE_ADMIN.to_string());
            ctx.impersonation = Some(ImpersonationStamp {
                grant_id: grant.id,
                operator_id: grant.operator_id,
                operator_email: grant.operator_email,
                expires_at: grant.expires_at,
            });
            return Ok(ctx);
        }
        return Err(PlatformError::Unauthenticated);
    }

    resolve_anonymous(state, headers)
}

fn resolve_for_session(
    state: &AppState,
    headers: &HeaderMap,
    session: crate::sessions::Session,
) -> PlatformResult<TenantContext> {
    let inputs = ResolutionInputs {
        claim_tenant: session.tenant_id.as_deref(),
        host: header_str(headers, HOST.as_str()),
        header_tenant_id: header_str(headers, "x-tenant-id"),
        header_tenant_domain: header_str(headers, "x-tenant-domain"),
    };
    let (tenant_id, source) = resolve_tenant(&inputs, |domain| {
        state.db.tenants.find_by_domain(domain).map(|t| t.tenant_id)
    })?;
    Ok(TenantContext::for_tenant(tenant_id, source).with_actor(
        session.user_id,
        session.email,
        session.role,
    ))
}

fn resolve_anonymous(state: &AppState, headers: &HeaderMap) -> PlatformResult<TenantContext> {
    let inputs = ResolutionInputs {
        claim_tenant: None,
        host: header_str(headers, HOST.as_str()),
        header_tenant_id: header_str(headers, "x-tenant-id"),
        header_tenant_domain: header_str(headers, "x-tenant-domain"),
    };
    let (tenant_id, source) = resolve_tenant(&inputs, |domain| {
        state.db.tenants.find_by_domain(domain).map(|t| t.tenant_id)
    })?;
    Ok(TenantContext::for_tenant(tenant_id, source))
}

/// `Authorization: Bearer <token>` or the `accessToken` cookie.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_str(headers, AUTHORIZATION.as_str()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }
    header_str(headers, COOKIE.as_str()).and_then(|cookies| {
        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == "accessToken").then(|| value.to_string())
        })
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewhq_core::config::PlatformConfig;
    use crewhq_core::mailer::LogMailer;
    use std::sync::Arc;

    fn state() -> AppState {
        AppState::new(PlatformConfig::default(), Arc::new(LogMailer))
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).expect("header name"),
                value.parse().expect("header value"),
            );
        }
        map
    }

    #[test]
    fn test_anonymous_header_resolution() {
        let state = state();
        let ctx = build_context(&state, &headers(&[("x-tenant-id", "7")])).unwrap();
        assert_eq!(ctx.tenant_id, "7");
        assert_eq!(ctx.source, ResolutionSource::HeaderId);
        assert!(!ctx.bypass_filter);
    }

    #[test]
    fn test_subdomain_beats_header() {
        let state = state();
        let ctx = build_context(
            &state,
            &headers(&[("host", "acme.crewhq.io"), ("x-tenant-id", "9")]),
        )
        .unwrap();
        assert_eq!(ctx.tenant_id, "acme");
        assert_eq!(ctx.source, ResolutionSource::Subdomain);
    }

    #[test]
    fn test_platform_default() {
        let state = state();
        let ctx = build_context(&state, &headers(&[("host", "localhost:8080")])).unwrap();
        assert_eq!(ctx.tenant_id, "default");
    }

    #[test]
    fn test_invalid_token_rejected() {
        let state = state();
        let err = build_context(
            &state,
            &headers(&[("authorization", "Bearer not-a-real-token")]),
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::Unauthenticated));
    }

    #[test]
    fn test_session_claim_vs_header_mismatch() {
        let state = state();
        state.seed_operator("ops@crewhq.io", "Operator-Pass-1!").unwrap();
        // A tenant-bound user whose claim conflicts with the header.
        state
            .db
            .users
            .create(
                "a@acme.test",
                "Ada",
                &crewhq_core::password::digest("Sound-Password-42"),
                Some("1"),
                "Admin",
            )
            .unwrap();
        let session = state
            .sessions
            .login(&state.db.users, "a@acme.test", "Sound-Password-42")
            .unwrap();

        let err = build_context(
            &state,
            &headers(&[
                ("authorization", &format!("Bearer {}", session.token)),
                ("x-tenant-id", "2"),
            ]),
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::TenantMismatch));
    }

    #[test]
    fn test_super_admin_session_gets_bypass() {
        let state = state();
        state.seed_operator("ops@crewhq.io", "Operator-Pass-1!").unwrap();
        let session = state
            .sessions
            .login(&state.db.users, "ops@crewhq.io", "Operator-Pass-1!")
            .unwrap();

        let ctx = build_context(
            &state,
            &headers(&[("authorization", &format!("Bearer {}", session.token))]),
        )
        .unwrap();
        assert!(ctx.is_super_admin());
        assert!(ctx.bypass_filter);
        assert_eq!(ctx.tenant_id, "default");
    }

    #[test]
    fn test_impersonation_token_swaps_context() {
        let state = state();
        let grant = state
            .impersonation
            .issue(uuid::Uuid::new_v4(), "ops@crewhq.io", "3");

        let ctx = build_context(
            &state,
            &headers(&[("authorization", &format!("Bearer {}", grant.token))]),
        )
        .unwrap();
        assert_eq!(ctx.tenant_id, "3");
        assert!(ctx.is_impersonated());
        // Isolation applies as a tenant admin, not as SuperAdmin.
        assert!(!ctx.bypass_filter);
        assert_eq!(
            ctx.impersonation.as_ref().map(|s| s.operator_email.as_str()),
            Some("ops@crewhq.io")
        );
    }

    #[test]
    fn test_cookie_token() {
        let state = state();
        state.seed_operator("ops@crewhq.io", "Operator-Pass-1!").unwrap();
        let session = state
            .sessions
            .login(&state.db.users, "ops@crewhq.io", "Operator-Pass-1!")
            .unwrap();
        let cookie = format!("theme=dark; accessToken={}", session.token);
        let ctx = build_context(&state, &headers(&[("cookie", &cookie)])).unwrap();
        assert!(ctx.is_super_admin());
    }
}
