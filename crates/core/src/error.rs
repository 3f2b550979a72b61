use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Platform-wide error taxonomy. Every variant maps to a stable wire code
/// and an HTTP status so handlers never invent ad-hoc responses.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Tenant required for this endpoint")]
    TenantRequired,

    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Tenant identity in credential does not match request")]
    TenantMismatch,

    #[error("Cross-tenant access refused")]
    CrossTenantAccess,

    #[error("Subscription inactive for tenant {0}")]
    SubscriptionInactive(String),

    #[error("{resource} limit exceeded ({current}/{limit})")]
    LimitExceeded {
        resource: String,
        current: u64,
        limit: u64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transition from {from} to {to} is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Immutable field mutated: {0}")]
    ImmutableField(&'static str),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PlatformError {
    /// Stable machine-readable code returned in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied(_) => "permission_denied",
            Self::TenantRequired => "tenant_required",
            Self::TenantNotFound(_) => "tenant_not_found",
            Self::TenantMismatch => "tenant_mismatch",
            Self::CrossTenantAccess => "cross_tenant_access",
            Self::SubscriptionInactive(_) => "subscription_inactive",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::NotFound(_) => "entity_not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::RateLimited => "rate_limited",
            Self::ImmutableField(_) => "immutable_field",
            Self::Transient(_) => "transient",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::TenantRequired => 400,
            Self::Unauthenticated => 401,
            Self::PermissionDenied(_)
            | Self::TenantMismatch
            | Self::CrossTenantAccess
            | Self::SubscriptionInactive(_)
            | Self::LimitExceeded { .. } => 403,
            Self::TenantNotFound(_) | Self::NotFound(_) => 404,
            Self::Conflict(_) | Self::InvalidTransition { .. } => 409,
            Self::RateLimited => 429,
            Self::Transient(_) => 503,
            Self::ImmutableField(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Internal(_) => 500,
        }
    }

    /// Whether a background worker should retry the failed item.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(PlatformError::TenantRequired.status(), 400);
        assert_eq!(PlatformError::CrossTenantAccess.status(), 403);
        assert_eq!(PlatformError::TenantMismatch.status(), 403);
        assert_eq!(PlatformError::TenantNotFound("9".into()).status(), 404);
        assert_eq!(PlatformError::Conflict("dup".into()).status(), 409);
        assert_eq!(PlatformError::RateLimited.status(), 429);
        assert_eq!(PlatformError::ImmutableField("tenant_id").status(), 500);
        assert_eq!(PlatformError::Transient("db down".into()).status(), 503);
    }

    #[test]
    fn test_retryable() {
        assert!(PlatformError::Transient("timeout".into()).is_retryable());
        assert!(!PlatformError::CrossTenantAccess.is_retryable());
    }
}
