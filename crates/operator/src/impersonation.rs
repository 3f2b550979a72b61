//! Impersonation grants: a SuperAdmin acting as if inside a target tenant.
//!
//! The token is opaque to the frontend and looked up server-side. Grants
//! are never extendable, only reissuable, and always revocable. The binding
//! (operator, tenant, expiry) is observable to the caller as a banner.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use crewhq_core::error::{PlatformError, PlatformResult};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonationGrant {
    pub id: Uuid,
    pub operator_id: Uuid,
    pub operator_email: String,
    pub tenant_id: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl ImpersonationGrant {
    /// Banner text shown to the operator while the grant is in use.
    pub fn banner(&self) -> String {
        format!(
            "Impersonating tenant {} as {} until {}",
            self.tenant_id,
            self.operator_email,
            self.expires_at.to_rfc3339()
        )
    }
}

pub struct ImpersonationBroker {
    grants: DashMap<String, ImpersonationGrant>,
    ttl: Duration,
}

impl ImpersonationBroker {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            grants: DashMap::new(),
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    /// Issue a fresh grant bound to (operator, tenant, expiry).
    pub fn issue(
        &self,
        operator_id: Uuid,
        operator_email: &str,
        tenant_id: &str,
    ) -> ImpersonationGrant {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes[..]);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let now = Utc::now();
        let grant = ImpersonationGrant {
            id: Uuid::new_v4(),
            operator_id,
            operator_email: operator_email.to_string(),
            tenant_id: tenant_id.to_string(),
            token: token.clone(),
            issued_at: now,
            expires_at: now + self.ttl,
            revoked: false,
        };
        info!(
            operator = %operator_email,
            tenant_id = %tenant_id,
            grant_id = %grant.id,
            "Impersonation grant issued"
        );
        self.grants.insert(token, grant.clone());
        grant
    }

    /// Validate a presented token. Unknown, revoked, and expired tokens all
    /// fail identically.
    pub fn validate(&self, token: &str) -> PlatformResult<ImpersonationGrant> {
        let grant = self
            .grants
            .get(token)
            .map(|e| e.value().clone())
            .ok_or(PlatformError::Unauthenticated)?;
        if grant.revoked || grant.expires_at < Utc::now() {
            return Err(PlatformError::Unauthenticated);
        }
        Ok(grant)
    }

    /// Revoke a grant. Returns `true` when it existed and was live.
    pub fn revoke(&self, token: &str) -> bool {
        if let Some(mut entry) = self.grants.get_mut(token) {
            let was_live = !entry.value().revoked;
            entry.value_mut().revoked = true;
            if was_live {
                info!(grant_id = %entry.value().id, "Impersonation grant revoked");
            }
            return was_live;
        }
        false
    }

    /// Revoke every live grant held by an operator.
    pub fn revoke_all_for_operator(&self, operator_id: Uuid) -> usize {
        let mut revoked = 0;
        for mut entry in self.grants.iter_mut() {
            if entry.value().operator_id == operator_id && !entry.value().revoked {
                entry.value_mut().revoked = true;
                revoked += 1;
            }
        }
        revoked
    }

    /// Live grants, for the operator console.
    pub fn list_live(&self) -> Vec<ImpersonationGrant> {
        let now = Utc::now();
        self.grants
            .iter()
            .filter(|e| !e.value().revoked && e.value().expires_at >= now)
            .map(|e| e.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_validate_revoke() {
        let broker = ImpersonationBroker::new(900);
        let operator = Uuid::new_v4();
        let grant = broker.issue(operator, "ops@crewhq.io", "1");

        let validated = broker.validate(&grant.token).unwrap();
        assert_eq!(validated.tenant_id, "1");
        assert_eq!(validated.operator_id, operator);
        assert!(validated.banner().contains("tenant 1"));

        assert!(broker.revoke(&grant.token));
        assert!(matches!(
            broker.validate(&grant.token),
            Err(PlatformError::Unauthenticated)
        ));
        // Double revoke reports false.
        assert!(!broker.revoke(&grant.token));
    }

    #[test]
    fn test_expired_grant_rejected() {
        let broker = ImpersonationBroker::new(1);
        let grant = broker.issue(Uuid::new_v4(), "ops@crewhq.io", "1");
        // Force expiry.
        broker
            .grants
            .get_mut(&grant.token)
            .map(|mut e| e.value_mut().expires_at = Utc::now() - Duration::seconds(5));
        assert!(broker.validate(&grant.token).is_err());
        assert!(broker.list_live().is_empty());
    }

    #[test]
    fn test_reissue_not_extend() {
        let broker = ImpersonationBroker::new(900);
        let operator = Uuid::new_v4();
        let first = broker.issue(operator, "ops@crewhq.io", "1");
        let second = broker.issue(operator, "ops@crewhq.io", "1");
        // Distinct tokens and grants; both valid until their own expiry.
        assert_ne!(first.token, second.token);
        assert_eq!(broker.revoke_all_for_operator(operator), 2);
    }

    #[test]
    fn test_unknown_token() {
        let broker = ImpersonationBroker::new(900);
        assert!(broker.validate("not-a-token").is_err());
    }
}
