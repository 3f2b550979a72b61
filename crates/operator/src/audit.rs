//! Admin audit log: one row per operator action, with truncated request
//! payloads. Failing to write an audit row never masks the business result;
//! the API layer logs the failure on the diagnostic channel instead.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Request payloads are stored at most this long.
pub const MAX_PAYLOAD_CHARS: usize = 4_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAudit {
    pub id: Uuid,
    pub actor_user_id: Uuid,
    pub actor_email: String,
    pub method: String,
    pub endpoint: String,
    pub status_code: u16,
    pub success: bool,
    pub target_tenant_id: Option<String>,
    pub target_entity: Option<String>,
    pub request_payload: Option<String>,
    pub error_message: Option<String>,
    /// Set when the request ran under an impersonation grant.
    pub impersonated: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Input to `record`, before truncation and id assignment.
#[derive(Debug, Clone, Default)]
pub struct AuditEntry {
    pub actor_user_id: Uuid,
    pub actor_email: String,
    pub method: String,
    pub endpoint: String,
    pub status_code: u16,
    pub target_tenant_id: Option<String>,
    pub target_entity: Option<String>,
    pub request_payload: Option<String>,
    pub error_message: Option<String>,
    pub impersonated: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub duration_ms: u64,
}

/// Append-only audit store.
pub struct AdminAuditLog {
    rows: DashMap<Uuid, AdminAudit>,
}

impl Default for AdminAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AdminAuditLog {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
        }
    }

    pub fn record(&self, entry: AuditEntry) -> AdminAudit {
        let audit = AdminAudit {
            id: Uuid::new_v4(),
            actor_user_id: entry.actor_user_id,
            actor_email: entry.actor_email,
            method: entry.method,
            endpoint: entry.endpoint,
            status_code: entry.status_code,
            success: entry.status_code < 400,
            target_tenant_id: entry.target_tenant_id,
            target_entity: entry.target_entity,
            request_payload: entry
                .request_payload
                .map(|p| p.chars().take(MAX_PAYLOAD_CHARS).collect()),
            error_message: entry.error_message,
            impersonated: entry.impersonated,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            duration_ms: entry.duration_ms,
            created_at: Utc::now(),
        };
        info!(
            actor = %audit.actor_email,
            endpoint = %audit.endpoint,
            status = audit.status_code,
            impersonated = audit.impersonated,
            "Operator action audited"
        );
        self.rows.insert(audit.id, audit.clone());
        audit
    }

    /// Query with optional filters, most recent first.
    pub fn query(
        &self,
        actor: Option<Uuid>,
        target_tenant_id: Option<&str>,
        endpoint: Option<&str>,
        limit: usize,
    ) -> Vec<AdminAudit> {
        let mut rows: Vec<AdminAudit> = self
            .rows
            .iter()
            .filter(|e| {
                let row = e.value();
                if let Some(a) = actor {
                    if row.actor_user_id != a {
                        return false;
                    }
                }
                if let Some(t) = target_tenant_id {
                    if row.target_tenant_id.as_deref() != Some(t) {
                        return false;
                    }
                }
                if let Some(ep) = endpoint {
                    if row.endpoint != ep {
                        return false;
                    }
                }
                true
            })
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        rows
    }

    pub fn count(&self) -> usize {
        self.rows.len()
    }
}
