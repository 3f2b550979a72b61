//! Platform-owned user directory. Emails are unique; a user without a
//! tenant id is a platform operator (SuperAdmin).

use chrono::{DateTime, Duration, Utc};
use crewhq_core::context::ROLE_SUPER_ADMIN;
use crewhq_core::error::{PlatformError, PlatformResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    /// None iff the user is a platform operator.
    pub tenant_id: Option<String>,
    pub role: String,
    pub active: bool,
    pub reset_token: Option<String>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_super_admin(&self) -> bool {
        self.role == ROLE_SUPER_ADMIN && self.tenant_id.is_none()
    }
}

pub struct UserDirectory {
    rows: DashMap<Uuid, User>,
    by_email: DashMap<String, Uuid>,
    create_lock: Mutex<()>,
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl UserDirectory {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            by_email: DashMap::new(),
            create_lock: Mutex::new(()),
        }
    }

    /// Create a user. Fails with `Conflict` when the email is taken.
    pub fn create(
        &self,
        email: &str,
        display_name: &str,
        password_digest: &str,
        tenant_id: Option<&str>,
        role: &str,
    ) -> PlatformResult<User> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(PlatformError::Validation("Valid email is required".into()));
        }

        let _guard = self.create_lock.lock();
        if self.by_email.contains_key(&email) {
            return Err(PlatformError::Conflict(format!(
                "Email already registered: {email}"
            )));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.clone(),
            display_name: display_name.to_string(),
            password_digest: password_digest.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            role: role.to_string(),
            active: true,
            reset_token: None,
            reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.by_email.insert(email, user.id);
        self.rows.insert(user.id, user.clone());
        info!(user_id = %user.id, email = %user.email, "User created");
        Ok(user)
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.rows.get(&id).map(|e| e.value().clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        let email = email.trim().to_ascii_lowercase();
        self.by_email
            .get(&email)
            .and_then(|id| self.rows.get(id.value()))
            .map(|e| e.value().clone())
    }

    pub fn list_for_tenant(&self, tenant_id: &str) -> Vec<User> {
        self.rows
            .iter()
            .filter(|e| e.value().tenant_id.as_deref() == Some(tenant_id))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn count_for_tenant(&self, tenant_id: &str) -> usize {
        self.rows
            .iter()
            .filter(|e| e.value().active && e.value().tenant_id.as_deref() == Some(tenant_id))
            .count()
    }

    /// Attach a user to a tenant with the given role. Used when an existing
    /// identity becomes a tenant admin during provisioning.
    pub fn assign_tenant(&self, id: Uuid, tenant_id: &str, role: &str) -> PlatformResult<User> {
        self.mutate(id, |u| {
            u.tenant_id = Some(tenant_id.to_string());
            u.role = role.to_string();
        })
    }

    pub fn set_password(&self, id: Uuid, password_digest: &str) -> PlatformResult<User> {
        self.mutate(id, |u| {
            u.password_digest = password_digest.to_string();
            u.reset_token = None;
            u.reset_token_expires_at = None;
        })
    }

    /// Issue a reset token valid for `ttl_hours`.
    pub fn issue_reset_token(&self, id: Uuid, token: &str, ttl_hours: i64) -> PlatformResult<User> {
        self.mutate(id, |u| {
            u.reset_token = Some(token.to_string());
            u.reset_token_expires_at = Some(Utc::now() + Duration::hours(ttl_hours));
        })
    }

    /// Consume a reset token: set the new password digest and clear the
    /// token. Expired or unknown tokens fail.
    pub fn consume_reset_token(&self, token: &str, new_digest: &str) -> PlatformResult<User> {
        let user_id = self
            .rows
            .iter()
            .find(|e| e.value().reset_token.as_deref() == Some(token))
            .map(|e| e.value().id)
            .ok_or_else(|| PlatformError::NotFound("reset token".into()))?;

        let user = self
            .get(user_id)
            .ok_or_else(|| PlatformError::NotFound("user".into()))?;
        let expired = user
            .reset_token_expires_at
            .map(|t| t < Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(PlatformError::Validation("Reset token expired".into()));
        }
        self.set_password(user_id, new_digest)
    }

    pub fn deactivate(&self, id: Uuid) -> PlatformResult<User> {
        self.mutate(id, |u| u.active = false)
    }

    /// Deactivate every user belonging to a tenant (deletion sweep).
    pub fn purge_tenant(&self, tenant_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .rows
            .iter()
            .filter(|e| e.value().tenant_id.as_deref() == Some(tenant_id))
            .map(|e| e.value().id)
            .collect();
        for id in &ids {
            if let Some((_, user)) = self.rows.remove(id) {
                self.by_email.remove(&user.email);
            }
        }
        ids.len()
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> PlatformResult<User>
    where
        F: FnOnce(&mut User),
    {
        let mut entry = self
            .rows
            .get_mut(&id)
            .ok_or_else(|| PlatformError::NotFound(format!("user {id}")))?;
        let user = entry.value_mut();
        f(user);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}
