//! Opaque bearer sessions. Tokens are random, looked up server-side, and
//! expire; the control plane deliberately does not mint JWTs.

use chrono::{DateTime, Duration, Utc};
use crewhq_core::error::{PlatformError, PlatformResult};
use crewhq_core::password;
use crewhq_store::UserDirectory;
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

const SESSION_TTL_HOURS: i64 = 8;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    #[serde(skip_serializing)]
    pub token: String,
    pub user_id: Uuid,
    pub email: String,
    pub tenant_id: Option<String>,
    pub role: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct SessionManager {
    sessions: DashMap<String, Session>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Verify credentials and mint a session token.
    pub fn login(
        &self,
        users: &UserDirectory,
        email: &str,
        password_attempt: &str,
    ) -> PlatformResult<Session> {
        let user = users
            .find_by_email(email)
            .filter(|u| u.active)
            .ok_or(PlatformError::Unauthenticated)?;
        if !password::verify(password_attempt, &user.password_digest) {
            return Err(PlatformError::Unauthenticated);
        }

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill(&mut bytes[..]);
        let token = hex::encode(bytes);

        let now = Utc::now();
        let session = Session {
            token: token.clone(),
            user_id: user.id,
            email: user.email.clone(),
            tenant_id: user.tenant_id.clone(),
            role: user.role.clone(),
            issued_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        };
        info!(user_id = %user.id, email = %user.email, "Session created");
        self.sessions.insert(token, session.clone());
        Ok(session)
    }

    /// Look up a live session by token.
    pub fn validate(&self, token: &str) -> Option<Session> {
        self.sessions
            .get(token)
            .filter(|e| e.value().expires_at > Utc::now())
            .map(|e| e.value().clone())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_and_validate() {
        let users = UserDirectory::new();
        users
            .create(
                "a@acme.test",
                "Ada",
                &password::digest("Sound-Password-42"),
                Some("1"),
                "Admin",
            )
            .unwrap();

        let sessions = SessionManager::new();
        let session = sessions
            .login(&users, "a@acme.test", "Sound-Password-42")
            .unwrap();
        assert_eq!(session.tenant_id.as_deref(), Some("1"));
        assert_eq!(session.role, "Admin");

        let validated = sessions.validate(&session.token).unwrap();
        assert_eq!(validated.user_id, session.user_id);

        assert!(sessions.revoke(&session.token));
        assert!(sessions.validate(&session.token).is_none());
    }

    #[test]
    fn test_bad_credentials() {
        let users = UserDirectory::new();
        users
            .create(
                "a@acme.test",
                "Ada",
                &password::digest("Sound-Password-42"),
                Some("1"),
                "Admin",
            )
            .unwrap();

        let sessions = SessionManager::new();
        assert!(matches!(
            sessions.login(&users, "a@acme.test", "wrong"),
            Err(PlatformError::Unauthenticated)
        ));
        assert!(matches!(
            sessions.login(&users, "nobody@acme.test", "x"),
            Err(PlatformError::Unauthenticated)
        ));
    }
}
