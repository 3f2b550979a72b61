//! Shared application state: every engine wired together once at startup.

use crate::rate_limit::RateLimiter;
use crate::sessions::SessionManager;
use crewhq_alerts::AlertHub;
use crewhq_catalog::{EntitlementService, PlanCatalog, SubscriptionBook};
use crewhq_core::config::PlatformConfig;
use crewhq_core::context::{TenantContext, ROLE_SUPER_ADMIN};
use crewhq_core::error::PlatformResult;
use crewhq_core::mailer::Mailer;
use crewhq_core::password;
use crewhq_lifecycle::{EventLog, LifecycleManager, TenantDataPurge};
use crewhq_metering::{LimitDimension, UsageEngine};
use crewhq_operator::{AdminAuditLog, ImpersonationBroker, OperatorConsole};
use crewhq_store::{Database, User};
use crewhq_webhooks::WebhookIngestor;
use std::sync::Arc;
use tracing::info;

/// Entitlement snapshots stay cached this long.
const ENTITLEMENT_CACHE_TTL_SECS: i64 = 60;

/// Alert rows live outside the platform store, so deletion reaches them
/// through the lifecycle purge hook.
struct AlertPurge(Arc<AlertHub>);

impl TenantDataPurge for AlertPurge {
    fn name(&self) -> &'static str {
        "alerts"
    }
    fn purge_tenant(&self, tenant_id: &str) -> usize {
        self.0.purge_tenant(tenant_id)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PlatformConfig>,
    pub db: Arc<Database>,
    pub catalog: Arc<PlanCatalog>,
    pub book: Arc<SubscriptionBook>,
    pub entitlements: Arc<EntitlementService>,
    pub alerts: Arc<AlertHub>,
    pub lifecycle: Arc<LifecycleManager>,
    pub usage: Arc<UsageEngine>,
    pub ingestor: Arc<WebhookIngestor>,
    pub console: Arc<OperatorConsole>,
    pub impersonation: Arc<ImpersonationBroker>,
    pub audit_log: Arc<AdminAuditLog>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire every engine, seed the plan catalog, and register purge hooks.
    pub fn new(config: PlatformConfig, mailer: Arc<dyn Mailer>) -> Self {
        let config = Arc::new(config);
        let db = Arc::new(Database::new());
        let catalog = Arc::new(PlanCatalog::new());
        catalog.seed_default_plans();
        let book = Arc::new(SubscriptionBook::new());
        let entitlements = Arc::new(EntitlementService::new(
            catalog.clone(),
            book.clone(),
            ENTITLEMENT_CACHE_TTL_SECS,
        ));
        let alerts = Arc::new(AlertHub::new());
        let events = Arc::new(EventLog::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            db.clone(),
            catalog.clone(),
            book.clone(),
            entitlements.clone(),
            alerts.clone(),
            events,
            mailer.clone(),
            config.clone(),
        ));
        let usage = Arc::new(UsageEngine::new(
            db.clone(),
            entitlements.clone(),
            alerts.clone(),
            lifecycle.clone(),
            mailer,
            config.clone(),
        ));
        lifecycle.register_purge_hook(usage.clone());
        lifecycle.register_purge_hook(Arc::new(AlertPurge(alerts.clone())));

        let ingestor = Arc::new(WebhookIngestor::new(
            db.clone(),
            catalog.clone(),
            book.clone(),
            lifecycle.clone(),
            alerts.clone(),
            config.clone(),
        ));
        let console = Arc::new(OperatorConsole::new(
            db.clone(),
            catalog.clone(),
            book.clone(),
            usage.clone(),
            alerts.clone(),
            lifecycle.clone(),
        ));
        let impersonation = Arc::new(ImpersonationBroker::new(config.impersonation.ttl_secs));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.requests_per_minute));

        info!("Application state wired");
        Self {
            config,
            db,
            catalog,
            book,
            entitlements,
            alerts,
            lifecycle,
            usage,
            ingestor,
            console,
            impersonation,
            audit_log: Arc::new(AdminAuditLog::new()),
            sessions: Arc::new(SessionManager::new()),
            rate_limiter,
        }
    }

    /// Create the platform operator identity (no tenant).
    pub fn seed_operator(&self, email: &str, operator_password: &str) -> PlatformResult<User> {
        self.db.users.create(
            email,
            "Platform Operator",
            &password::digest(operator_password),
            None,
            ROLE_SUPER_ADMIN,
        )
    }

    /// Per-request metering for tenant-scoped endpoints: burst rate limit,
    /// API counter increment, then the plan's daily cap.
    pub fn track_api_request(&self, ctx: &TenantContext) -> PlatformResult<()> {
        if !self.rate_limiter.check(&ctx.tenant_id) {
            return Err(crewhq_core::error::PlatformError::RateLimited);
        }
        self.usage.increment_api_requests(&ctx.tenant_id);
        self.usage
            .enforce_limit(&ctx.tenant_id, LimitDimension::ApiRequestsPerDay)
    }
}
