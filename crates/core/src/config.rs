use crate::password::PasswordPolicy;
use serde::Deserialize;
use std::collections::HashMap;

/// Root platform configuration. Loaded from environment variables with the
/// prefix `CREWHQ__`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub usage: UsageConfig,
    #[serde(default)]
    pub impersonation: ImpersonationConfig,
    #[serde(default)]
    pub password_policy: PasswordPolicy,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Days between suspension and cancellation eligibility.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
    /// Days between cancellation and hard deletion.
    #[serde(default = "default_deletion_retention_days")]
    pub deletion_retention_days: i64,
    /// Cadence of the maintenance sweep (deletion, provisioning retry).
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    /// Maximum optimistic-concurrency retries for a status transition.
    #[serde(default = "default_transition_retries")]
    pub transition_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Consecutive payment failures before the tenant is suspended.
    #[serde(default = "default_payment_failure_threshold")]
    pub payment_failure_threshold: u32,
    /// Backoff sequence (seconds) for failed webhook dispatch retries.
    #[serde(default = "default_webhook_retry_backoff")]
    pub webhook_retry_backoff_secs: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageConfig {
    /// Cadence of the background usage scan.
    #[serde(default = "default_usage_scan_interval")]
    pub scan_interval_secs: u64,
    /// Percentage of a limit at which admins receive a warning email.
    #[serde(default = "default_warn_threshold_percent")]
    pub warn_threshold_percent: f64,
    /// Consecutive over-limit scans before the tenant is suspended.
    #[serde(default = "default_over_limit_suspend_after_scans")]
    pub over_limit_suspend_after_scans: u32,
    /// Daily API request cap by plan tier.
    #[serde(default = "default_api_limit_per_day")]
    pub api_limit_per_day: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImpersonationConfig {
    #[serde(default = "default_impersonation_ttl_secs")]
    pub ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_grace_period_days() -> i64 {
    30
}
fn default_deletion_retention_days() -> i64 {
    90
}
fn default_maintenance_interval_secs() -> u64 {
    300
}
fn default_transition_retries() -> u32 {
    5
}
fn default_payment_failure_threshold() -> u32 {
    3
}
fn default_webhook_retry_backoff() -> Vec<u64> {
    vec![30, 120, 600, 3600]
}
fn default_usage_scan_interval() -> u64 {
    3600
}
fn default_warn_threshold_percent() -> f64 {
    90.0
}
fn default_over_limit_suspend_after_scans() -> u32 {
    24
}
fn default_api_limit_per_day() -> HashMap<String, u64> {
    HashMap::from([
        ("free".to_string(), 1_000),
        ("starter".to_string(), 10_000),
        ("growth".to_string(), 100_000),
        ("enterprise".to_string(), 1_000_000),
    ])
}
fn default_impersonation_ttl_secs() -> i64 {
    900
}
fn default_requests_per_minute() -> u32 {
    600
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
            deletion_retention_days: default_deletion_retention_days(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            transition_retries: default_transition_retries(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            payment_failure_threshold: default_payment_failure_threshold(),
            webhook_retry_backoff_secs: default_webhook_retry_backoff(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_usage_scan_interval(),
            warn_threshold_percent: default_warn_threshold_percent(),
            over_limit_suspend_after_scans: default_over_limit_suspend_after_scans(),
            api_limit_per_day: default_api_limit_per_day(),
        }
    }
}

impl Default for ImpersonationConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_impersonation_ttl_secs(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            lifecycle: LifecycleConfig::default(),
            billing: BillingConfig::default(),
            usage: UsageConfig::default(),
            impersonation: ImpersonationConfig::default(),
            password_policy: PasswordPolicy::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("CREWHQ")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
