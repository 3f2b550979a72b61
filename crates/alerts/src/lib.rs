#![warn(clippy::unwrap_used)]

//! Operator alert hub. Webhook ingestion and usage metering raise alerts
//! here; the operator surface lists, acknowledges, and resolves them.
//! At most one Active alert exists per `(tenant, type, resource)` —
//! re-raising returns the existing row.

use chrono::{DateTime, Utc};
use crewhq_core::error::{PlatformError, PlatformResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PaymentFailure,
    Cancellation,
    Overage,
    Suspension,
    Error,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PaymentFailure => "payment_failure",
            Self::Cancellation => "cancellation",
            Self::Overage => "overage",
            Self::Suspension => "suspension",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

/// An operator-visible alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: String,
    pub subscription_id: Option<Uuid>,
    pub alert_type: AlertType,
    /// Optional narrowing key (e.g. the overage resource).
    pub resource: Option<String>,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    fn dedup_key(&self) -> (String, AlertType, Option<String>) {
        (
            self.tenant_id.clone(),
            self.alert_type,
            self.resource.clone(),
        )
    }
}

/// Per-severity counts for dashboard histograms.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeverityHistogram {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

/// Central alert store.
pub struct AlertHub {
    alerts: DashMap<Uuid, Alert>,
    /// Serializes raise() so the uniqueness check and insert are atomic.
    raise_lock: Mutex<()>,
}

impl Default for AlertHub {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertHub {
    pub fn new() -> Self {
        Self {
            alerts: DashMap::new(),
            raise_lock: Mutex::new(()),
        }
    }

    /// Raise an alert. When an Active (or Acknowledged) alert already exists
    /// for the same `(tenant, type, resource)`, the existing row is returned
    /// unchanged except for a bumped severity when the new one is higher.
    #[allow(clippy::too_many_arguments)]
    pub fn raise(
        &self,
        tenant_id: &str,
        subscription_id: Option<Uuid>,
        alert_type: AlertType,
        resource: Option<&str>,
        severity: AlertSeverity,
        message: &str,
        metadata: serde_json::Value,
    ) -> Alert {
        let _guard = self.raise_lock.lock();

        let key = (
            tenant_id.to_string(),
            alert_type,
            resource.map(str::to_string),
        );
        if let Some(existing) = self
            .alerts
            .iter()
            .find(|e| e.value().status != AlertStatus::Resolved && e.value().dedup_key() == key)
        {
            let id = existing.value().id;
            drop(existing);
            if let Some(mut entry) = self.alerts.get_mut(&id) {
                if severity > entry.value().severity {
                    entry.value_mut().severity = severity;
                    entry.value_mut().message = message.to_string();
                    entry.value_mut().updated_at = Utc::now();
                }
                return entry.value().clone();
            }
        }

        let now = Utc::now();
        let alert = Alert {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            subscription_id,
            alert_type,
            resource: resource.map(str::to_string),
            severity,
            status: AlertStatus::Active,
            message: message.to_string(),
            metadata,
            created_at: now,
            updated_at: now,
        };
        info!(
            tenant_id = %tenant_id,
            alert_type = %alert_type,
            severity = ?severity,
            "Alert raised"
        );
        self.alerts.insert(alert.id, alert.clone());
        alert
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        self.alerts.get(&id).map(|e| e.value().clone())
    }

    pub fn acknowledge(&self, id: Uuid) -> PlatformResult<Alert> {
        self.set_status(id, AlertStatus::Acknowledged)
    }

    pub fn resolve(&self, id: Uuid) -> PlatformResult<Alert> {
        self.set_status(id, AlertStatus::Resolved)
    }

    /// Resolve the active alert for `(tenant, type, resource)` if one exists.
    /// Used by housekeeping when a condition clears.
    pub fn resolve_matching(
        &self,
        tenant_id: &str,
        alert_type: AlertType,
        resource: Option<&str>,
    ) -> Option<Alert> {
        let key = (
            tenant_id.to_string(),
            alert_type,
            resource.map(str::to_string),
        );
        let id = self
            .alerts
            .iter()
            .find(|e| e.value().status != AlertStatus::Resolved && e.value().dedup_key() == key)
            .map(|e| e.value().id)?;
        self.resolve(id).ok()
    }

    /// Alerts for one tenant, most recent first.
    pub fn list_for_tenant(&self, tenant_id: &str) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|e| e.value().tenant_id == tenant_id)
            .map(|e| e.value().clone())
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    /// Cross-tenant listing for the operator surface.
    pub fn list_active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .iter()
            .filter(|e| e.value().status == AlertStatus::Active)
            .map(|e| e.value().clone())
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts
    }

    pub fn active_count_for_tenant(&self, tenant_id: &str) -> usize {
        self.alerts
            .iter()
            .filter(|e| {
                e.value().tenant_id == tenant_id && e.value().status == AlertStatus::Active
            })
            .count()
    }

    /// Histogram of active alerts by severity.
    pub fn severity_histogram(&self) -> SeverityHistogram {
        let mut histogram = SeverityHistogram::default();
        for entry in self.alerts.iter() {
            if entry.value().status != AlertStatus::Active {
                continue;
            }
            match entry.value().severity {
                AlertSeverity::Critical => histogram.critical += 1,
                AlertSeverity::High => histogram.high += 1,
                AlertSeverity::Medium => histogram.medium += 1,
                AlertSeverity::Low => histogram.low += 1,
            }
        }
        histogram
    }

    /// Active counts per alert type, for the dashboard.
    pub fn active_by_type(&self) -> HashMap<String, u64> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for entry in self.alerts.iter() {
            if entry.value().status == AlertStatus::Active {
                *counts.entry(entry.value().alert_type.to_string()).or_default() += 1;
            }
        }
        counts
    }

    /// Remove every alert for a tenant (deletion sweep).
    pub fn purge_tenant(&self, tenant_id: &str) -> usize {
        let ids: Vec<Uuid> = self
            .alerts
            .iter()
            .filter(|e| e.value().tenant_id == tenant_id)
            .map(|e| e.value().id)
            .collect();
        for id in &ids {
            self.alerts.remove(id);
        }
        ids.len()
    }

    fn set_status(&self, id: Uuid, status: AlertStatus) -> PlatformResult<Alert> {
        let mut entry = self
            .alerts
            .get_mut(&id)
            .ok_or_else(|| PlatformError::NotFound(format!("alert {id}")))?;
        entry.value_mut().status = status;
        entry.value_mut().updated_at = Utc::now();
        Ok(entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_raise_returns_existing() {
        let hub = AlertHub::new();
        let first = hub.raise(
            "1",
            None,
            AlertType::PaymentFailure,
            None,
            AlertSeverity::High,
            "Invoice payment failed",
            serde_json::json!({}),
        );
        let second = hub.raise(
            "1",
            None,
            AlertType::PaymentFailure,
            None,
            AlertSeverity::High,
            "Invoice payment failed again",
            serde_json::json!({}),
        );
        assert_eq!(first.id, second.id);
        assert_eq!(hub.list_for_tenant("1").len(), 1);

        // Distinct resource is a distinct alert.
        let overage = hub.raise(
            "1",
            None,
            AlertType::Overage,
            Some("employees"),
            AlertSeverity::Medium,
            "Employee limit exceeded",
            serde_json::json!({}),
        );
        assert_ne!(first.id, overage.id);
    }

    #[test]
    fn test_severity_escalation_on_reraise() {
        let hub = AlertHub::new();
        let first = hub.raise(
            "1",
            None,
            AlertType::Overage,
            Some("employees"),
            AlertSeverity::Medium,
            "11/10 employees",
            serde_json::json!({}),
        );
        let escalated = hub.raise(
            "1",
            None,
            AlertType::Overage,
            Some("employees"),
            AlertSeverity::High,
            "16/10 employees",
            serde_json::json!({}),
        );
        assert_eq!(first.id, escalated.id);
        assert_eq!(escalated.severity, AlertSeverity::High);
        assert_eq!(escalated.message, "16/10 employees");
    }

    #[test]
    fn test_resolution_allows_new_alert() {
        let hub = AlertHub::new();
        let first = hub.raise(
            "1",
            None,
            AlertType::Overage,
            Some("storage"),
            AlertSeverity::Medium,
            "over",
            serde_json::json!({}),
        );
        hub.resolve_matching("1", AlertType::Overage, Some("storage"))
            .unwrap();
        assert_eq!(hub.get(first.id).unwrap().status, AlertStatus::Resolved);

        let second = hub.raise(
            "1",
            None,
            AlertType::Overage,
            Some("storage"),
            AlertSeverity::Medium,
            "over again",
            serde_json::json!({}),
        );
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_histogram() {
        let hub = AlertHub::new();
        hub.raise("1", None, AlertType::PaymentFailure, None, AlertSeverity::High, "x", serde_json::json!({}));
        hub.raise("2", None, AlertType::Overage, Some("api"), AlertSeverity::Medium, "y", serde_json::json!({}));
        hub.raise("3", None, AlertType::Error, None, AlertSeverity::Critical, "z", serde_json::json!({}));

        let histogram = hub.severity_histogram();
        assert_eq!(histogram.high, 1);
        assert_eq!(histogram.medium, 1);
        assert_eq!(histogram.critical, 1);
        assert_eq!(hub.active_by_type()["overage"], 1);
    }
}
