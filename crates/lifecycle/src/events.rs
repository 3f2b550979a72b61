//! Immutable lifecycle event log. Every status change appends exactly one
//! event; supplementary events (plan changes, payment failures) append
//! without a status change.

use chrono::{DateTime, Utc};
use crewhq_store::TenantStatus;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    Created,
    ProvisioningCompleted,
    ProvisioningFailed,
    Activated,
    Suspended,
    Resumed,
    Upgraded,
    Downgraded,
    Cancelled,
    MarkedForDeletion,
    Deleted,
    PaymentFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub event_type: LifecycleEventType,
    pub previous_status: Option<TenantStatus>,
    pub new_status: Option<TenantStatus>,
    pub reason: Option<String>,
    pub triggered_by: String,
    pub metadata: serde_json::Value,
    pub event_date: DateTime<Utc>,
}

/// Append-only event store.
pub struct EventLog {
    events: DashMap<Uuid, LifecycleEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
        }
    }

    pub fn append(&self, event: LifecycleEvent) -> LifecycleEvent {
        self.events.insert(event.id, event.clone());
        event
    }

    /// Events for one tenant, most recent first.
    pub fn list_for_tenant(&self, tenant_id: &str) -> Vec<LifecycleEvent> {
        let mut events: Vec<LifecycleEvent> = self
            .events
            .iter()
            .filter(|e| e.value().tenant_id == tenant_id)
            .map(|e| e.value().clone())
            .collect();
        events.sort_by(|a, b| b.event_date.cmp(&a.event_date));
        events
    }

    pub fn recent_for_tenant(&self, tenant_id: &str, limit: usize) -> Vec<LifecycleEvent> {
        let mut events = self.list_for_tenant(tenant_id);
        events.truncate(limit);
        events
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_order() {
        let log = EventLog::new();
        for (i, event_type) in [
            LifecycleEventType::Created,
            LifecycleEventType::ProvisioningCompleted,
            LifecycleEventType::Activated,
        ]
        .iter()
        .enumerate()
        {
            log.append(LifecycleEvent {
                id: Uuid::new_v4(),
                tenant_id: "1".into(),
                event_type: *event_type,
                previous_status: None,
                new_status: None,
                reason: None,
                triggered_by: "test".into(),
                metadata: serde_json::json!({}),
                event_date: Utc::now() + chrono::Duration::milliseconds(i as i64),
            });
        }
        log.append(LifecycleEvent {
            id: Uuid::new_v4(),
            tenant_id: "2".into(),
            event_type: LifecycleEventType::Created,
            previous_status: None,
            new_status: None,
            reason: None,
            triggered_by: "test".into(),
            metadata: serde_json::json!({}),
            event_date: Utc::now(),
        });

        let events = log.list_for_tenant("1");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, LifecycleEventType::Activated);
        assert_eq!(log.recent_for_tenant("1", 2).len(), 2);
    }
}
