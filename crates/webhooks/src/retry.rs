//! Background retry of failed webhook dispatches. The ledger is the
//! durable queue: any event left unprocessed by a crash is picked up on
//! the next pass.

use crate::ingest::WebhookIngestor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct WebhookRetryWorker {
    ingestor: Arc<WebhookIngestor>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl WebhookRetryWorker {
    pub fn new(
        ingestor: Arc<WebhookIngestor>,
        interval_secs: u64,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ingestor,
            interval: Duration::from_secs(interval_secs.max(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Webhook retry worker started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.pass(),
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Webhook retry worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One retry pass over due events.
    pub fn pass(&self) {
        for event in self.ingestor.due_for_retry() {
            if *self.shutdown.borrow() {
                return;
            }
            let key = (event.provider.clone(), event.external_event_id.clone());
            if let Err(e) = self.ingestor.try_dispatch(&key) {
                warn!(
                    provider = %event.provider,
                    event_id = %event.external_event_id,
                    error = %e,
                    "Webhook retry pass failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::tests::{active_tenant, ingestor};
    use chrono::Utc;

    fn worker(ingestor: Arc<WebhookIngestor>) -> WebhookRetryWorker {
        let (tx, rx) = watch::channel(false);
        std::mem::forget(tx);
        WebhookRetryWorker::new(ingestor, 30, rx)
    }

    #[test]
    fn test_retry_succeeds_once_tenant_exists() {
        let (ingestor, lifecycle) = ingestor();

        // Arrives before the tenant is resolvable.
        let event = ingestor
            .ingest(
                "stripe",
                "evt_early",
                "invoice.payment_failed",
                serde_json::json!({ "tenant_id": "1" }),
                true,
            )
            .unwrap();
        assert!(!event.processed);

        // Not due yet: the pass skips it.
        let w = worker(ingestor.clone());
        w.pass();
        assert!(!ingestor.get("stripe", "evt_early").unwrap().processed);

        // Tenant appears; force the retry due and run a pass.
        active_tenant(&lifecycle, "tok-1");
        ingestor.force_due("stripe", "evt_early", Utc::now());
        w.pass();
        assert!(ingestor.get("stripe", "evt_early").unwrap().processed);
    }

    #[test]
    fn test_exhausted_retries_abandon_with_error_alert() {
        let (ingestor, _) = ingestor();
        ingestor
            .ingest(
                "stripe",
                "evt_doomed",
                "invoice.payment_failed",
                serde_json::json!({ "tenant_id": "404" }),
                true,
            )
            .unwrap();

        let w = worker(ingestor.clone());
        let backoff_len = ingestor.config.billing.webhook_retry_backoff_secs.len();
        for _ in 0..backoff_len + 1 {
            ingestor.force_due("stripe", "evt_doomed", Utc::now());
            w.pass();
        }

        let event = ingestor.get("stripe", "evt_doomed").unwrap();
        assert!(event.abandoned);
        assert!(!event.processed);
        assert_eq!(ingestor.needing_review().len(), 1);
        // Operator sees a High-severity Error alert.
        assert!(ingestor.alerts.severity_histogram().high >= 1);
    }
}
