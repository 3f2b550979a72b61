#![warn(clippy::unwrap_used)]

//! Billing webhook ingestion: durable persist-first capture of provider
//! events, idempotent dispatch into lifecycle and alerts, and background
//! retry with exponential backoff.

pub mod ingest;
pub mod retry;

pub use ingest::{WebhookEvent, WebhookIngestor};
pub use retry::WebhookRetryWorker;
