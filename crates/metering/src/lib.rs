#![warn(clippy::unwrap_used)]

//! Usage metering: per-tenant monthly counters, plan limit checks, overage
//! alerts, the background usage scan, and cross-tenant aggregates.

pub mod limits;
pub mod scan;
pub mod usage;

pub use limits::{LimitCheck, LimitDimension};
pub use scan::{UsageAggregate, UsageScanWorker, UsageTrend};
pub use usage::{UsageEngine, UsageMetricRow};
