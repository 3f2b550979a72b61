#![warn(clippy::unwrap_used)]

//! Subscription and plan catalog: plans with ordered features and caps,
//! per-tenant subscription records, and cached entitlement lookups.

pub mod features;
pub mod plans;
pub mod subscriptions;

pub use features::{EntitlementService, TenantEntitlements};
pub use plans::{FeatureKind, PlanCatalog, PlanFeature, SubscriptionPlan};
pub use subscriptions::{Subscription, SubscriptionBook, SubscriptionStatus};
