//! Plan catalog: pricing tiers with caps and ordered feature lists.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Value type of a plan feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Boolean,
    Numeric,
    Text,
}

/// A plan-controlled capability. A tenant "has" the feature when its active
/// plan carries the key with a truthy value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFeature {
    pub key: String,
    pub kind: FeatureKind,
    pub value: String,
    pub sort_order: u32,
}

impl PlanFeature {
    pub fn boolean(key: impl Into<String>, enabled: bool, sort_order: u32) -> Self {
        Self {
            key: key.into(),
            kind: FeatureKind::Boolean,
            value: enabled.to_string(),
            sort_order,
        }
    }

    pub fn numeric(key: impl Into<String>, value: u64, sort_order: u32) -> Self {
        Self {
            key: key.into(),
            kind: FeatureKind::Numeric,
            value: value.to_string(),
            sort_order,
        }
    }

    /// "false", "0", and empty values are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self.value.trim(), "" | "0" | "false")
    }
}

/// A subscription plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub tier: String,
    pub monthly_price: f64,
    pub quarterly_price: Option<f64>,
    pub yearly_price: Option<f64>,
    pub currency: String,
    pub max_employees: u32,
    pub max_users: Option<u32>,
    pub max_storage_bytes: Option<u64>,
    pub trial_days: Option<u32>,
    pub visible: bool,
    pub features: Vec<PlanFeature>,
}

impl SubscriptionPlan {
    /// Quarterly price, falling back to `monthly x 3` when unset.
    pub fn quarterly(&self) -> f64 {
        self.quarterly_price.unwrap_or(self.monthly_price * 3.0)
    }

    /// Yearly price, falling back to `monthly x 12` when unset.
    pub fn yearly(&self) -> f64 {
        self.yearly_price.unwrap_or(self.monthly_price * 12.0)
    }

    pub fn feature(&self, key: &str) -> Option<&PlanFeature> {
        self.features.iter().find(|f| f.key == key)
    }
}

/// Catalog of all plans, keyed by id.
pub struct PlanCatalog {
    plans: DashMap<Uuid, SubscriptionPlan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self {
            plans: DashMap::new(),
        }
    }

    pub fn add(&self, mut plan: SubscriptionPlan) -> SubscriptionPlan {
        plan.features.sort_by_key(|f| f.sort_order);
        self.plans.insert(plan.id, plan.clone());
        plan
    }

    pub fn get(&self, id: Uuid) -> Option<SubscriptionPlan> {
        self.plans.get(&id).map(|e| e.value().clone())
    }

    pub fn find_by_tier(&self, tier: &str) -> Option<SubscriptionPlan> {
        self.plans
            .iter()
            .find(|e| e.value().tier == tier)
            .map(|e| e.value().clone())
    }

    /// Visible plans ordered by monthly price.
    pub fn list_visible(&self) -> Vec<SubscriptionPlan> {
        let mut plans: Vec<SubscriptionPlan> = self
            .plans
            .iter()
            .filter(|e| e.value().visible)
            .map(|e| e.value().clone())
            .collect();
        plans.sort_by(|a, b| a.monthly_price.total_cmp(&b.monthly_price));
        plans
    }

    pub fn list_all(&self) -> Vec<SubscriptionPlan> {
        self.plans.iter().map(|e| e.value().clone()).collect()
    }

    /// Seed the default four tiers.
    pub fn seed_default_plans(&self) {
        self.add(SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Free".into(),
            tier: "free".into(),
            monthly_price: 0.0,
            quarterly_price: None,
            yearly_price: None,
            currency: "USD".into(),
            max_employees: 10,
            max_users: Some(3),
            max_storage_bytes: Some(1 << 30), // 1 GB
            trial_days: None,
            visible: true,
            features: vec![
                PlanFeature::boolean("employee_directory", true, 1),
                PlanFeature::boolean("leave_tracking", true, 2),
                PlanFeature::boolean("attendance", false, 3),
                PlanFeature::boolean("payroll_export", false, 4),
            ],
        });

        self.add(SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Starter".into(),
            tier: "starter".into(),
            monthly_price: 49.0,
            quarterly_price: None,
            yearly_price: Some(490.0),
            currency: "USD".into(),
            max_employees: 50,
            max_users: Some(10),
            max_storage_bytes: Some(10 << 30), // 10 GB
            trial_days: Some(14),
            visible: true,
            features: vec![
                PlanFeature::boolean("employee_directory", true, 1),
                PlanFeature::boolean("leave_tracking", true, 2),
                PlanFeature::boolean("attendance", true, 3),
                PlanFeature::boolean("payroll_export", false, 4),
                PlanFeature::numeric("custom_reports", 5, 5),
            ],
        });

        self.add(SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Growth".into(),
            tier: "growth".into(),
            monthly_price: 199.0,
            quarterly_price: None,
            yearly_price: Some(1990.0),
            currency: "USD".into(),
            max_employees: 500,
            max_users: Some(50),
            max_storage_bytes: Some(100 << 30), // 100 GB
            trial_days: Some(14),
            visible: true,
            features: vec![
                PlanFeature::boolean("employee_directory", true, 1),
                PlanFeature::boolean("leave_tracking", true, 2),
                PlanFeature::boolean("attendance", true, 3),
                PlanFeature::boolean("payroll_export", true, 4),
                PlanFeature::numeric("custom_reports", 50, 5),
                PlanFeature::boolean("api_access", true, 6),
            ],
        });

        self.add(SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Enterprise".into(),
            tier: "enterprise".into(),
            monthly_price: 999.0,
            quarterly_price: None,
            yearly_price: None,
            currency: "USD".into(),
            max_employees: u32::MAX,
            max_users: None,
            max_storage_bytes: None,
            trial_days: Some(30),
            visible: true,
            features: vec![
                PlanFeature::boolean("employee_directory", true, 1),
                PlanFeature::boolean("leave_tracking", true, 2),
                PlanFeature::boolean("attendance", true, 3),
                PlanFeature::boolean("payroll_export", true, 4),
                PlanFeature::numeric("custom_reports", 0, 5),
                PlanFeature::boolean("api_access", true, 6),
                PlanFeature::boolean("sso", true, 7),
                PlanFeature::boolean("dedicated_support", true, 8),
            ],
        });

        info!("Seeded default plan catalog (free, starter, growth, enterprise)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_fallbacks() {
        let catalog = PlanCatalog::new();
        catalog.seed_default_plans();

        let starter = catalog.find_by_tier("starter").unwrap();
        // Quarterly absent -> monthly x 3; yearly explicit.
        assert_eq!(starter.quarterly(), 147.0);
        assert_eq!(starter.yearly(), 490.0);

        let enterprise = catalog.find_by_tier("enterprise").unwrap();
        assert_eq!(enterprise.yearly(), 999.0 * 12.0);
    }

    #[test]
    fn test_feature_truthiness() {
        let catalog = PlanCatalog::new();
        catalog.seed_default_plans();

        let free = catalog.find_by_tier("free").unwrap();
        assert!(free.feature("leave_tracking").unwrap().is_truthy());
        assert!(!free.feature("payroll_export").unwrap().is_truthy());

        let enterprise = catalog.find_by_tier("enterprise").unwrap();
        // Numeric zero is falsy.
        assert!(!enterprise.feature("custom_reports").unwrap().is_truthy());
    }

    #[test]
    fn test_list_visible_sorted_by_price() {
        let catalog = PlanCatalog::new();
        catalog.seed_default_plans();
        let tiers: Vec<String> = catalog
            .list_visible()
            .into_iter()
            .map(|p| p.tier)
            .collect();
        assert_eq!(tiers, vec!["free", "starter", "growth", "enterprise"]);
    }
}
