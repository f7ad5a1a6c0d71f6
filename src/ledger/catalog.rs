//! Subscription plans and add-on packs: named credit allocations.

use crate::types::ResourceType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credits per resource type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAllocation {
    #[serde(default)]
    pub text: i64,
    #[serde(default)]
    pub image: i64,
    #[serde(default)]
    pub video: i64,
}

impl CreditAllocation {
    pub fn new(text: i64, image: i64, video: i64) -> Self {
        Self { text, image, video }
    }

    pub fn get(&self, resource: ResourceType) -> i64 {
        match resource {
            ResourceType::Text => self.text,
            ResourceType::Image => self.image,
            ResourceType::Video => self.video,
        }
    }

    /// Non-zero entries in `ResourceType::ALL` order
    pub fn entries(&self) -> impl Iterator<Item = (ResourceType, i64)> + '_ {
        ResourceType::ALL
            .into_iter()
            .map(|resource| (resource, self.get(resource)))
            .filter(|(_, amount)| *amount != 0)
    }
}

/// Plans (balance resets) and add-on packs (top-ups) known to the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditCatalog {
    /// Plan assigned when an account is opened without an explicit plan
    #[serde(default = "default_plan_name")]
    pub default_plan: String,

    #[serde(default = "default_plans")]
    pub plans: BTreeMap<String, CreditAllocation>,

    #[serde(default = "default_addons")]
    pub addons: BTreeMap<String, CreditAllocation>,
}

pub(crate) fn default_plan_name() -> String {
    "trial".to_string()
}

pub(crate) fn default_plans() -> BTreeMap<String, CreditAllocation> {
    let mut plans = BTreeMap::new();
    plans.insert("trial".to_string(), CreditAllocation::new(1000, 100, 0));
    plans.insert("starter".to_string(), CreditAllocation::new(1000, 100, 0));
    plans.insert("pro".to_string(), CreditAllocation::new(1000, 300, 5));
    plans.insert("business".to_string(), CreditAllocation::new(1000, 600, 10));
    plans.insert("enterprise".to_string(), CreditAllocation::new(1000, 1200, 20));
    plans
}

pub(crate) fn default_addons() -> BTreeMap<String, CreditAllocation> {
    let mut addons = BTreeMap::new();
    addons.insert("image_100".to_string(), CreditAllocation::new(0, 100, 0));
    addons.insert("video_1".to_string(), CreditAllocation::new(0, 0, 1));
    addons.insert("video_5".to_string(), CreditAllocation::new(0, 0, 5));
    addons
}

impl Default for CreditCatalog {
    fn default() -> Self {
        Self {
            default_plan: default_plan_name(),
            plans: default_plans(),
            addons: default_addons(),
        }
    }
}

impl CreditCatalog {
    pub fn plan(&self, name: &str) -> Option<&CreditAllocation> {
        self.plans.get(name)
    }

    pub fn addon(&self, name: &str) -> Option<&CreditAllocation> {
        self.addons.get(name)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.plans.contains_key(&self.default_plan) {
            return Err(format!(
                "Default plan '{}' is not defined",
                self.default_plan
            ));
        }
        for (name, plan) in &self.plans {
            if ResourceType::ALL.iter().any(|r| plan.get(*r) < 0) {
                return Err(format!("Plan '{}' has a negative allocation", name));
            }
        }
        for (name, pack) in &self.addons {
            if ResourceType::ALL.iter().any(|r| pack.get(*r) < 0) {
                return Err(format!("Add-on '{}' has a negative allocation", name));
            }
            if pack.entries().next().is_none() {
                return Err(format!("Add-on '{}' grants no credits", name));
            }
        }
        Ok(())
    }
}
