//! Subscription plan catalogue and the tier → verification rigor rule.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::ValidationError;

use super::model::{SelectedPlan, VerificationType};

/// One row of the plan catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTier {
    pub id: &'static str,
    pub name: &'static str,
    pub tier: u8,
    /// Monthly price in cents.
    pub price_cents: i64,
    pub trial_days: u32,
}

impl PlanTier {
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }

    pub fn verification_type(&self) -> VerificationType {
        VerificationType::for_tier(self.tier)
    }

    fn to_selected(self) -> SelectedPlan {
        SelectedPlan {
            id: self.id.to_string(),
            name: self.name.to_string(),
            tier: self.tier,
            price: self.price(),
        }
    }
}

const PLANS: [PlanTier; 6] = [
    PlanTier { id: "starter", name: "Starter", tier: 1, price_cents: 0, trial_days: 0 },
    PlanTier { id: "basic", name: "Basic", tier: 2, price_cents: 1_900, trial_days: 14 },
    PlanTier { id: "growth", name: "Growth", tier: 3, price_cents: 4_900, trial_days: 14 },
    PlanTier { id: "business", name: "Business", tier: 4, price_cents: 9_900, trial_days: 30 },
    PlanTier { id: "premium", name: "Premium", tier: 5, price_cents: 19_900, trial_days: 30 },
    PlanTier { id: "enterprise", name: "Enterprise", tier: 6, price_cents: 49_900, trial_days: 0 },
];

/// The full catalogue, ordered by tier.
pub fn plans() -> &'static [PlanTier] {
    &PLANS
}

/// Outcome of choosing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSelection {
    pub tier_number: u8,
    pub verification_type: VerificationType,
    pub plan: SelectedPlan,
    pub trial_days: u32,
}

/// Look up a plan by id and derive its tier and verification rigor.
pub fn select_plan(plan_id: &str) -> Result<TierSelection, ValidationError> {
    let plan = PLANS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(plan_id.trim()))
        .ok_or_else(|| ValidationError::UnknownPlan {
            plan_id: plan_id.to_string(),
        })?;

    Ok(TierSelection {
        tier_number: plan.tier,
        verification_type: plan.verification_type(),
        plan: plan.to_selected(),
        trial_days: plan.trial_days,
    })
}

/// Verification rigor for a raw tier number, rejecting tiers outside 1..=6.
pub fn verification_type_for_tier(tier: u8) -> Result<VerificationType, ValidationError> {
    if !(1..=6).contains(&tier) {
        return Err(ValidationError::InvalidTier { tier });
    }
    Ok(VerificationType::for_tier(tier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn catalogue_has_six_ordered_tiers() {
        let tiers: Vec<u8> = plans().iter().map(|p| p.tier).collect();
        assert_eq!(tiers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn formal_iff_tier_at_least_three() {
        for plan in plans() {
            let selection = select_plan(plan.id).unwrap();
            assert_eq!(selection.tier_number, plan.tier);
            assert_eq!(
                selection.verification_type == VerificationType::Formal,
                plan.tier >= 3,
                "plan {}",
                plan.id
            );
        }
    }

    #[test]
    fn selection_carries_price() {
        let selection = select_plan("business").unwrap();
        assert_eq!(selection.plan.price, dec!(99.00));
        assert_eq!(selection.plan.name, "Business");
        assert_eq!(selection.trial_days, 30);
    }

    #[test]
    fn plan_ids_are_case_insensitive() {
        assert_eq!(select_plan(" Growth ").unwrap().tier_number, 3);
    }

    #[test]
    fn unknown_plan_rejected() {
        assert_eq!(
            select_plan("platinum").unwrap_err(),
            ValidationError::UnknownPlan {
                plan_id: "platinum".to_string()
            }
        );
    }

    #[test]
    fn tier_bounds_checked() {
        assert!(verification_type_for_tier(0).is_err());
        assert!(verification_type_for_tier(7).is_err());
        assert_eq!(verification_type_for_tier(2).unwrap(), VerificationType::Informal);
        assert_eq!(verification_type_for_tier(3).unwrap(), VerificationType::Formal);
    }
}
