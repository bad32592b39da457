use serde::Serialize;

/// Free credits granted when an account record is first created.
pub const INITIAL_GRANT: i64 = 10;

/// A purchasable credit pack. Static reference data, never persisted
/// per-user.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Plan {
    pub id: &'static str,
    pub name: &'static str,
    /// Price in minor currency units (paise).
    pub price: i64,
    pub credits: i32,
}

pub const PLANS: &[Plan] = &[
    Plan {
        id: "starter",
        name: "Starter",
        price: 100,
        credits: 10,
    },
    Plan {
        id: "professional",
        name: "Professional",
        price: 49900,
        credits: 30,
    },
    Plan {
        id: "enterprise",
        name: "Enterprise",
        price: 99900,
        credits: 100,
    },
];

/// Resolve a plan id against the static catalog. Plan data is never
/// trusted from client input when verifying a payment.
pub fn find_plan(plan_id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|p| p.id == plan_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_three_plans() {
        assert_eq!(PLANS.len(), 3);
        assert_eq!(find_plan("starter").unwrap().credits, 10);
        assert_eq!(find_plan("professional").unwrap().credits, 30);
        assert_eq!(find_plan("enterprise").unwrap().credits, 100);
    }

    #[test]
    fn unknown_plan_is_none() {
        assert!(find_plan("platinum").is_none());
        assert!(find_plan("").is_none());
    }
}
