use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::domain::Plan;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub account_id: String,
    pub plan_id: String,
    /// Price in minor currency units (paise), captured from the plan
    /// at creation time.
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    /// Credit grant captured from the plan at creation time so later
    /// catalog changes cannot alter an in-flight order.
    pub credits: i32,
    pub payment_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Completed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    /// Completed is credit-granting and can never be overwritten;
    /// cancelled/failed are terminal but may still be completed by a
    /// late webhook (the payment actually went through).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Created)
    }
}

impl Order {
    pub fn new(account_id: String, plan: &Plan) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            account_id,
            plan_id: plan.id.to_string(),
            amount: plan.price,
            currency: "INR".to_string(),
            status: OrderStatus::Created,
            credits: plan.credits,
            payment_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::find_plan;
    use std::str::FromStr;

    #[test]
    fn order_captures_plan_price_and_credits() {
        let plan = find_plan("professional").unwrap();
        let order = Order::new("user-1".to_string(), plan);

        assert_eq!(order.amount, 49900);
        assert_eq!(order.credits, 30);
        assert_eq!(order.currency, "INR");
        assert_eq!(order.status, OrderStatus::Created);
        assert!(order.payment_id.is_none());
    }

    #[test]
    fn status_round_trips_as_snake_case() {
        assert_eq!(OrderStatus::Completed.to_string(), "completed");
        assert_eq!(
            OrderStatus::from_str("cancelled").unwrap(),
            OrderStatus::Cancelled
        );
        assert!(OrderStatus::from_str("nope").is_err());
    }

    #[test]
    fn only_created_is_non_terminal() {
        assert!(!OrderStatus::Created.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }
}
