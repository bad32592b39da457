use crate::domain::INITIAL_GRANT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    /// Opaque user id issued by the authentication collaborator.
    pub id: String,
    pub credits: i64,
    pub plan_id: Option<String>,
    pub last_purchase: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: String) -> Self {
        let now = Utc::now();

        Self {
            id,
            credits: INITIAL_GRANT,
            plan_id: None,
            last_purchase: None,
            last_used: None,
            created_at: now,
            updated_at: now,
        }
    }
}
