use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{UserId, ledger_now};

pub type CustomerId = Uuid;

/// Customer profile, owned 1:1 by a user with the customer role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub user_id: UserId,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            phone: None,
            address: None,
            created_at: ledger_now(),
        }
    }

    pub fn with_contact(mut self, phone: Option<String>, address: Option<String>) -> Self {
        self.phone = phone.filter(|p| !p.trim().is_empty());
        self.address = address.filter(|a| !a.trim().is_empty());
        self
    }
}

/// A customer profile joined with its user, for staff listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer: Customer,
    pub name: String,
    pub email: String,
    pub is_active: bool,
}
