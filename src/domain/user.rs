use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ledger_now;

pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Provisions staff, manages users, sees everything
    Admin,
    /// Acts on behalf of the bank: onboarding, cash desk operations
    Staff,
    /// Account holder
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Customer => "customer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            "customer" => Some(Role::Customer),
            _ => None,
        }
    }

    /// Returns true for roles that act on behalf of the bank.
    pub fn is_bank_side(&self) -> bool {
        matches!(self, Role::Admin | Role::Staff)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    /// Opaque credential produced by a `CredentialHasher`
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    /// Who provisioned this user; `None` for self-registration and bootstrap
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, email: String, password_hash: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            email: normalize_email(&email),
            password_hash,
            role,
            is_active: true,
            created_by: None,
            created_at: ledger_now(),
        }
    }

    pub fn with_created_by(mut self, creator: UserId) -> Self {
        self.created_by = Some(creator);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// A self-registered customer that staff has not approved yet.
    pub fn is_pending(&self) -> bool {
        self.role == Role::Customer && !self.is_active && self.created_by.is_none()
    }

    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.id,
            role: self.role,
        }
    }
}

/// Emails are compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// An authenticated caller identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }
}
