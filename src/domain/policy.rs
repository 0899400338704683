//! Role-scoped access policy.
//!
//! Every gated call describes itself as an [`Operation`]. Operations on
//! customer-owned resources carry the owning user's id, resolved by the caller
//! before asking, so the policy itself stays a pure function.

use super::{Principal, Role, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    // Customer-owned resources
    ViewAccount { owner: UserId },
    ViewStatement { owner: UserId },
    Transfer { source_owner: UserId },
    ListOwnAccounts,
    ListOwnTransactions,

    // Bank-side operations
    Deposit,
    Withdraw,
    OpenAccount,
    SetAccountStatus,
    ProvisionCustomer,
    ListCustomers,
    ListCustomerAccounts,
    ReviewRegistration,

    // Administration
    ProvisionStaff,
    ListUsers,
    SetUserStatus,
    ListAllTransactions,
    ViewDashboard,
    CheckIntegrity,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ViewAccount { .. } => "view account",
            Operation::ViewStatement { .. } => "view statement",
            Operation::Transfer { .. } => "transfer",
            Operation::ListOwnAccounts => "list own accounts",
            Operation::ListOwnTransactions => "list own transactions",
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::OpenAccount => "open account",
            Operation::SetAccountStatus => "set account status",
            Operation::ProvisionCustomer => "provision customer",
            Operation::ListCustomers => "list customers",
            Operation::ListCustomerAccounts => "list customer accounts",
            Operation::ReviewRegistration => "review registration",
            Operation::ProvisionStaff => "provision staff",
            Operation::ListUsers => "list users",
            Operation::SetUserStatus => "set user status",
            Operation::ListAllTransactions => "list all transactions",
            Operation::ViewDashboard => "view dashboard",
            Operation::CheckIntegrity => "check integrity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy;

impl AccessPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn authorize(&self, principal: &Principal, operation: &Operation) -> Decision {
        let allowed = match principal.role {
            Role::Customer => Self::customer_may(principal, operation),
            Role::Staff => Self::staff_may(operation),
            // Admin is a superset of staff
            Role::Admin => Self::staff_may(operation) || Self::admin_may(operation),
        };

        if allowed {
            Decision::Allow
        } else {
            Decision::Deny(format!(
                "{} may not {}",
                principal.role,
                operation.name()
            ))
        }
    }

    fn customer_may(principal: &Principal, operation: &Operation) -> bool {
        match operation {
            Operation::ViewAccount { owner } | Operation::ViewStatement { owner } => {
                *owner == principal.user_id
            }
            Operation::Transfer { source_owner } => *source_owner == principal.user_id,
            Operation::ListOwnAccounts | Operation::ListOwnTransactions => true,
            _ => false,
        }
    }

    fn staff_may(operation: &Operation) -> bool {
        matches!(
            operation,
            Operation::ViewAccount { .. }
                | Operation::ViewStatement { .. }
                | Operation::Deposit
                | Operation::Withdraw
                | Operation::OpenAccount
                | Operation::SetAccountStatus
                | Operation::ProvisionCustomer
                | Operation::ListCustomers
                | Operation::ListCustomerAccounts
                | Operation::ReviewRegistration
        )
    }

    fn admin_may(operation: &Operation) -> bool {
        matches!(
            operation,
            Operation::ProvisionStaff
                | Operation::ListUsers
                | Operation::SetUserStatus
                | Operation::ListAllTransactions
                | Operation::ViewDashboard
                | Operation::CheckIntegrity
        )
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn principal(role: Role) -> Principal {
        Principal::new(Uuid::new_v4(), role)
    }

    #[test]
    fn test_customer_may_only_touch_own_accounts() {
        let policy = AccessPolicy::new();
        let customer = principal(Role::Customer);
        let stranger = Uuid::new_v4();

        assert!(
            policy
                .authorize(&customer, &Operation::Transfer { source_owner: customer.user_id })
                .is_allowed()
        );
        assert!(
            !policy
                .authorize(&customer, &Operation::Transfer { source_owner: stranger })
                .is_allowed()
        );
        assert!(
            !policy
                .authorize(&customer, &Operation::ViewStatement { owner: stranger })
                .is_allowed()
        );
    }

    #[test]
    fn test_customer_cannot_move_cash() {
        let policy = AccessPolicy::new();
        let customer = principal(Role::Customer);
        for op in [Operation::Deposit, Operation::Withdraw, Operation::OpenAccount] {
            assert!(!policy.authorize(&customer, &op).is_allowed(), "{:?}", op);
        }
    }

    #[test]
    fn test_staff_cannot_administer() {
        let policy = AccessPolicy::new();
        let staff = principal(Role::Staff);

        assert!(policy.authorize(&staff, &Operation::Deposit).is_allowed());
        assert!(policy.authorize(&staff, &Operation::ReviewRegistration).is_allowed());
        assert!(!policy.authorize(&staff, &Operation::ProvisionStaff).is_allowed());
        assert!(!policy.authorize(&staff, &Operation::ViewDashboard).is_allowed());
    }

    #[test]
    fn test_transfers_are_a_customer_capability() {
        let policy = AccessPolicy::new();
        let op = Operation::Transfer {
            source_owner: Uuid::new_v4(),
        };
        assert!(!policy.authorize(&principal(Role::Staff), &op).is_allowed());
        assert!(!policy.authorize(&principal(Role::Admin), &op).is_allowed());
    }

    #[test]
    fn test_admin_inherits_staff_capabilities() {
        let policy = AccessPolicy::new();
        let admin = principal(Role::Admin);
        for op in [
            Operation::Deposit,
            Operation::ProvisionCustomer,
            Operation::ProvisionStaff,
            Operation::SetUserStatus,
            Operation::CheckIntegrity,
        ] {
            assert!(policy.authorize(&admin, &op).is_allowed(), "{:?}", op);
        }
    }

    #[test]
    fn test_denial_names_role_and_operation() {
        let policy = AccessPolicy::new();
        let decision = policy.authorize(&principal(Role::Customer), &Operation::ListUsers);
        assert_eq!(decision, Decision::Deny("customer may not list users".into()));
    }
}
