mod account;
mod customer;
mod ledger;
mod money;
mod policy;
mod session;
mod statement;
mod transaction;
mod user;

pub use account::*;
pub use customer::*;
pub use ledger::*;
pub use money::*;
pub use policy::*;
pub use session::*;
pub use statement::*;
pub use transaction::*;
pub use user::*;
