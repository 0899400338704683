mod repository;

pub use repository::*;

/// SQL migration for users, customers, accounts and the transaction log
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for login sessions
pub const MIGRATION_002_SESSIONS: &str = include_str!("migrations/002_sessions.sql");
