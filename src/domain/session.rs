use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

pub type SessionId = Uuid;

/// Login audit row. Closed exactly once, on logout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub login_time: DateTime<Utc>,
    pub logout_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

impl Session {
    pub fn open(user_id: UserId, login_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            login_time,
            logout_time: None,
            duration_seconds: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.logout_time.is_none()
    }

    /// Close the session, computing its duration.
    pub fn close(&mut self, logout_time: DateTime<Utc>) {
        let elapsed = logout_time - self.login_time;
        self.logout_time = Some(logout_time);
        self.duration_seconds = Some(elapsed.num_milliseconds() as f64 / 1000.0);
    }
}

/// Session joined with the user's name, for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: Session,
    pub user_name: String,
}
