use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Away,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub status: AgentStatus,
    pub is_active: bool,
    pub auto_assign_enabled: bool,
    pub max_concurrent_chats: i32,
    pub active_assignments: i32,
    pub total_assignments: i64,
    /// The agent's own WhatsApp number, used for best-effort assignment pings.
    pub notify_phone: Option<String>,
    pub preferred_language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(name: &str, max_concurrent_chats: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: AgentStatus::Offline,
            is_active: true,
            auto_assign_enabled: true,
            max_concurrent_chats,
            active_assignments: 0,
            total_assignments: 0,
            notify_phone: None,
            preferred_language: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.active_assignments < self.max_concurrent_chats
    }

    /// Reachable for new work: active, signed in (online or away counts,
    /// busy and offline do not) and under the concurrency cap.
    pub fn is_available(&self) -> bool {
        self.is_active
            && matches!(self.status, AgentStatus::Online | AgentStatus::Away)
            && self.has_capacity()
    }

    pub fn record_assignment(&mut self, now: DateTime<Utc>) {
        self.active_assignments += 1;
        self.total_assignments += 1;
        self.updated_at = now;
    }

    pub fn record_release(&mut self, now: DateTime<Utc>) {
        self.active_assignments = (self.active_assignments - 1).max(0);
        self.updated_at = now;
    }
}
