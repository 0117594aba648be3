use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A WhatsApp customer, keyed by phone number. Created lazily on the first
/// inbound message and never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub phone: String,
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub is_vip: bool,
    pub is_blocked: bool,
    pub message_count: i64,
    pub conversation_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            phone: phone.to_string(),
            name: None,
            tags: Vec::new(),
            is_vip: false,
            is_blocked: false,
            message_count: 0,
            conversation_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_messages(&mut self, count: i64, now: DateTime<Utc>) {
        self.message_count += count;
        self.updated_at = now;
    }

    pub fn record_conversation(&mut self, now: DateTime<Utc>) {
        self.conversation_count += 1;
        self.updated_at = now;
    }
}
