use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Assigned,
    Waiting,
    Resolved,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Assigned => "assigned",
            Self::Waiting => "waiting",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// The full transition table. Anything not listed is rejected.
    pub fn can_transition(self, to: ConversationStatus) -> bool {
        use ConversationStatus::*;
        matches!(
            (self, to),
            (Open, Assigned)
                | (Assigned, Open)
                | (Open, Resolved)
                | (Assigned, Resolved)
                | (Open, Waiting)
                | (Assigned, Waiting)
                | (Waiting, Open)
                | (Waiting, Assigned)
                | (Resolved, Closed)
                | (Closed, Open)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn bumped(self) -> Priority {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Urgent => Self::Urgent,
        }
    }
}

/// Append-only record of one priority transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityChange {
    pub from: Priority,
    pub to: Priority,
    pub reason: String,
    pub triggered_by: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_phone: String,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub is_ai_enabled: bool,
    pub assigned_agent_id: Option<Uuid>,
    pub message_count: i64,
    pub unread_count: i64,
    pub last_message_preview: Option<String>,
    pub last_customer_message_at: Option<DateTime<Utc>>,
    pub reassignment_count: i32,
    pub priority_history: Vec<PriorityChange>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(customer_id: Uuid, customer_phone: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            customer_phone: customer_phone.to_string(),
            status: ConversationStatus::Open,
            priority: Priority::Medium,
            is_ai_enabled: true,
            assigned_agent_id: None,
            message_count: 0,
            unread_count: 0,
            last_message_preview: None,
            last_customer_message_at: None,
            reassignment_count: 0,
            priority_history: Vec::new(),
            resolved_at: None,
            resolved_by: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_status(&mut self, to: ConversationStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(Error::InvalidTransition {
                entity: "conversation",
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Hand the conversation to a human agent. AI stays out of the way until
    /// release.
    pub fn assign(&mut self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.set_status(ConversationStatus::Assigned, now)?;
        self.assigned_agent_id = Some(agent_id);
        self.is_ai_enabled = false;
        Ok(())
    }

    /// Give the conversation back to the AI responder.
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.set_status(ConversationStatus::Open, now)?;
        self.assigned_agent_id = None;
        self.is_ai_enabled = true;
        self.resolved_at = None;
        self.resolved_by = None;
        self.closed_at = None;
        Ok(())
    }

    pub fn resolve(&mut self, resolved_by: &str, now: DateTime<Utc>) -> Result<()> {
        self.set_status(ConversationStatus::Resolved, now)?;
        self.resolved_at = Some(now);
        self.resolved_by = Some(resolved_by.to_string());
        Ok(())
    }

    pub fn close(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.set_status(ConversationStatus::Closed, now)?;
        self.closed_at = Some(now);
        Ok(())
    }

    /// Privileged action only.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.set_status(ConversationStatus::Open, now)?;
        self.closed_at = None;
        self.is_ai_enabled = true;
        Ok(())
    }

    /// Park the conversation while a customer reply is pending.
    pub fn mark_waiting(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.set_status(ConversationStatus::Waiting, now)
    }

    /// The customer replied while parked: back to assigned if an agent still
    /// holds the thread, otherwise back to open.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        let to = if self.assigned_agent_id.is_some() {
            ConversationStatus::Assigned
        } else {
            ConversationStatus::Open
        };
        self.set_status(to, now)
    }

    pub fn is_closed(&self) -> bool {
        self.status == ConversationStatus::Closed
    }

    /// Automatic escalation: priority only ever goes up. Returns whether
    /// anything changed so callers can skip the persistence write.
    pub fn escalate(
        &mut self,
        to: Priority,
        reason: &str,
        triggered_by: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if to <= self.priority {
            return false;
        }
        self.priority_history.push(PriorityChange {
            from: self.priority,
            to,
            reason: reason.to_string(),
            triggered_by: triggered_by.to_string(),
            at: now,
        });
        self.priority = to;
        self.updated_at = now;
        true
    }

    /// Manual override by a privileged actor, the only path that may lower
    /// priority. Still appends to the history.
    pub fn override_priority(&mut self, to: Priority, actor: &str, now: DateTime<Utc>) -> bool {
        if to == self.priority {
            return false;
        }
        self.priority_history.push(PriorityChange {
            from: self.priority,
            to,
            reason: "manual override".to_string(),
            triggered_by: actor.to_string(),
            at: now,
        });
        self.priority = to;
        self.updated_at = now;
        true
    }

    pub fn record_inbound(&mut self, preview: &str, now: DateTime<Utc>) {
        self.message_count += 1;
        self.unread_count += 1;
        self.last_message_preview = Some(preview.chars().take(120).collect());
        self.last_customer_message_at = Some(now);
        self.updated_at = now;
    }

    pub fn record_outbound(&mut self, preview: &str, now: DateTime<Utc>) {
        self.message_count += 1;
        self.last_message_preview = Some(preview.chars().take(120).collect());
        self.updated_at = now;
    }
}
