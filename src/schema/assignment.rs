use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{Conversation, Priority};

/// What the conversation looked like at the moment of assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub message_count: i64,
    pub unread_count: i64,
    pub priority: Priority,
    pub tags: Vec<String>,
}

impl ContextSnapshot {
    pub fn capture(conversation: &Conversation, tags: &[String]) -> Self {
        Self {
            message_count: conversation.message_count,
            unread_count: conversation.unread_count,
            priority: conversation.priority,
            tags: tags.to_vec(),
        }
    }
}

/// Post-hoc summary of what happened while the agent held the conversation,
/// attached when the assignment is released.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionAnalysis {
    pub messages_exchanged: i64,
    pub duration_seconds: i64,
    pub outcome: String,
}

/// Append-only assignment trail entry. After release is recorded the only
/// permitted mutation is attaching the analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub customer_id: Uuid,
    pub agent_id: Uuid,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub context: ContextSnapshot,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<String>,
    pub duration_seconds: Option<i64>,
    pub analysis: Option<InteractionAnalysis>,
}

impl AssignmentRecord {
    pub fn open(
        conversation: &Conversation,
        agent_id: Uuid,
        assigned_by: &str,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            customer_id: conversation.customer_id,
            agent_id,
            assigned_by: assigned_by.to_string(),
            assigned_at: now,
            context: ContextSnapshot::capture(conversation, tags),
            released_at: None,
            release_reason: None,
            duration_seconds: None,
            analysis: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.released_at.is_none()
    }

    pub fn close(
        &mut self,
        reason: &str,
        messages_exchanged: i64,
        now: DateTime<Utc>,
    ) {
        let duration = (now - self.assigned_at).num_seconds().max(0);
        self.released_at = Some(now);
        self.release_reason = Some(reason.to_string());
        self.duration_seconds = Some(duration);
        self.analysis = Some(InteractionAnalysis {
            messages_exchanged,
            duration_seconds: duration,
            outcome: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn close_computes_duration_and_attaches_analysis() {
        let convo = Conversation::new(Uuid::new_v4(), "5511999990000", Utc::now());
        let mut rec = AssignmentRecord::open(&convo, Uuid::new_v4(), "system", &[], Utc::now());
        assert!(rec.is_open());

        let later = rec.assigned_at + Duration::seconds(95);
        rec.close("resolved by agent", 7, later);

        assert!(!rec.is_open());
        assert_eq!(rec.duration_seconds, Some(95));
        let analysis = rec.analysis.as_ref().unwrap();
        assert_eq!(analysis.messages_exchanged, 7);
        assert_eq!(analysis.outcome, "resolved by agent");
    }
}
