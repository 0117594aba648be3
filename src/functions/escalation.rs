use chrono::{DateTime, Utc};

use crate::config::EscalationConfig;
use crate::schema::{Conversation, ConversationStatus, Customer, Priority};

pub const WAIT_REASON: &str = "wait threshold exceeded";

/// Applies the configured escalation triggers to a conversation. Priority
/// only ever moves up here; the manual override on the conversation itself is
/// the single path down.
#[derive(Clone)]
pub struct EscalationEngine {
    config: EscalationConfig,
}

impl EscalationEngine {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    fn matches_any(text: &str, keywords: &[String]) -> bool {
        let lower = text.to_lowercase();
        keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// VIP customers start at least at the configured floor.
    pub fn on_creation(
        &self,
        conversation: &mut Conversation,
        customer: &Customer,
        now: DateTime<Utc>,
    ) -> bool {
        if !customer.is_vip {
            return false;
        }
        conversation.escalate(self.config.vip_minimum, "vip customer", "system", now)
    }

    pub fn on_message(
        &self,
        conversation: &mut Conversation,
        text: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !Self::matches_any(text, &self.config.urgent_keywords) {
            return false;
        }
        conversation.escalate(Priority::Urgent, "urgent keyword", "system", now)
    }

    /// Whether the customer is asking for a human.
    pub fn wants_handoff(&self, text: &str) -> bool {
        Self::matches_any(text, &self.config.handoff_keywords)
    }

    pub fn on_reassignment(&self, conversation: &mut Conversation, now: DateTime<Utc>) -> bool {
        if conversation.reassignment_count < self.config.reassignment_urgent_threshold {
            return false;
        }
        conversation.escalate(Priority::Urgent, "repeated reassignment", "system", now)
    }

    /// One-level bump when an assigned conversation has been waiting past the
    /// threshold. At most one bump per customer message: a second tick over
    /// the same silence window is a no-op.
    pub fn on_wait(&self, conversation: &mut Conversation, now: DateTime<Utc>) -> bool {
        if conversation.status != ConversationStatus::Assigned {
            return false;
        }
        let Some(last) = conversation.last_customer_message_at else {
            return false;
        };
        if now - last < chrono::Duration::from_std(self.config.wait_threshold).unwrap_or_default()
        {
            return false;
        }
        let already_bumped = conversation
            .priority_history
            .iter()
            .any(|c| c.reason == WAIT_REASON && c.at > last);
        if already_bumped {
            return false;
        }
        let target = conversation.priority.bumped();
        conversation.escalate(target, WAIT_REASON, "system", now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscalationConfig;
    use std::time::Duration;
    use uuid::Uuid;

    fn engine() -> EscalationEngine {
        EscalationEngine::new(EscalationConfig {
            urgent_keywords: vec!["urgent".into(), "emergency".into()],
            handoff_keywords: vec!["agent".into(), "human".into()],
            wait_threshold: Duration::from_secs(900),
            reassignment_urgent_threshold: 2,
            vip_minimum: Priority::High,
        })
    }

    fn convo() -> Conversation {
        Conversation::new(Uuid::new_v4(), "5511999990000", Utc::now())
    }

    #[test]
    fn urgent_keyword_escalates_to_urgent() {
        let engine = engine();
        let mut c = convo();
        assert!(engine.on_message(&mut c, "this is URGENT, my store is down", Utc::now()));
        assert_eq!(c.priority, Priority::Urgent);
        assert_eq!(c.priority_history[0].reason, "urgent keyword");
    }

    #[test]
    fn plain_message_does_not_escalate() {
        let engine = engine();
        let mut c = convo();
        assert!(!engine.on_message(&mut c, "hello there", Utc::now()));
        assert_eq!(c.priority, Priority::Medium);
    }

    #[test]
    fn vip_floor_applies_on_creation_only_upwards() {
        let engine = engine();
        let mut customer = Customer::new("5511999990000", Utc::now());
        customer.is_vip = true;

        let mut c = convo();
        assert!(engine.on_creation(&mut c, &customer, Utc::now()));
        assert_eq!(c.priority, Priority::High);

        // already urgent: the vip floor never lowers it
        let mut urgent = convo();
        urgent.escalate(Priority::Urgent, "urgent keyword", "system", Utc::now());
        assert!(!engine.on_creation(&mut urgent, &customer, Utc::now()));
        assert_eq!(urgent.priority, Priority::Urgent);
    }

    #[test]
    fn second_reassignment_goes_urgent() {
        let engine = engine();
        let mut c = convo();
        c.reassignment_count = 1;
        assert!(!engine.on_reassignment(&mut c, Utc::now()));
        c.reassignment_count = 2;
        assert!(engine.on_reassignment(&mut c, Utc::now()));
        assert_eq!(c.priority, Priority::Urgent);
    }

    #[test]
    fn wait_bump_fires_once_per_silence_window() {
        let engine = engine();
        let mut c = convo();
        let t0 = Utc::now();
        c.assign(Uuid::new_v4(), t0).unwrap();
        c.last_customer_message_at = Some(t0);

        let t1 = t0 + chrono::Duration::seconds(901);
        assert!(engine.on_wait(&mut c, t1));
        assert_eq!(c.priority, Priority::High);

        // same silence window: no second bump
        let t2 = t0 + chrono::Duration::seconds(1800);
        assert!(!engine.on_wait(&mut c, t2));
        assert_eq!(c.priority, Priority::High);

        // a new customer message resets the window
        c.last_customer_message_at = Some(t2);
        let t3 = t2 + chrono::Duration::seconds(901);
        assert!(engine.on_wait(&mut c, t3));
        assert_eq!(c.priority, Priority::Urgent);
    }

    #[test]
    fn wait_bump_only_applies_while_assigned() {
        let engine = engine();
        let mut c = convo();
        c.last_customer_message_at = Some(Utc::now() - chrono::Duration::hours(2));
        assert!(!engine.on_wait(&mut c, Utc::now()));
    }

    #[test]
    fn handoff_keywords_are_detected() {
        let engine = engine();
        assert!(engine.wants_handoff("can I talk to a HUMAN please"));
        assert!(!engine.wants_handoff("my invoice is wrong"));
    }
}
