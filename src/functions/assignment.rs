use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::coordination::{CustomerGate, GatePermit};
use crate::error::{Error, Result};
use crate::functions::escalation::EscalationEngine;
use crate::schema::{Agent, AssignmentRecord, Conversation, MessageKind};
use crate::services::{EventBus, MessagingGateway};
use crate::store::Store;

/// Selects agents for conversations and keeps the assignment trail. All
/// validation happens before any mutation, so a failed call leaves the
/// conversation and the agent exactly as they were.
///
/// The externally-triggered operations (`assign`, `release`, `transfer`)
/// take the per-customer gate, so they serialize with the flush loop for the
/// same customer instead of racing its conversation write-back.
pub struct AssignmentEngine {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    gateway: Arc<dyn MessagingGateway>,
    gate: Arc<CustomerGate>,
    escalation: EscalationEngine,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        gateway: Arc<dyn MessagingGateway>,
        gate: Arc<CustomerGate>,
        escalation: EscalationEngine,
    ) -> Self {
        Self {
            store,
            bus,
            gateway,
            gate,
            escalation,
        }
    }

    async fn load_conversation(&self, id: Uuid) -> Result<Conversation> {
        self.store
            .conversation(id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", id))
    }

    async fn load_agent(&self, id: Uuid) -> Result<Agent> {
        self.store
            .agent(id)
            .await?
            .ok_or_else(|| Error::not_found("agent", id))
    }

    /// Acquires the conversation's customer gate, then re-reads the
    /// conversation under the permit: the pre-acquire copy may predate a
    /// flush that was holding the gate.
    async fn gate_for(&self, conversation_id: Uuid) -> Result<(GatePermit, Conversation)> {
        let phone = self.load_conversation(conversation_id).await?.customer_phone;
        let permit = self.gate.acquire(&phone).await?;
        let conversation = self.load_conversation(conversation_id).await?;
        Ok((permit, conversation))
    }

    /// Least-loaded eligible agent: active, online or away, opted into
    /// auto-assign, under capacity. Falls back to any available agent
    /// regardless of the opt-in before giving up.
    async fn pick_agent(&self) -> Result<Agent> {
        let agents = self.store.list_agents().await?;

        let eligible = agents
            .iter()
            .filter(|a| a.is_available() && a.auto_assign_enabled)
            .min_by_key(|a| a.active_assignments);
        if let Some(agent) = eligible {
            return Ok(agent.clone());
        }

        agents
            .iter()
            .filter(|a| a.is_available())
            .min_by_key(|a| a.active_assignments)
            .cloned()
            .ok_or(Error::AgentUnavailable)
    }

    /// Shared assignment tail once the agent has been chosen and validated.
    async fn do_assign(
        &self,
        mut conversation: Conversation,
        mut agent: Agent,
        assigned_by: &str,
    ) -> Result<Agent> {
        let now = Utc::now();
        let previous_status = conversation.status;
        conversation.assign(agent.id, now)?;
        agent.record_assignment(now);

        let tags = match self.store.customer_by_phone(&conversation.customer_phone).await? {
            Some(customer) => customer.tags,
            None => Vec::new(),
        };
        let record = AssignmentRecord::open(&conversation, agent.id, assigned_by, &tags, now);

        self.store.insert_assignment(&record).await?;
        self.store.save_agent(&agent).await?;
        self.store.save_conversation(&conversation).await?;

        tracing::info!(
            conversation_id = %conversation.id,
            agent_id = %agent.id,
            assigned_by,
            active = agent.active_assignments,
            "conversation assigned"
        );

        self.bus.publish(
            "conversation.assigned",
            serde_json::json!({
                "conversation": conversation,
                "previous_status": previous_status.as_str(),
                "agent_id": agent.id,
                "actor": assigned_by,
            }),
        );

        // best-effort ping on the agent's own channel; never blocks the
        // assignment and a failure only logs
        if let Some(phone) = agent.notify_phone.clone() {
            let gateway = self.gateway.clone();
            let preview = conversation
                .last_message_preview
                .clone()
                .unwrap_or_default();
            let text = format!(
                "New chat assigned from {}: {preview}",
                conversation.customer_phone
            );
            tokio::spawn(async move {
                if let Err(e) = gateway.send(&phone, MessageKind::Text, &text).await {
                    tracing::warn!(error = %e, "agent notification failed");
                }
            });
        }

        Ok(agent)
    }

    /// Automatic assignment. `AgentUnavailable` leaves the conversation
    /// unassigned; callers retry on the next trigger. The flush loop calls
    /// this while already holding the customer gate, so it is not taken here.
    pub async fn auto_assign(&self, conversation_id: Uuid, assigned_by: &str) -> Result<Agent> {
        let conversation = self.load_conversation(conversation_id).await?;
        let agent = self.pick_agent().await?;
        self.do_assign(conversation, agent, assigned_by).await
    }

    /// Manual assignment to a specific agent, with the named validation
    /// failures.
    pub async fn assign(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
        assigned_by: &str,
    ) -> Result<Agent> {
        let (_permit, conversation) = self.gate_for(conversation_id).await?;
        let agent = self.load_agent(agent_id).await?;

        if !agent.is_active {
            return Err(Error::AgentInactive(agent.id));
        }
        if !agent.auto_assign_enabled {
            return Err(Error::AutoAssignDisabled(agent.id));
        }
        if !agent.has_capacity() {
            return Err(Error::AgentAtCapacity(agent.id));
        }

        self.do_assign(conversation, agent, assigned_by).await
    }

    /// Hands the conversation back to the AI and closes the assignment
    /// record with its duration and interaction analysis.
    pub async fn release(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        let (_permit, conversation) = self.gate_for(conversation_id).await?;
        self.release_locked(conversation, agent_id, reason).await
    }

    /// Release body shared with `transfer`, which already holds the gate.
    async fn release_locked(
        &self,
        mut conversation: Conversation,
        agent_id: Uuid,
        reason: &str,
    ) -> Result<()> {
        let conversation_id = conversation.id;
        let mut agent = self.load_agent(agent_id).await?;
        let now = Utc::now();
        let previous_status = conversation.status;

        conversation.release(now)?;
        agent.record_release(now);

        if let Some(mut record) = self.store.open_assignment(conversation_id, agent_id).await? {
            let exchanged = self
                .store
                .count_messages_since(conversation_id, record.assigned_at)
                .await?;
            record.close(reason, exchanged, now);
            self.store.save_assignment(&record).await?;
        } else {
            tracing::warn!(%conversation_id, %agent_id, "release without open assignment record");
        }

        self.store.save_agent(&agent).await?;
        self.store.save_conversation(&conversation).await?;

        tracing::info!(%conversation_id, %agent_id, reason, "conversation released");
        self.bus.publish(
            "conversation.released",
            serde_json::json!({
                "conversation": conversation,
                "previous_status": previous_status.as_str(),
                "agent_id": agent_id,
                "reason": reason,
            }),
        );
        Ok(())
    }

    /// Release from one agent, assign to another. Counts as a reassignment
    /// for the escalation engine.
    pub async fn transfer(
        &self,
        conversation_id: Uuid,
        from_agent: Uuid,
        to_agent: Uuid,
        reason: &str,
    ) -> Result<Agent> {
        let (_permit, conversation) = self.gate_for(conversation_id).await?;

        // validate the target before touching anything so a bad transfer
        // does not strand the conversation unassigned
        let target = self.load_agent(to_agent).await?;
        if !target.is_active {
            return Err(Error::AgentInactive(target.id));
        }
        if !target.auto_assign_enabled {
            return Err(Error::AutoAssignDisabled(target.id));
        }
        if !target.has_capacity() {
            return Err(Error::AgentAtCapacity(target.id));
        }

        self.release_locked(conversation, from_agent, reason).await?;
        let agent = self
            .do_assign(
                self.load_conversation(conversation_id).await?,
                self.load_agent(to_agent).await?,
                &format!("transfer from {from_agent}"),
            )
            .await?;

        let mut conversation = self.load_conversation(conversation_id).await?;
        conversation.reassignment_count += 1;
        let now = Utc::now();
        if self.escalation.on_reassignment(&mut conversation, now) {
            self.bus.publish(
                "conversation.escalated",
                serde_json::json!({
                    "conversation": conversation,
                    "reason": "repeated reassignment",
                }),
            );
        }
        self.store.save_conversation(&conversation).await?;

        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EscalationConfig;
    use crate::schema::{AgentStatus, Customer, Priority};
    use crate::services::events::testing::RecordingBus;
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct NullGateway;

    #[async_trait::async_trait]
    impl MessagingGateway for NullGateway {
        async fn send(
            &self,
            _recipient: &str,
            _kind: MessageKind,
            _body: &str,
        ) -> Result<String> {
            Ok("d1".into())
        }
    }

    fn escalation() -> EscalationEngine {
        EscalationEngine::new(EscalationConfig {
            urgent_keywords: vec!["urgent".into()],
            handoff_keywords: vec!["agent".into()],
            wait_threshold: Duration::from_secs(900),
            reassignment_urgent_threshold: 2,
            vip_minimum: Priority::High,
        })
    }

    async fn setup() -> (Arc<MemoryStore>, Arc<RecordingBus>, AssignmentEngine) {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(RecordingBus::default());
        let engine = AssignmentEngine::new(
            store.clone(),
            bus.clone(),
            Arc::new(NullGateway),
            Arc::new(CustomerGate::new(Duration::from_secs(5))),
            escalation(),
        );
        (store, bus, engine)
    }

    async fn seed_conversation(store: &MemoryStore) -> Conversation {
        let customer = Customer::new("5511999990000", Utc::now());
        store.save_customer(&customer).await.unwrap();
        let convo = Conversation::new(customer.id, &customer.phone, Utc::now());
        store.save_conversation(&convo).await.unwrap();
        convo
    }

    async fn seed_agent(store: &MemoryStore, name: &str, active_assignments: i32) -> Agent {
        let mut agent = Agent::new(name, 3, Utc::now());
        agent.status = AgentStatus::Online;
        agent.active_assignments = active_assignments;
        store.save_agent(&agent).await.unwrap();
        agent
    }

    #[tokio::test]
    async fn auto_assign_picks_least_loaded_eligible_agent() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        seed_agent(&store, "loaded", 2).await;
        let idle = seed_agent(&store, "idle", 0).await;

        let picked = engine.auto_assign(convo.id, "system").await.unwrap();
        assert_eq!(picked.id, idle.id);

        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert_eq!(convo.assigned_agent_id, Some(idle.id));
        assert!(!convo.is_ai_enabled);
    }

    #[tokio::test]
    async fn auto_assign_skips_agents_at_capacity() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        seed_agent(&store, "full", 3).await; // at max_concurrent_chats
        let next = seed_agent(&store, "next", 1).await;

        let picked = engine.auto_assign(convo.id, "system").await.unwrap();
        assert_eq!(picked.id, next.id);
    }

    #[tokio::test]
    async fn auto_assign_falls_back_to_opted_out_agents() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        let mut opted_out = seed_agent(&store, "optout", 0).await;
        opted_out.auto_assign_enabled = false;
        store.save_agent(&opted_out).await.unwrap();

        let picked = engine.auto_assign(convo.id, "system").await.unwrap();
        assert_eq!(picked.id, opted_out.id);
    }

    #[tokio::test]
    async fn auto_assign_without_agents_reports_unavailable() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;

        match engine.auto_assign(convo.id, "system").await {
            Err(Error::AgentUnavailable) => {}
            other => panic!("expected AgentUnavailable, got {other:?}"),
        }
        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert!(convo.assigned_agent_id.is_none());
        assert!(convo.is_ai_enabled);
    }

    #[tokio::test]
    async fn manual_assign_at_capacity_fails_without_mutation() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        let full = seed_agent(&store, "full", 3).await;

        match engine.assign(convo.id, full.id, "supervisor-1").await {
            Err(Error::AgentAtCapacity(id)) => assert_eq!(id, full.id),
            other => panic!("expected AgentAtCapacity, got {other:?}"),
        }

        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert!(convo.assigned_agent_id.is_none());
        assert_eq!(convo.status.as_str(), "open");
        let agent = store.agent(full.id).await.unwrap().unwrap();
        assert_eq!(agent.active_assignments, 3);
    }

    #[tokio::test]
    async fn manual_assign_validates_inactive_and_opt_out() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;

        let mut inactive = seed_agent(&store, "inactive", 0).await;
        inactive.is_active = false;
        store.save_agent(&inactive).await.unwrap();
        assert!(matches!(
            engine.assign(convo.id, inactive.id, "sup").await,
            Err(Error::AgentInactive(_))
        ));

        let mut opted_out = seed_agent(&store, "optout", 0).await;
        opted_out.auto_assign_enabled = false;
        store.save_agent(&opted_out).await.unwrap();
        assert!(matches!(
            engine.assign(convo.id, opted_out.id, "sup").await,
            Err(Error::AutoAssignDisabled(_))
        ));
    }

    #[tokio::test]
    async fn release_reopens_and_closes_the_assignment_record() {
        let (store, bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        let agent = seed_agent(&store, "dana", 0).await;

        engine.assign(convo.id, agent.id, "system").await.unwrap();
        engine
            .release(convo.id, agent.id, "resolved by agent")
            .await
            .unwrap();

        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert_eq!(convo.status.as_str(), "open");
        assert!(convo.is_ai_enabled);
        assert!(convo.assigned_agent_id.is_none());

        let agent = store.agent(agent.id).await.unwrap().unwrap();
        assert_eq!(agent.active_assignments, 0);
        assert_eq!(agent.total_assignments, 1);

        let records = store.assignments_for(convo.id);
        assert_eq!(records.len(), 1);
        assert!(records[0].released_at.is_some());
        assert!(records[0].duration_seconds.is_some());
        assert_eq!(
            records[0].analysis.as_ref().unwrap().outcome,
            "resolved by agent"
        );

        let topics = bus.topics();
        assert!(topics.contains(&"conversation.assigned".to_string()));
        assert!(topics.contains(&"conversation.released".to_string()));
    }

    #[tokio::test]
    async fn transfer_counts_reassignments_and_escalates_at_threshold() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        let a = seed_agent(&store, "a", 0).await;
        let b = seed_agent(&store, "b", 0).await;

        engine.assign(convo.id, a.id, "system").await.unwrap();
        engine.transfer(convo.id, a.id, b.id, "handover").await.unwrap();
        engine.transfer(convo.id, b.id, a.id, "handover back").await.unwrap();

        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert_eq!(convo.reassignment_count, 2);
        assert_eq!(convo.priority, Priority::Urgent);
        assert_eq!(convo.assigned_agent_id, Some(a.id));
    }

    #[tokio::test]
    async fn urgent_priority_survives_transfers() {
        // priority already at the ceiling: transfers only move the counter
        let (store, _bus, engine) = setup().await;
        let mut convo = seed_conversation(&store).await;
        convo.escalate(Priority::Urgent, "urgent keyword", "system", Utc::now());
        store.save_conversation(&convo).await.unwrap();
        let a = seed_agent(&store, "a", 0).await;
        let b = seed_agent(&store, "b", 0).await;

        engine.assign(convo.id, a.id, "system").await.unwrap();
        engine.transfer(convo.id, a.id, b.id, "x").await.unwrap();
        engine.transfer(convo.id, b.id, a.id, "y").await.unwrap();

        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert_eq!(convo.priority, Priority::Urgent);
        assert_eq!(convo.reassignment_count, 2);
    }

    #[tokio::test]
    async fn transfer_to_opted_out_agent_is_rejected() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        let a = seed_agent(&store, "a", 0).await;
        let mut opted_out = seed_agent(&store, "optout", 0).await;
        opted_out.auto_assign_enabled = false;
        store.save_agent(&opted_out).await.unwrap();

        engine.assign(convo.id, a.id, "system").await.unwrap();
        assert!(matches!(
            engine.transfer(convo.id, a.id, opted_out.id, "x").await,
            Err(Error::AutoAssignDisabled(_))
        ));

        // nothing moved: still with the original agent
        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert_eq!(convo.assigned_agent_id, Some(a.id));
        assert_eq!(convo.reassignment_count, 0);
    }

    #[tokio::test]
    async fn transfer_to_full_agent_fails_before_releasing() {
        let (store, _bus, engine) = setup().await;
        let convo = seed_conversation(&store).await;
        let a = seed_agent(&store, "a", 0).await;
        let full = seed_agent(&store, "full", 3).await;

        engine.assign(convo.id, a.id, "system").await.unwrap();
        assert!(matches!(
            engine.transfer(convo.id, a.id, full.id, "x").await,
            Err(Error::AgentAtCapacity(_))
        ));

        // the conversation is still with the original agent
        let convo = store.conversation(convo.id).await.unwrap().unwrap();
        assert_eq!(convo.assigned_agent_id, Some(a.id));
    }
}
