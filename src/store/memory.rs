use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{
    Agent, AssignmentRecord, Conversation, Customer, DeliveryStatus, Direction, StoredMessage,
    Ticket,
};
use crate::store::Store;

/// In-memory backend. Serves tests and DB-less development runs; everything
/// is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    customers: RwLock<HashMap<Uuid, Customer>>,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    messages: RwLock<HashMap<Uuid, StoredMessage>>,
    agents: RwLock<HashMap<Uuid, Agent>>,
    tickets: RwLock<HashMap<Uuid, Ticket>>,
    assignments: RwLock<HashMap<Uuid, AssignmentRecord>>,
    ticket_sequences: RwLock<HashMap<i32, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_for(&self, conversation_id: Uuid) -> Vec<StoredMessage> {
        let mut messages: Vec<_> = self
            .messages
            .read()
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    pub fn outbound_messages(&self, conversation_id: Uuid) -> Vec<StoredMessage> {
        self.messages_for(conversation_id)
            .into_iter()
            .filter(|m| m.direction == Direction::Outbound)
            .collect()
    }

    pub fn assignments_for(&self, conversation_id: Uuid) -> Vec<AssignmentRecord> {
        let mut records: Vec<_> = self
            .assignments
            .read()
            .values()
            .filter(|a| a.conversation_id == conversation_id)
            .cloned()
            .collect();
        records.sort_by_key(|a| a.assigned_at);
        records
    }

    pub fn all_tickets(&self) -> Vec<Ticket> {
        let mut tickets: Vec<_> = self.tickets.read().values().cloned().collect();
        tickets.sort_by_key(|t| t.created_at);
        tickets
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn customer_by_phone(&self, phone: &str) -> Result<Option<Customer>> {
        Ok(self
            .customers
            .read()
            .values()
            .find(|c| c.phone == phone)
            .cloned())
    }

    async fn save_customer(&self, customer: &Customer) -> Result<()> {
        self.customers
            .write()
            .insert(customer.id, customer.clone());
        Ok(())
    }

    async fn conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().get(&id).cloned())
    }

    async fn active_conversation(&self, customer_id: Uuid) -> Result<Option<Conversation>> {
        Ok(self
            .conversations
            .read()
            .values()
            .filter(|c| c.customer_id == customer_id && !c.is_closed())
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn assigned_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self
            .conversations
            .read()
            .values()
            .filter(|c| c.assigned_agent_id.is_some() && !c.is_closed())
            .cloned()
            .collect())
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .write()
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        self.messages.write().insert(message.id, message.clone());
        Ok(())
    }

    async fn message_by_external_id(&self, external_id: &str) -> Result<Option<StoredMessage>> {
        Ok(self
            .messages
            .read()
            .values()
            .find(|m| m.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn update_message_status(&self, id: Uuid, status: DeliveryStatus) -> Result<()> {
        if let Some(message) = self.messages.write().get_mut(&id) {
            message.status = status;
        }
        Ok(())
    }

    async fn count_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        Ok(self
            .messages
            .read()
            .values()
            .filter(|m| m.conversation_id == conversation_id && m.created_at >= since)
            .count() as i64)
    }

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(self.agents.read().get(&id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut agents: Vec<_> = self.agents.read().values().cloned().collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        self.agents.write().insert(agent.id, agent.clone());
        Ok(())
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>> {
        Ok(self.tickets.read().get(&id).cloned())
    }

    async fn ticket_by_number(&self, number: &str) -> Result<Option<Ticket>> {
        Ok(self
            .tickets
            .read()
            .values()
            .find(|t| t.number == number)
            .cloned())
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.tickets.write().insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn next_ticket_sequence(&self, year: i32) -> Result<i64> {
        let mut sequences = self.ticket_sequences.write();
        let next = sequences.entry(year).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    async fn insert_assignment(&self, record: &AssignmentRecord) -> Result<()> {
        self.assignments.write().insert(record.id, record.clone());
        Ok(())
    }

    async fn open_assignment(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<AssignmentRecord>> {
        Ok(self
            .assignments
            .read()
            .values()
            .find(|a| {
                a.conversation_id == conversation_id && a.agent_id == agent_id && a.is_open()
            })
            .cloned())
    }

    async fn save_assignment(&self, record: &AssignmentRecord) -> Result<()> {
        self.assignments.write().insert(record.id, record.clone());
        Ok(())
    }
}
