pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{
    Agent, AssignmentRecord, Conversation, Customer, DeliveryStatus, StoredMessage, Ticket,
};

/// Persistence port. The store is the single source of truth across process
/// restarts; everything the coordinator keeps in memory is an optimization
/// layered on top of it.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn customer_by_phone(&self, phone: &str) -> Result<Option<Customer>>;
    async fn save_customer(&self, customer: &Customer) -> Result<()>;

    async fn conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    /// The customer's non-closed conversation used for routing, if any.
    async fn active_conversation(&self, customer_id: Uuid) -> Result<Option<Conversation>>;
    async fn assigned_conversations(&self) -> Result<Vec<Conversation>>;
    async fn save_conversation(&self, conversation: &Conversation) -> Result<()>;

    async fn insert_message(&self, message: &StoredMessage) -> Result<()>;
    /// Lookup by the gateway-side id, used to route delivery receipts.
    async fn message_by_external_id(&self, external_id: &str) -> Result<Option<StoredMessage>>;
    async fn update_message_status(&self, id: Uuid, status: DeliveryStatus) -> Result<()>;
    async fn count_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>>;
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn save_agent(&self, agent: &Agent) -> Result<()>;

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>>;
    async fn ticket_by_number(&self, number: &str) -> Result<Option<Ticket>>;
    async fn save_ticket(&self, ticket: &Ticket) -> Result<()>;
    /// Atomic per-year increment backing ticket numbers. Starts at 1 for each
    /// new calendar year.
    async fn next_ticket_sequence(&self, year: i32) -> Result<i64>;

    async fn insert_assignment(&self, record: &AssignmentRecord) -> Result<()>;
    /// The not-yet-released assignment record for this conversation/agent pair.
    async fn open_assignment(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<AssignmentRecord>>;
    async fn save_assignment(&self, record: &AssignmentRecord) -> Result<()>;
}
