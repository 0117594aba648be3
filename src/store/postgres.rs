use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::Result;
use crate::schema::{
    Agent, AssignmentRecord, Conversation, Customer, DeliveryStatus, StoredMessage, Ticket,
};
use crate::store::Store;

/// Postgres backend. Entities are kept as JSONB documents next to the columns
/// the pipeline filters on; the document is the authoritative shape, the
/// columns exist for indexing.
pub struct PgStore {
    pool: PgPool,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id uuid PRIMARY KEY,
    phone text NOT NULL UNIQUE,
    data jsonb NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id uuid PRIMARY KEY,
    customer_id uuid NOT NULL,
    status text NOT NULL,
    assigned_agent_id uuid,
    created_at timestamptz NOT NULL,
    data jsonb NOT NULL
);
CREATE INDEX IF NOT EXISTS conversations_customer_idx ON conversations (customer_id, status);

CREATE TABLE IF NOT EXISTS messages (
    id uuid PRIMARY KEY,
    conversation_id uuid NOT NULL,
    external_id text,
    status text NOT NULL,
    created_at timestamptz NOT NULL,
    data jsonb NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_conversation_idx ON messages (conversation_id, created_at);
CREATE INDEX IF NOT EXISTS messages_external_idx ON messages (external_id);

CREATE TABLE IF NOT EXISTS agents (
    id uuid PRIMARY KEY,
    created_at timestamptz NOT NULL,
    data jsonb NOT NULL
);

CREATE TABLE IF NOT EXISTS tickets (
    id uuid PRIMARY KEY,
    number text NOT NULL UNIQUE,
    created_at timestamptz NOT NULL,
    data jsonb NOT NULL
);

CREATE TABLE IF NOT EXISTS ticket_sequences (
    year int PRIMARY KEY,
    value bigint NOT NULL
);

CREATE TABLE IF NOT EXISTS assignments (
    id uuid PRIMARY KEY,
    conversation_id uuid NOT NULL,
    agent_id uuid NOT NULL,
    released_at timestamptz,
    assigned_at timestamptz NOT NULL,
    data jsonb NOT NULL
);
CREATE INDEX IF NOT EXISTS assignments_open_idx ON assignments (conversation_id, agent_id)
    WHERE released_at IS NULL;
"#;

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn decode<T: DeserializeOwned>(row: &PgRow) -> Result<T> {
        let data: serde_json::Value = row.try_get("data").map_err(anyhow::Error::from)?;
        Ok(serde_json::from_value(data)?)
    }

    fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(value)?)
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn customer_by_phone(&self, phone: &str) -> Result<Option<Customer>> {
        let row = sqlx::query("SELECT data FROM customers WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn save_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, phone, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(customer.id)
        .bind(&customer.phone)
        .bind(Self::encode(customer)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT data FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn active_conversation(&self, customer_id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM conversations
            WHERE customer_id = $1 AND status <> 'closed'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn assigned_conversations(&self) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT data FROM conversations WHERE assigned_agent_id IS NOT NULL AND status <> 'closed'",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, customer_id, status, assigned_agent_id, created_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                assigned_agent_id = EXCLUDED.assigned_agent_id,
                data = EXCLUDED.data
            "#,
        )
        .bind(conversation.id)
        .bind(conversation.customer_id)
        .bind(conversation.status.as_str())
        .bind(conversation.assigned_agent_id)
        .bind(conversation.created_at)
        .bind(Self::encode(conversation)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_message(&self, message: &StoredMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, external_id, status, created_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(&message.external_id)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(Self::encode(message)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn message_by_external_id(&self, external_id: &str) -> Result<Option<StoredMessage>> {
        let row = sqlx::query("SELECT data FROM messages WHERE external_id = $1 LIMIT 1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn update_message_status(&self, id: Uuid, status: DeliveryStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET status = $2, data = jsonb_set(data, '{status}', to_jsonb($2::text))
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND created_at >= $2",
        )
        .bind(conversation_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn agent(&self, id: Uuid) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT data FROM agents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT data FROM agents ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, created_at, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(agent.id)
        .bind(agent.created_at)
        .bind(Self::encode(agent)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ticket(&self, id: Uuid) -> Result<Option<Ticket>> {
        let row = sqlx::query("SELECT data FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn ticket_by_number(&self, number: &str) -> Result<Option<Ticket>> {
        let row = sqlx::query("SELECT data FROM tickets WHERE number = $1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tickets (id, number, created_at, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(ticket.id)
        .bind(&ticket.number)
        .bind(ticket.created_at)
        .bind(Self::encode(ticket)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn next_ticket_sequence(&self, year: i32) -> Result<i64> {
        // single statement so concurrent creators never see the same value
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ticket_sequences (year, value)
            VALUES ($1, 1)
            ON CONFLICT (year) DO UPDATE SET value = ticket_sequences.value + 1
            RETURNING value
            "#,
        )
        .bind(year)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn insert_assignment(&self, record: &AssignmentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO assignments (id, conversation_id, agent_id, released_at, assigned_at, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.conversation_id)
        .bind(record.agent_id)
        .bind(record.released_at)
        .bind(record.assigned_at)
        .bind(Self::encode(record)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_assignment(
        &self,
        conversation_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<AssignmentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT data FROM assignments
            WHERE conversation_id = $1 AND agent_id = $2 AND released_at IS NULL
            ORDER BY assigned_at DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::decode(&r)).transpose()
    }

    async fn save_assignment(&self, record: &AssignmentRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE assignments
            SET released_at = $2, data = $3
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.released_at)
        .bind(Self::encode(record)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
