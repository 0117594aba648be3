use std::sync::Arc;

use chrono::{Datelike, Utc};
use uuid::Uuid;

use crate::config::TicketConfig;
use crate::error::{Error, Result};
use crate::schema::{Priority, Ticket, TicketStatus, format_ticket_number};
use crate::services::EventBus;
use crate::store::Store;

/// Ticket lifecycle on top of the store. Numbering goes through the store's
/// per-year sequence so two concurrent creations never share a number.
pub struct TicketService {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    config: TicketConfig,
}

pub struct NewTicket<'a> {
    pub customer_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub subject: &'a str,
    pub description: Option<&'a str>,
    pub category: &'a str,
    pub priority: Priority,
    pub created_by: &'a str,
}

impl TicketService {
    pub fn new(store: Arc<dyn Store>, bus: Arc<dyn EventBus>, config: TicketConfig) -> Self {
        Self { store, bus, config }
    }

    async fn load(&self, id: Uuid) -> Result<Ticket> {
        self.store
            .ticket(id)
            .await?
            .ok_or_else(|| Error::not_found("ticket", id))
    }

    pub async fn create(&self, req: NewTicket<'_>) -> Result<Ticket> {
        if !self.config.is_known_category(req.category) {
            return Err(Error::UnknownCategory(req.category.to_string()));
        }

        let now = Utc::now();
        let year = now.year();
        let sequence = self.store.next_ticket_sequence(year).await?;
        let number = format_ticket_number(&self.config.number_prefix, year, sequence);
        let sla = self.config.sla_for(req.priority);

        let ticket = Ticket::new(
            number,
            req.customer_id,
            req.conversation_id,
            req.subject,
            req.description,
            req.category,
            req.priority,
            sla,
            req.created_by,
            now,
        );
        self.store.save_ticket(&ticket).await?;

        tracing::info!(
            ticket = %ticket.number,
            category = %ticket.category,
            priority = ?ticket.priority,
            created_by = req.created_by,
            "ticket created"
        );
        self.bus
            .publish("ticket.created", serde_json::json!({ "ticket": ticket }));
        Ok(ticket)
    }

    pub async fn transition(
        &self,
        ticket_id: Uuid,
        to: TicketStatus,
        changed_by: &str,
        reason: &str,
    ) -> Result<Ticket> {
        let mut ticket = self.load(ticket_id).await?;
        let from = ticket.status;
        ticket.transition(to, changed_by, reason, Utc::now())?;
        self.store.save_ticket(&ticket).await?;

        tracing::info!(
            ticket = %ticket.number,
            from = from.as_str(),
            to = to.as_str(),
            changed_by,
            "ticket status changed"
        );
        self.bus.publish(
            "ticket.status_changed",
            serde_json::json!({
                "ticket": ticket,
                "previous_status": from.as_str(),
                "actor": changed_by,
            }),
        );
        Ok(ticket)
    }

    pub async fn add_note(
        &self,
        ticket_id: Uuid,
        author: &str,
        content: &str,
        internal: bool,
    ) -> Result<Ticket> {
        let mut ticket = self.load(ticket_id).await?;
        ticket.add_note(author, content, internal, Utc::now());
        self.store.save_ticket(&ticket).await?;
        self.bus.publish(
            "ticket.note_added",
            serde_json::json!({ "ticket": ticket, "author": author, "internal": internal }),
        );
        Ok(ticket)
    }

    pub async fn resolve(
        &self,
        ticket_id: Uuid,
        changed_by: &str,
        summary: &str,
    ) -> Result<Ticket> {
        let mut ticket = self.load(ticket_id).await?;
        let from = ticket.status;
        ticket.resolve(changed_by, summary, Utc::now())?;
        self.store.save_ticket(&ticket).await?;

        tracing::info!(ticket = %ticket.number, changed_by, "ticket resolved");
        self.bus.publish(
            "ticket.status_changed",
            serde_json::json!({
                "ticket": ticket,
                "previous_status": from.as_str(),
                "actor": changed_by,
            }),
        );
        Ok(ticket)
    }

    pub async fn lookup(&self, number: &str) -> Result<Option<Ticket>> {
        self.store.ticket_by_number(number).await
    }
}
