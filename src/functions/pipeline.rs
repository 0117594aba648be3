use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::coordination::{Coordinator, DedupCache, EnqueueOutcome, join_batch};
use crate::error::{Error, Result};
use crate::functions::assignment::AssignmentEngine;
use crate::functions::escalation::{EscalationEngine, WAIT_REASON};
use crate::functions::tickets::{NewTicket, TicketService};
use crate::functions::webhook::WebhookEvent;
use crate::schema::{
    Conversation, ConversationStatus, Customer, DeliveryStatus, MessageKind, Sender, StoredMessage,
};
use crate::services::{AiAction, AiReply, AiResponder, ConversationKey, EventBus, MessagingGateway};
use crate::store::Store;

const AI_FAILURE_APOLOGY: &str = "Sorry, I'm having trouble responding right now. \
A member of our team will get back to you shortly.";

const ALL_AGENTS_BUSY: &str = "All of our agents are currently busy. \
You're in the queue and someone will be with you as soon as possible.";

const WAIT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// One buffered inbound message, stripped down to what the flush needs. The
/// customer phone is the batch key and lives one level up in the aggregator.
#[derive(Debug, Clone)]
pub struct InboundItem {
    pub external_id: String,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub payload: serde_json::Value,
}

impl From<WebhookEvent> for InboundItem {
    fn from(event: WebhookEvent) -> Self {
        Self {
            external_id: event.id,
            kind: MessageKind::parse(&event.kind),
            content: event.text,
            payload: event.payload,
        }
    }
}

/// The inbound coordination pipeline: dedup at the door, burst buffering per
/// customer, then one gated flush that persists the batch and drives the AI
/// or assignment response.
pub struct Pipeline {
    store: Arc<dyn Store>,
    coordinator: Arc<Coordinator>,
    dedup: Arc<dyn DedupCache>,
    ai: Arc<dyn AiResponder>,
    gateway: Arc<dyn MessagingGateway>,
    bus: Arc<dyn EventBus>,
    assignment: Arc<AssignmentEngine>,
    tickets: Arc<TicketService>,
    escalation: EscalationEngine,
    poll_interval: Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        coordinator: Arc<Coordinator>,
        dedup: Arc<dyn DedupCache>,
        ai: Arc<dyn AiResponder>,
        gateway: Arc<dyn MessagingGateway>,
        bus: Arc<dyn EventBus>,
        assignment: Arc<AssignmentEngine>,
        tickets: Arc<TicketService>,
        escalation: EscalationEngine,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            coordinator,
            dedup,
            ai,
            gateway,
            bus,
            assignment,
            tickets,
            escalation,
            poll_interval,
        }
    }

    /// Webhook-side entry. Synchronous and cheap: the heavy work happens at
    /// flush time, after the burst window closes.
    ///
    /// A dedup backend error fails open. Processing a retried message twice
    /// is recoverable; dropping a real one is not.
    pub fn ingest(&self, event: WebhookEvent, now: Instant) -> Result<()> {
        let fresh = match self.dedup.mark_seen(&event.id, now) {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(
                    external_id = %event.id,
                    error = %e,
                    "dedup check failed, processing anyway"
                );
                true
            }
        };
        if !fresh {
            return Err(Error::DuplicateEvent(event.id));
        }

        let phone = event.from.clone();
        match self.coordinator.burst.enqueue(&phone, event.into(), now) {
            EnqueueOutcome::Buffered => Ok(()),
            EnqueueOutcome::RejectedBusy => {
                // batch mid-flush; dropped by policy rather than queued
                // behind an unbounded AI call
                tracing::warn!(customer = %phone, "message arrived mid-flush, dropped");
                Ok(())
            }
        }
    }

    /// Flushes every batch whose burst window has closed. Batches for
    /// different customers run concurrently; `finish` runs on every exit
    /// path so a failed flush never wedges its key.
    pub async fn tick(self: &Arc<Self>, now: Instant) -> usize {
        let ready = self.coordinator.burst.take_ready(now);
        if ready.is_empty() {
            return 0;
        }

        let mut set = tokio::task::JoinSet::new();
        for (phone, items) in ready {
            let pipeline = self.clone();
            set.spawn(async move {
                let result = pipeline.process_batch(&phone, &items).await;
                pipeline.coordinator.burst.finish(&phone);
                match &result {
                    Err(e) if e.is_transient() => {
                        // a held gate or an unavailable agent must not lose
                        // the batch; put it back for the next window
                        tracing::warn!(customer = %phone, error = %e, "batch deferred, re-queued");
                        let requeued_at = Instant::now();
                        for item in items {
                            let _ = pipeline.coordinator.burst.enqueue(&phone, item, requeued_at);
                        }
                    }
                    Err(e) => {
                        tracing::error!(customer = %phone, error = %e, "batch processing failed");
                    }
                    Ok(()) => {}
                }
                result.is_ok()
            });
        }

        let mut processed = 0;
        while let Some(joined) = set.join_next().await {
            if matches!(joined, Ok(true)) {
                processed += 1;
            }
        }
        processed
    }

    async fn load_or_create_customer(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Customer> {
        if let Some(customer) = self.store.customer_by_phone(phone).await? {
            return Ok(customer);
        }
        let customer = Customer::new(phone, now);
        self.store.save_customer(&customer).await?;
        tracing::info!(customer = phone, "new customer");
        Ok(customer)
    }

    async fn load_or_create_conversation(
        &self,
        customer: &mut Customer,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        if let Some(conversation) = self.store.active_conversation(customer.id).await? {
            return Ok(conversation);
        }
        let mut conversation = Conversation::new(customer.id, &customer.phone, now);
        customer.record_conversation(now);
        if self.escalation.on_creation(&mut conversation, customer, now) {
            tracing::info!(conversation_id = %conversation.id, "vip priority floor applied");
        }
        self.store.save_conversation(&conversation).await?;
        self.bus.publish(
            "conversation.created",
            serde_json::json!({ "conversation": conversation }),
        );
        Ok(conversation)
    }

    async fn process_batch(&self, phone: &str, items: &[InboundItem]) -> Result<()> {
        let _permit = self.coordinator.gate.acquire(phone).await?;
        let now = Utc::now();

        let mut customer = self.load_or_create_customer(phone, now).await?;
        let mut conversation = self.load_or_create_conversation(&mut customer, now).await?;

        if conversation.status == ConversationStatus::Waiting {
            conversation.resume(now)?;
        }

        // the batch is persisted before any policy decision; a blocked
        // customer's messages still land in the record
        for item in items {
            let preview = item
                .content
                .clone()
                .unwrap_or_else(|| format!("[{}]", item.kind.as_str()));
            let message = StoredMessage::inbound(
                conversation.id,
                customer.id,
                &item.external_id,
                item.kind,
                item.content.clone(),
                item.payload.clone(),
                now,
            );
            conversation.record_inbound(&preview, now);
            self.store.insert_message(&message).await?;
            self.bus
                .publish("message.received", serde_json::json!({ "message": message }));
        }
        customer.record_messages(items.len() as i64, now);
        self.store.save_customer(&customer).await?;

        if customer.is_blocked {
            self.store.save_conversation(&conversation).await?;
            tracing::info!(customer = phone, "blocked customer, batch stored and ignored");
            return Ok(());
        }

        let texts: Vec<String> = items.iter().filter_map(|i| i.content.clone()).collect();
        let combined = join_batch(&texts);

        if !combined.is_empty() && self.escalation.on_message(&mut conversation, &combined, now) {
            self.bus.publish(
                "conversation.escalated",
                serde_json::json!({
                    "conversation": conversation,
                    "reason": "urgent keyword",
                }),
            );
        }
        self.store.save_conversation(&conversation).await?;

        if !conversation.is_ai_enabled {
            // an agent owns the thread; the bus already carried the messages
            // to their console
            return Ok(());
        }

        if !combined.is_empty() && self.escalation.wants_handoff(&combined) {
            return self.handle_handoff(&conversation).await;
        }

        if combined.is_empty() {
            tracing::debug!(customer = phone, "batch without text, no AI turn");
            return Ok(());
        }

        let key = ConversationKey {
            conversation_id: conversation.id,
            customer_phone: phone.to_string(),
        };
        match self.ai.respond(&combined, &key).await {
            Ok(reply) => self.deliver_reply(&mut conversation, reply).await,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation.id, error = %e, "AI responder failed");
                self.send_reply(&mut conversation, Sender::System, AI_FAILURE_APOLOGY)
                    .await
            }
        }
    }

    async fn handle_handoff(&self, conversation: &Conversation) -> Result<()> {
        match self.assignment.auto_assign(conversation.id, "system").await {
            Ok(agent) => {
                tracing::info!(
                    conversation_id = %conversation.id,
                    agent_id = %agent.id,
                    "handoff request assigned"
                );
                Ok(())
            }
            Err(Error::AgentUnavailable) => {
                let mut conversation = conversation.clone();
                self.send_reply(&mut conversation, Sender::System, ALL_AGENTS_BUSY)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Applies the structured actions, then sends the reply text with any
    /// action results appended.
    async fn deliver_reply(
        &self,
        conversation: &mut Conversation,
        reply: AiReply,
    ) -> Result<()> {
        let mut parts: Vec<String> = Vec::new();
        if let Some(text) = reply.text {
            if !text.is_empty() {
                parts.push(text);
            }
        }
        for action in reply.actions {
            if let Some(line) = self.apply_action(conversation, action).await? {
                parts.push(line);
            }
        }
        if parts.is_empty() {
            return Ok(());
        }
        self.send_reply(conversation, Sender::Ai, &parts.join("\n\n"))
            .await
    }

    async fn apply_action(
        &self,
        conversation: &Conversation,
        action: AiAction,
    ) -> Result<Option<String>> {
        match action {
            AiAction::CreateTicket {
                subject,
                category,
                priority,
                description,
            } => {
                let request = NewTicket {
                    customer_id: conversation.customer_id,
                    conversation_id: Some(conversation.id),
                    subject: &subject,
                    description: description.as_deref(),
                    category: &category,
                    priority,
                    created_by: "ai",
                };
                let ticket = match self.tickets.create(request).await {
                    Ok(ticket) => ticket,
                    Err(Error::UnknownCategory(bad)) => {
                        // the model picked a category outside the configured
                        // set; file under general rather than lose the report
                        tracing::warn!(category = %bad, "unknown ticket category from AI, using general");
                        self.tickets
                            .create(NewTicket {
                                customer_id: conversation.customer_id,
                                conversation_id: Some(conversation.id),
                                subject: &subject,
                                description: description.as_deref(),
                                category: "general",
                                priority,
                                created_by: "ai",
                            })
                            .await?
                    }
                    Err(e) => return Err(e),
                };
                Ok(Some(format!(
                    "I've created ticket {} for you. We'll keep you posted here.",
                    ticket.number
                )))
            }
            AiAction::LookupTicket { number } => {
                match self.tickets.lookup(&number).await? {
                    Some(ticket) => Ok(Some(format!(
                        "Ticket {}: status {}, priority {}.",
                        ticket.number,
                        ticket.status.as_str(),
                        ticket.priority.as_str()
                    ))),
                    None => Ok(Some(format!("I couldn't find a ticket {number}."))),
                }
            }
        }
    }

    /// Sends one outbound message and persists it either way: `Sent` with the
    /// gateway's delivery id on success, `Failed` when the send errors.
    async fn send_reply(
        &self,
        conversation: &mut Conversation,
        sender: Sender,
        body: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut message = StoredMessage::outbound(
            conversation.id,
            conversation.customer_id,
            sender,
            body,
            DeliveryStatus::Pending,
            now,
        );
        match self
            .gateway
            .send(&conversation.customer_phone, MessageKind::Text, body)
            .await
        {
            Ok(delivery_id) => {
                message.status = DeliveryStatus::Sent;
                message.external_id = Some(delivery_id);
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation.id,
                    error = %e,
                    "outbound send failed"
                );
                message.status = DeliveryStatus::Failed;
            }
        }
        conversation.record_outbound(body, now);
        self.store.insert_message(&message).await?;
        self.store.save_conversation(conversation).await?;
        self.bus
            .publish("message.sent", serde_json::json!({ "message": message }));
        Ok(())
    }

    /// Applies a gateway delivery receipt to the outbound message it refers
    /// to. Receipts arrive out of order sometimes; anything that would move
    /// the status backwards is ignored.
    pub async fn apply_receipt(&self, receipt: &crate::functions::webhook::StatusReceipt) -> Result<()> {
        let Some(status) = DeliveryStatus::parse(&receipt.status) else {
            tracing::warn!(status = %receipt.status, "unknown delivery status in receipt");
            return Ok(());
        };
        let Some(message) = self.store.message_by_external_id(&receipt.id).await? else {
            tracing::debug!(external_id = %receipt.id, "receipt for unknown message");
            return Ok(());
        };
        if !message.status.can_advance_to(status) {
            tracing::debug!(
                external_id = %receipt.id,
                from = message.status.as_str(),
                to = status.as_str(),
                "stale delivery receipt ignored"
            );
            return Ok(());
        }
        self.store.update_message_status(message.id, status).await?;
        self.bus.publish(
            "message.status",
            serde_json::json!({
                "message_id": message.id,
                "external_id": receipt.id,
                "previous_status": message.status.as_str(),
                "status": status.as_str(),
            }),
        );
        Ok(())
    }

    /// Bumps assigned conversations that have waited past the threshold.
    pub async fn escalate_waiting(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut bumped = 0;
        for mut conversation in self.store.assigned_conversations().await? {
            if self.escalation.on_wait(&mut conversation, now) {
                self.store.save_conversation(&conversation).await?;
                tracing::info!(
                    conversation_id = %conversation.id,
                    priority = conversation.priority.as_str(),
                    "wait threshold escalation"
                );
                self.bus.publish(
                    "conversation.escalated",
                    serde_json::json!({
                        "conversation": conversation,
                        "reason": WAIT_REASON,
                    }),
                );
                bumped += 1;
            }
        }
        Ok(bumped)
    }

    /// Main loop: flush ready batches on the poll cadence, check wait
    /// escalations on a slower one. Runs until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.poll_interval);
        let mut wait_check = tokio::time::interval(WAIT_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = poll.tick() => {
                    self.tick(Instant::now()).await;
                }
                _ = wait_check.tick() => {
                    if let Err(e) = self.escalate_waiting(Utc::now()).await {
                        tracing::warn!(error = %e, "wait escalation sweep failed");
                    }
                }
            }
        }
        tracing::info!("pipeline stopped");
    }
}
