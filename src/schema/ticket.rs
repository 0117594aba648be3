use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    Open,
    InProgress,
    PendingCustomer,
    WaitingInternal,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::PendingCustomer => "pending_customer",
            Self::WaitingInternal => "waiting_internal",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition(self, to: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, to),
            (New, Open)
                | (New, InProgress)
                | (New, Closed)
                | (Open, InProgress)
                | (Open, PendingCustomer)
                | (Open, WaitingInternal)
                | (Open, Resolved)
                | (Open, Closed)
                | (InProgress, PendingCustomer)
                | (InProgress, WaitingInternal)
                | (InProgress, Resolved)
                | (InProgress, Open)
                | (PendingCustomer, InProgress)
                | (PendingCustomer, Resolved)
                | (PendingCustomer, Closed)
                | (WaitingInternal, InProgress)
                | (WaitingInternal, Resolved)
                | (Resolved, Closed)
                | (Resolved, Open)
                | (Closed, Open)
        )
    }
}

/// One entry of the append-only status trail. Entries are never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: TicketStatus,
    pub to: TicketStatus,
    pub changed_by: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketNote {
    pub author: String,
    pub content: String,
    /// Internal notes never reach the customer-facing views.
    pub internal: bool,
    pub at: DateTime<Utc>,
}

/// Time budgets fixed onto the ticket at creation from the priority then in
/// effect. Later priority changes do not rewrite them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaTargets {
    pub first_response_minutes: i64,
    pub resolution_minutes: i64,
}

impl SlaTargets {
    pub fn minutes(first_response: i64, resolution: i64) -> Self {
        Self {
            first_response_minutes: first_response,
            resolution_minutes: resolution,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    /// Human-readable sequential identifier, e.g. `TKT-2026-00042`.
    pub number: String,
    pub customer_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub assigned_agent_id: Option<Uuid>,
    pub subject: String,
    pub description: Option<String>,
    pub category: String,
    pub priority: Priority,
    pub status: TicketStatus,
    pub status_history: Vec<StatusChange>,
    pub notes: Vec<TicketNote>,
    pub resolution_summary: Option<String>,
    pub sla: SlaTargets,
    pub first_response_at: Option<DateTime<Utc>>,
    pub first_response_sla_met: Option<bool>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_sla_met: Option<bool>,
    pub closed_at: Option<DateTime<Utc>>,
    pub escalated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number: String,
        customer_id: Uuid,
        conversation_id: Option<Uuid>,
        subject: &str,
        description: Option<&str>,
        category: &str,
        priority: Priority,
        sla: SlaTargets,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut ticket = Self {
            id: Uuid::new_v4(),
            number,
            customer_id,
            conversation_id,
            assigned_agent_id: None,
            subject: subject.to_string(),
            description: description.map(str::to_string),
            category: category.to_lowercase(),
            priority,
            status: TicketStatus::New,
            status_history: Vec::new(),
            notes: Vec::new(),
            resolution_summary: None,
            sla,
            first_response_at: None,
            first_response_sla_met: None,
            resolved_at: None,
            resolved_by: None,
            resolution_sla_met: None,
            closed_at: None,
            escalated: false,
            created_at: now,
            updated_at: now,
        };
        // the trail starts with the creation event so the first real
        // transition is never the first entry readers see
        ticket.status_history.push(StatusChange {
            from: TicketStatus::New,
            to: TicketStatus::New,
            changed_by: created_by.to_string(),
            reason: "created".to_string(),
            at: now,
        });
        ticket
    }

    /// Apply one status transition. Appending to the history is unconditional;
    /// there is no path through here that skips it.
    pub fn transition(
        &mut self,
        to: TicketStatus,
        changed_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(Error::InvalidTransition {
                entity: "ticket",
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }

        self.status_history.push(StatusChange {
            from: self.status,
            to,
            changed_by: changed_by.to_string(),
            reason: reason.to_string(),
            at: now,
        });
        self.status = to;
        self.updated_at = now;

        match to {
            TicketStatus::InProgress if self.first_response_at.is_none() => {
                self.first_response_at = Some(now);
                let deadline =
                    self.created_at + Duration::minutes(self.sla.first_response_minutes);
                self.first_response_sla_met = Some(now <= deadline);
            }
            TicketStatus::Resolved => {
                self.resolved_at = Some(now);
                self.resolved_by = Some(changed_by.to_string());
                let deadline = self.created_at + Duration::minutes(self.sla.resolution_minutes);
                self.resolution_sla_met = Some(now <= deadline);
            }
            TicketStatus::Closed => {
                self.closed_at = Some(now);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn add_note(&mut self, author: &str, content: &str, internal: bool, now: DateTime<Utc>) {
        self.notes.push(TicketNote {
            author: author.to_string(),
            content: content.to_string(),
            internal,
            at: now,
        });
        self.updated_at = now;
    }

    pub fn resolve(
        &mut self,
        changed_by: &str,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(TicketStatus::Resolved, changed_by, "resolved", now)?;
        self.resolution_summary = Some(summary.to_string());
        Ok(())
    }
}

/// Builds `{prefix}-{year}-{zero-padded sequence}` identifiers. The sequence
/// itself comes from an atomic store increment keyed by calendar year, so the
/// counter resets to 1 on year rollover and concurrent creation never yields
/// duplicates.
pub fn format_ticket_number(prefix: &str, year: i32, sequence: i64) -> String {
    format!("{prefix}-{year}-{sequence:05}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(priority: Priority, sla: SlaTargets) -> Ticket {
        Ticket::new(
            format_ticket_number("TKT", 2026, 1),
            Uuid::new_v4(),
            None,
            "light is broken",
            Some("customer reports a broken light"),
            "technical",
            priority,
            sla,
            "ai",
            Utc::now(),
        )
    }

    #[test]
    fn every_transition_appends_exactly_one_history_entry() {
        let mut t = ticket(Priority::Medium, SlaTargets::minutes(60, 1440));
        let before = t.status_history.len();

        t.transition(TicketStatus::Open, "agent-1", "triaged", Utc::now())
            .unwrap();
        t.transition(TicketStatus::InProgress, "agent-1", "working", Utc::now())
            .unwrap();
        t.transition(TicketStatus::Resolved, "agent-1", "fixed", Utc::now())
            .unwrap();

        assert_eq!(t.status_history.len(), before + 3);
        let last = t.status_history.last().unwrap();
        assert_eq!(last.from, TicketStatus::InProgress);
        assert_eq!(last.to, TicketStatus::Resolved);
        assert_eq!(last.changed_by, "agent-1");
    }

    #[test]
    fn rejected_transition_appends_nothing() {
        let mut t = ticket(Priority::Medium, SlaTargets::minutes(60, 1440));
        let before = t.status_history.len();
        let err = t
            .transition(TicketStatus::WaitingInternal, "agent-1", "park", Utc::now())
            .unwrap_err();
        match err {
            Error::InvalidTransition { from, to, .. } => {
                assert_eq!(from, "new");
                assert_eq!(to, "waiting_internal");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(t.status_history.len(), before);
        assert_eq!(t.status, TicketStatus::New);
    }

    #[test]
    fn first_in_progress_stamps_first_response_once() {
        let mut t = ticket(Priority::Urgent, SlaTargets::minutes(15, 240));
        t.transition(TicketStatus::InProgress, "agent-1", "picked up", Utc::now())
            .unwrap();
        let first = t.first_response_at.unwrap();
        assert_eq!(t.first_response_sla_met, Some(true));

        t.transition(TicketStatus::PendingCustomer, "agent-1", "asked", Utc::now())
            .unwrap();
        t.transition(TicketStatus::InProgress, "agent-1", "replied", Utc::now())
            .unwrap();
        assert_eq!(t.first_response_at, Some(first));
    }

    #[test]
    fn missed_first_response_sla_is_recorded() {
        let mut t = ticket(Priority::Urgent, SlaTargets::minutes(15, 240));
        let late = t.created_at + Duration::minutes(16);
        t.transition(TicketStatus::InProgress, "agent-1", "late pickup", late)
            .unwrap();
        assert_eq!(t.first_response_sla_met, Some(false));
    }

    #[test]
    fn resolve_stamps_resolver_and_resolution_sla() {
        let mut t = ticket(Priority::Medium, SlaTargets::minutes(60, 1440));
        t.transition(TicketStatus::InProgress, "agent-2", "working", Utc::now())
            .unwrap();
        t.resolve("agent-2", "replaced the bulb", Utc::now()).unwrap();
        assert_eq!(t.resolved_by.as_deref(), Some("agent-2"));
        assert_eq!(t.resolution_sla_met, Some(true));
        assert_eq!(t.resolution_summary.as_deref(), Some("replaced the bulb"));
    }

    #[test]
    fn close_stamps_closed_at() {
        let mut t = ticket(Priority::Low, SlaTargets::minutes(120, 2880));
        t.transition(TicketStatus::InProgress, "agent-1", "working", Utc::now())
            .unwrap();
        t.transition(TicketStatus::Resolved, "agent-1", "fixed", Utc::now())
            .unwrap();
        t.transition(TicketStatus::Closed, "agent-1", "confirmed", Utc::now())
            .unwrap();
        assert!(t.closed_at.is_some());
    }

    #[test]
    fn ticket_number_format_is_zero_padded() {
        assert_eq!(format_ticket_number("TKT", 2026, 42), "TKT-2026-00042");
        assert_eq!(format_ticket_number("SUP", 2027, 1), "SUP-2027-00001");
    }
}
