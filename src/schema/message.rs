use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Customer,
    Agent,
    System,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Location,
    Other,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Location => "location",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "video" => Self::Video,
            "document" => Self::Document,
            "location" => Self::Location,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Delivery receipts only ever move forward; failure is terminal from any
    /// non-read state.
    pub fn can_advance_to(self, to: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, to),
            (Pending, Sent)
                | (Pending, Failed)
                | (Sent, Delivered)
                | (Sent, Failed)
                | (Delivered, Read)
                | (Delivered, Failed)
        )
    }
}

/// A persisted message. Immutable after write except for delivery status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub customer_id: Uuid,
    /// Gateway-side identifier, the deduplication key for inbound events.
    pub external_id: Option<String>,
    pub direction: Direction,
    pub sender: Sender,
    pub kind: MessageKind,
    pub content: Option<String>,
    /// Type-specific payload (media reference, coordinates) kept verbatim.
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn inbound(
        conversation_id: Uuid,
        customer_id: Uuid,
        external_id: &str,
        kind: MessageKind,
        content: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            customer_id,
            external_id: Some(external_id.to_string()),
            direction: Direction::Inbound,
            sender: Sender::Customer,
            kind,
            content,
            payload,
            status: DeliveryStatus::Delivered,
            created_at: now,
        }
    }

    pub fn outbound(
        conversation_id: Uuid,
        customer_id: Uuid,
        sender: Sender,
        content: &str,
        status: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            customer_id,
            external_id: None,
            direction: Direction::Outbound,
            sender,
            kind: MessageKind::Text,
            content: Some(content.to_string()),
            payload: serde_json::Value::Null,
            status,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_status_never_moves_backwards() {
        assert!(DeliveryStatus::Sent.can_advance_to(DeliveryStatus::Delivered));
        assert!(DeliveryStatus::Delivered.can_advance_to(DeliveryStatus::Read));
        assert!(!DeliveryStatus::Read.can_advance_to(DeliveryStatus::Sent));
        assert!(!DeliveryStatus::Delivered.can_advance_to(DeliveryStatus::Sent));
    }

    #[test]
    fn failure_is_reachable_until_read() {
        assert!(DeliveryStatus::Pending.can_advance_to(DeliveryStatus::Failed));
        assert!(DeliveryStatus::Sent.can_advance_to(DeliveryStatus::Failed));
        assert!(!DeliveryStatus::Read.can_advance_to(DeliveryStatus::Failed));
    }

    #[test]
    fn unknown_kinds_fall_back_to_other() {
        assert_eq!(MessageKind::parse("sticker"), MessageKind::Other);
        assert_eq!(MessageKind::parse("location"), MessageKind::Location);
    }
}
