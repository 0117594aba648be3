use tokio::sync::broadcast;

/// One UI notification. Payloads carry the affected entity's full snapshot
/// plus enough delta (previous status, actor) for clients to render a diff.
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Fire-and-forget publish for real-time UI updates. Implementations never
/// block and never retry; a lost notification is acceptable, a stalled
/// pipeline is not.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: serde_json::Value);
}

/// Broadcast-channel bus. Subscribers that lag simply miss events.
pub struct BroadcastBus {
    tx: broadcast::Sender<BusEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, topic: &str, payload: serde_json::Value) {
        tracing::debug!(topic, "bus publish");
        // send only fails with zero subscribers, which is fine
        let _ = self.tx.send(BusEvent {
            topic: topic.to_string(),
            payload,
        });
    }
}
