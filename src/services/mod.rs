pub mod ai;
pub mod events;
pub mod messaging;

pub use ai::{AiAction, AiReply, AiResponder, ConversationKey, OpenRouterResponder};
pub use events::{BroadcastBus, BusEvent, EventBus};
pub use messaging::{HttpMessagingGateway, MessagingGateway};
