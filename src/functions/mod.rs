pub mod api;
pub mod assignment;
pub mod escalation;
pub mod pipeline;
pub mod tickets;
pub mod webhook;

use std::sync::Arc;

use crate::functions::assignment::AssignmentEngine;
use crate::functions::pipeline::Pipeline;
use crate::functions::tickets::TicketService;
use crate::services::EventBus;
use crate::store::Store;

/// Shared handler state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn EventBus>,
    pub pipeline: Arc<Pipeline>,
    pub assignment: Arc<AssignmentEngine>,
    pub tickets: Arc<TicketService>,
    pub verify_token: String,
}
