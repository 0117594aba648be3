use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::functions::AppState;

/// One inbound gateway event, already flattened to the fields the pipeline
/// cares about. `payload` keeps whatever type-specific body the gateway sent
/// (media reference, coordinates) verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    /// Gateway-side message id, the deduplication key.
    pub id: String,
    /// Customer phone number.
    pub from: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub text: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn default_kind() -> String {
    "text".to_string()
}

/// Gateway delivery receipt for a message we sent earlier.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReceipt {
    /// The delivery id the gateway returned from `send`.
    pub id: String,
    pub status: String,
}

/// A POST body is either a receipt or a message event; receipts are the only
/// shape carrying a `status` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Status(StatusReceipt),
    Message(WebhookEvent),
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Subscription handshake: echo the challenge back when the token matches.
pub async fn verify(State(state): State<AppState>, Query(params): Query<VerifyParams>) -> Response {
    let token_ok = params.verify_token.as_deref() == Some(state.verify_token.as_str());
    if params.mode.as_deref() == Some("subscribe") && token_ok {
        (StatusCode::OK, params.challenge.unwrap_or_default()).into_response()
    } else {
        tracing::warn!("webhook verification rejected");
        StatusCode::FORBIDDEN.into_response()
    }
}

/// Delivery endpoint. The gateway retries anything it does not get a 200 for,
/// so the ack is unconditional: a malformed body is logged and dropped, never
/// bounced back into the retry loop.
pub async fn receive(State(state): State<AppState>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<WebhookPayload>(&body) {
        Ok(WebhookPayload::Message(event)) => {
            if let Err(e) = state.pipeline.ingest(event, tokio::time::Instant::now()) {
                // typically a gateway retry of an id we already saw
                tracing::debug!(error = %e, "webhook event ignored");
            }
        }
        Ok(WebhookPayload::Status(receipt)) => {
            if let Err(e) = state.pipeline.apply_receipt(&receipt).await {
                tracing::warn!(error = %e, "delivery receipt failed");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook payload dropped");
        }
    }
    (StatusCode::OK, "EVENT_RECEIVED")
}
