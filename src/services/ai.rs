use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::schema::Priority;

/// Identity of the conversation a turn belongs to, passed through so the
/// responder can keep per-thread context on its side.
#[derive(Debug, Clone)]
pub struct ConversationKey {
    pub conversation_id: Uuid,
    pub customer_phone: String,
}

/// Structured side effects the responder may request alongside (or instead
/// of) a plain reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AiAction {
    CreateTicket {
        subject: String,
        category: String,
        priority: Priority,
        description: Option<String>,
    },
    LookupTicket {
        number: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiReply {
    pub text: Option<String>,
    #[serde(default)]
    pub actions: Vec<AiAction>,
}

/// The AI responder port. Latency is unbounded (seconds); the caller holds
/// the customer gate for the duration. Failures surface as
/// `Error::ExternalService`.
#[async_trait::async_trait]
pub trait AiResponder: Send + Sync {
    async fn respond(&self, text: &str, key: &ConversationKey) -> Result<AiReply>;
}

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// OpenRouter-backed responder. The model is instructed to answer with a
/// JSON document matching `AiReply`; a non-JSON answer is treated as a plain
/// text reply rather than an error.
pub struct OpenRouterResponder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

impl OpenRouterResponder {
    pub fn new(config: &AiConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: config.api_url.clone(),
        })
    }
}

#[async_trait::async_trait]
impl AiResponder for OpenRouterResponder {
    async fn respond(&self, text: &str, key: &ConversationKey) -> Result<AiReply> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt() },
                { "role": "user", "content": text },
            ],
            "temperature": 0.3,
            "max_tokens": 512,
            "metadata": { "conversation_id": key.conversation_id },
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExternalService(format!(
                "AI responder returned {status}: {body}"
            )));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();

        Ok(parse_reply(&content))
    }
}

/// A model that follows instructions returns JSON; one that does not still
/// produced something worth sending to the customer.
fn parse_reply(content: &str) -> AiReply {
    match serde_json::from_str::<AiReply>(content) {
        Ok(reply) => reply,
        Err(_) => AiReply {
            text: (!content.is_empty()).then(|| content.to_string()),
            actions: Vec::new(),
        },
    }
}

fn system_prompt() -> String {
    r#"You are a support assistant answering WhatsApp messages for a customer service desk.

Respond with a single JSON object, no markdown fences:
{"text": "<message to the customer, or null>", "actions": [...]}

Available actions:
- {"action": "create_ticket", "subject": "...", "category": "billing|technical|general|complaint", "priority": "low|medium|high|urgent", "description": "..."} when the customer reports a problem that needs follow-up.
- {"action": "lookup_ticket", "number": "TKT-..."} when the customer asks about an existing ticket.

Keep replies short and conversational, match the customer's language, and never mention that you are an AI system. This is WhatsApp: plain text only, no markdown."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_reply_is_parsed_with_actions() {
        let raw = r#"{"text": "I opened a ticket for you", "actions": [{"action": "create_ticket", "subject": "broken light", "category": "technical", "priority": "high", "description": "light is broken"}]}"#;
        let reply = parse_reply(raw);
        assert_eq!(reply.text.as_deref(), Some("I opened a ticket for you"));
        assert_eq!(reply.actions.len(), 1);
        match &reply.actions[0] {
            AiAction::CreateTicket { category, priority, .. } => {
                assert_eq!(category, "technical");
                assert_eq!(*priority, Priority::High);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn plain_text_falls_back_to_a_bare_reply() {
        let reply = parse_reply("hi there, how can I help?");
        assert_eq!(reply.text.as_deref(), Some("hi there, how can I help?"));
        assert!(reply.actions.is_empty());
    }

    #[test]
    fn empty_content_yields_no_reply() {
        let reply = parse_reply("");
        assert!(reply.text.is_none());
        assert!(reply.actions.is_empty());
    }
}
