use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::schema::MessageKind;

/// Outbound messaging port. No delivery guarantee is assumed; callers must
/// treat errors as user-visible failures, not swallow them. Failures surface
/// as `Error::ExternalService`.
#[async_trait::async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Returns the gateway-side delivery id.
    async fn send(&self, recipient: &str, kind: MessageKind, body: &str) -> Result<String>;
}

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// HTTP gateway in the WhatsApp Cloud API shape: `POST {base}/messages` with
/// a bearer token.
pub struct HttpMessagingGateway {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpMessagingGateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("WADESK_GATEWAY_URL not set"))?;
        let token = config
            .token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("WADESK_GATEWAY_TOKEN not set"))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }
}

#[async_trait::async_trait]
impl MessagingGateway for HttpMessagingGateway {
    async fn send(&self, recipient: &str, kind: MessageKind, body: &str) -> Result<String> {
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": kind.as_str(),
            kind.as_str(): { "body": body },
        });

        let response = self
            .client
            .post(format!("{}/messages", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ExternalService(format!(
                "messaging gateway returned {status}: {body}"
            )));
        }

        let json: serde_json::Value = response.json().await?;
        let delivery_id = json["messages"][0]["id"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(delivery_id)
    }
}
