use std::time::Duration;

use crate::schema::{Priority, SlaTargets};

/// Typed view over the `WADESK_*` environment. Every knob has a default so a
/// bare environment still boots against the in-memory store.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: Option<String>,

    /// Echoed back on webhook GET verification.
    pub webhook_verify_token: String,

    pub dedup_ttl: Duration,
    pub burst_window: Duration,
    pub gate_timeout: Duration,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,

    pub escalation: EscalationConfig,
    pub tickets: TicketConfig,

    pub ai: AiConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    pub urgent_keywords: Vec<String>,
    pub handoff_keywords: Vec<String>,
    pub wait_threshold: Duration,
    pub reassignment_urgent_threshold: i32,
    pub vip_minimum: Priority,
}

#[derive(Debug, Clone)]
pub struct TicketConfig {
    pub number_prefix: String,
    pub categories: Vec<String>,
    /// SLA budgets per priority, fixed onto the ticket at creation time.
    pub sla: Vec<(Priority, SlaTargets)>,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
            .collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_parse("WADESK_BIND_ADDR", "0.0.0.0:8080".to_string()),
            database_url: env_opt("DATABASE_URL"),
            webhook_verify_token: env_parse("WADESK_VERIFY_TOKEN", "wadesk".to_string()),
            dedup_ttl: Duration::from_secs(env_parse("WADESK_DEDUP_TTL_SECS", 300)),
            burst_window: Duration::from_millis(env_parse("WADESK_BURST_WINDOW_MS", 2000)),
            gate_timeout: Duration::from_secs(env_parse("WADESK_GATE_TIMEOUT_SECS", 60)),
            poll_interval: Duration::from_millis(env_parse("WADESK_LOOP_POLL_MS", 500)),
            sweep_interval: Duration::from_secs(env_parse("WADESK_SWEEP_INTERVAL_SECS", 60)),
            escalation: EscalationConfig::from_env(),
            tickets: TicketConfig::from_env(),
            ai: AiConfig {
                api_key: env_opt("OPENROUTER_API_KEY"),
                model: env_parse(
                    "OPENROUTER_MODEL",
                    "moonshotai/kimi-k2.5".to_string(),
                ),
                api_url: env_parse(
                    "OPENROUTER_URL",
                    "https://openrouter.ai/api/v1/chat/completions".to_string(),
                ),
            },
            gateway: GatewayConfig {
                base_url: env_opt("WADESK_GATEWAY_URL"),
                token: env_opt("WADESK_GATEWAY_TOKEN"),
            },
        }
    }
}

impl EscalationConfig {
    fn from_env() -> Self {
        Self {
            urgent_keywords: env_list(
                "WADESK_URGENT_KEYWORDS",
                &["urgent", "emergency", "asap", "immediately", "lawsuit"],
            ),
            handoff_keywords: env_list(
                "WADESK_HANDOFF_KEYWORDS",
                &["agent", "human", "representative", "person"],
            ),
            wait_threshold: Duration::from_secs(env_parse("WADESK_WAIT_ESCALATION_SECS", 900)),
            reassignment_urgent_threshold: env_parse("WADESK_REASSIGNMENT_THRESHOLD", 2),
            vip_minimum: Priority::High,
        }
    }
}

impl TicketConfig {
    fn from_env() -> Self {
        Self {
            number_prefix: env_parse("WADESK_TICKET_PREFIX", "TKT".to_string()),
            categories: env_list(
                "WADESK_TICKET_CATEGORIES",
                &["billing", "technical", "general", "complaint"],
            ),
            sla: vec![
                (Priority::Urgent, SlaTargets::minutes(15, 240)),
                (Priority::High, SlaTargets::minutes(30, 480)),
                (Priority::Medium, SlaTargets::minutes(60, 1440)),
                (Priority::Low, SlaTargets::minutes(120, 2880)),
            ],
        }
    }

    pub fn sla_for(&self, priority: Priority) -> SlaTargets {
        self.sla
            .iter()
            .find(|(p, _)| *p == priority)
            .map(|(_, t)| t.clone())
            .unwrap_or_else(|| SlaTargets::minutes(60, 1440))
    }

    pub fn is_known_category(&self, category: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.eq_ignore_ascii_case(category))
    }
}
