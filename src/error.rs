use uuid::Uuid;

/// Domain failures of the coordination pipeline. Everything recoverable is a
/// named variant so callers can branch without string matching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("duplicate event {0}")]
    DuplicateEvent(String),

    #[error("invalid {entity} transition {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("no agent available for assignment")]
    AgentUnavailable,

    #[error("agent {0} is inactive")]
    AgentInactive(Uuid),

    #[error("agent {0} is at capacity")]
    AgentAtCapacity(Uuid),

    #[error("agent {0} has auto-assign disabled")]
    AutoAssignDisabled(Uuid),

    #[error("timed out waiting for the customer gate on {0}")]
    ConcurrencyTimeout(String),

    #[error("external service failure: {0}")]
    ExternalService(String),

    #[error("unknown ticket category `{0}`")]
    UnknownCategory(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::ExternalService(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Transient failures are safe to retry on the next trigger.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyTimeout(_) | Self::ExternalService(_) | Self::AgentUnavailable
        )
    }
}
