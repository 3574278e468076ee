use thiserror::Error;

/// Errors surfaced by session orchestration.
///
/// None of these are retried internally; each aborts the orchestration call
/// that produced it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FanoutError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Media server '{node}' unavailable: {reason}")]
    ServerUnavailable { node: String, reason: String },

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Session '{0}' already exists")]
    SessionAlreadyExists(String),

    #[error("SDP negotiation failed on '{node}': {reason}")]
    SdpNegotiation { node: String, reason: String },

    #[error("Session '{0}' has no slave pipelines")]
    NoSlaveNodes(String),
}

pub type FanoutResult<T> = Result<T, FanoutError>;

impl FanoutError {
    pub fn unavailable(node: impl Into<String>, reason: impl ToString) -> Self {
        Self::ServerUnavailable {
            node: node.into(),
            reason: reason.to_string(),
        }
    }

    pub fn negotiation(node: impl Into<String>, reason: impl ToString) -> Self {
        Self::SdpNegotiation {
            node: node.into(),
            reason: reason.to_string(),
        }
    }
}
