use thiserror::Error;
use uuid::Uuid;

pub type CampaignResult<T> = Result<T, CampaignError>;

#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Segment provider '{provider}' error: {message}")]
    Provider { provider: String, message: String },

    #[error("Unknown segment provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid variant configuration: {0}")]
    InvalidVariants(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Segment cache error: {0}")]
    Cache(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CampaignError {
    pub fn provider(provider: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Errors caused by how a campaign or provider is set up rather than by a
    /// transient failure. These must reach the caller unchanged.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownProvider(_) | Self::InvalidVariants(_)
        )
    }
}
