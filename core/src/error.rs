use crate::types::{UserId, WindowDays};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid window: {window_days} days (expected 30 or 180)")]
    InvalidWindow { window_days: WindowDays },

    #[error("Insufficient data: {history_days} days of history, need at least {required_days}")]
    InsufficientData { history_days: i64, required_days: i64 },

    #[error("Consent required for user '{user_id}'")]
    ConsentRequired { user_id: UserId },

    #[error("User '{user_id}' not found")]
    UserNotFound { user_id: UserId },

    #[error("Invalid catalog: {reason}")]
    InvalidCatalog { reason: String },

    #[error("Template error in '{item_id}': unknown placeholder '{placeholder}'")]
    UnknownPlaceholder { item_id: String, placeholder: String },

    #[error("Internal system error (request {request_id})")]
    System { request_id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Message safe to show an end user. Never includes internal detail.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidWindow { .. } => {
                "Please choose a 30-day or 180-day view.".into()
            }
            Self::InsufficientData { required_days, .. } => format!(
                "We need at least {required_days} days of transaction history \
                 before we can personalize insights for you."
            ),
            Self::ConsentRequired { .. } => {
                "Personalized recommendations require your consent. \
                 You can opt in from your settings."
                    .into()
            }
            Self::UserNotFound { .. } => "We couldn't find that account.".into(),
            _ => "Something went wrong on our side. Please try again in a moment.".into(),
        }
    }

    /// True for failures the caller may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::System { .. } | Self::Database(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
