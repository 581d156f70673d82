use thiserror::Error;

/// Every failure the request builder or the streaming client can
/// report. Delivered to callers as a single terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    #[error("Authentication failed: the API key is missing or was rejected")]
    Authentication,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("The request timed out")]
    NetworkTimeout,

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response format: {0}")]
    InvalidResponseFormat(String),

    #[error("Streaming failed: {0}")]
    StreamingError(String),

    #[error("Failed to read attachment {id}: {reason}")]
    AttachmentResolution { id: String, reason: String },

    #[error("Failed to encode request: {0}")]
    Encoding(String),
}

impl ChatError {
    /// A short hint shown to the user next to the error description.
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ChatError::InvalidUrl(_) => "Check the base URL of the active configuration.",
            ChatError::Authentication => "Check that a valid API key is configured.",
            ChatError::ModelNotFound(_) => {
                "Check the model name or pick a model the provider offers."
            }
            ChatError::RateLimitExceeded { .. } => "Wait a moment before sending again.",
            ChatError::NetworkTimeout => "Check your connection and try again.",
            ChatError::ServerError { .. } => "The provider had a problem. Try again later.",
            ChatError::InvalidResponseFormat(_) => {
                "The endpoint may not be OpenAI compatible. Check the base URL."
            }
            ChatError::StreamingError(_) => "Check your connection and try again.",
            ChatError::AttachmentResolution { .. } => "Remove the image and attach it again.",
            ChatError::Encoding(_) => "Edit the message and try again.",
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ChatError::NetworkTimeout;
        }
        if err.is_builder() {
            if let Some(url) = err.url() {
                return ChatError::InvalidUrl(url.to_string());
            }
            return ChatError::InvalidUrl(err.to_string());
        }
        ChatError::StreamingError(err.to_string())
    }
}
