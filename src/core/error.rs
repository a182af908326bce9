#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(reqwest::Error),
    /// Response parsing errors (missing fields, invalid format)
    #[error("Failed to parse response: {0}")]
    ResponseFormat(String),
    /// API-specific errors (rate limits, bad requests, upstream failures)
    #[error("API error: {0}")]
    ApiError(String),
    /// Authentication-specific errors
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// Stream-related errors
    #[error("Stream error: {0}")]
    StreamError(String),
    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,
    /// The model kept requesting tools past the configured round limit
    #[error("Tool-call round limit of {0} reached")]
    RoundLimit(u32),
    /// The model returned no choices
    #[error("No response from the model")]
    EmptyResponse,
    /// I/O error
    #[error("I/O error: {0}")]
    IOError(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl LLMError {
    /// Builds an error from a message carried by an in-stream `error` frame.
    ///
    /// The frame only holds text, so authentication failures are recognised
    /// by their status code.
    pub fn from_stream_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("401") || message.starts_with("Authentication error") {
            Self::Authentication(message)
        } else {
            Self::StreamError(message)
        }
    }

    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

impl From<std::io::Error> for LLMError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err.to_string())
    }
}

impl From<config::ConfigError> for LLMError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for LLMError {
    fn from(err: reqwest::Error) -> Self {
        // If the error has a status code, map it to a more specific error
        if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => Self::Authentication(format!("Authentication failed ({status}): {err}")),
                429 => Self::ApiError(format!("Rate limit exceeded: {err}")),
                500..=599 => Self::ApiError(format!("Server error: {err}")),
                _ => Self::Network(err),
            }
        } else {
            Self::Network(err)
        }
    }
}
