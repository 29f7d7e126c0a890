use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error types for the triage pipeline and its collaborators
#[derive(Error, Debug)]
pub enum TriageError {
    /// Missing or rejected mailbox credential - the user must re-authorize
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Provider returned a 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Any other provider-side failure (mailbox, language model, token endpoint)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Record or remote resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Summary could not be produced for a message
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// Unsubscribe automation found nothing actionable or the driver failed
    #[error("Automation failed: {0}")]
    Automation(String),

    /// Caller passed malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TriageError {
    /// Check if the error is transient and the caller may retry the invocation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimitExceeded { .. }
                | TriageError::Server { .. }
                | TriageError::Network(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Whether the user has to re-authorize the mailbox
    pub fn requires_reauth(&self) -> bool {
        matches!(self, TriageError::Auth(_))
    }
}

impl From<rusqlite::Error> for TriageError {
    fn from(error: rusqlite::Error) -> Self {
        TriageError::Storage(error.to_string())
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            return TriageError::Network(error.to_string());
        }
        match error.status() {
            Some(status) if status.as_u16() == 401 => TriageError::Auth(error.to_string()),
            Some(status) if status.is_server_error() => TriageError::Server {
                status: status.as_u16(),
                message: error.to_string(),
            },
            _ => TriageError::Provider(error.to_string()),
        }
    }
}

/// Parse the Retry-After header as delay-seconds, defaulting to 5
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

impl From<google_gmail1::Error> for TriageError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    // Revoked or expired grant
                    401 => TriageError::Auth(message),
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        TriageError::RateLimitExceeded { retry_after }
                    }
                    404 => TriageError::NotFound("Gmail resource not found".to_string()),
                    500..=599 => TriageError::Server {
                        status: status_code,
                        message,
                    },
                    _ => TriageError::Provider(message),
                }
            }
            google_gmail1::Error::MissingToken(ref err) => {
                TriageError::Auth(format!("Missing token: {}", err))
            }
            google_gmail1::Error::BadRequest(ref err) => {
                TriageError::Provider(format!("Bad request: {}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                TriageError::Network(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => TriageError::Network(err.to_string()),
            _ => TriageError::Provider(error.to_string()),
        }
    }
}
