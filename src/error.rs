//! Error types for a3s-relay

use thiserror::Error;

/// Errors that can occur while pairing peers and relaying messages
#[derive(Debug, Error)]
pub enum RelayError {
    /// Referenced code has no active session
    #[error("Room not found: {0}")]
    NotFound(String),

    /// Client slot already occupied
    #[error("Room is full: {0}")]
    Full(String),

    /// Host slot still held by an open connection
    #[error("Room already has a connected host: {0}")]
    HostPresent(String),

    /// Undecodable envelope (logged locally, never sent to the other peer)
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// No free session code or session capacity reached
    #[error("Session capacity exhausted: {0}")]
    Exhausted(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport/server failure
    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl RelayError {
    /// Short machine-readable reason used in polling responses
    pub fn reason(&self) -> &'static str {
        match self {
            RelayError::NotFound(_) => "not_found",
            RelayError::Full(_) => "full",
            RelayError::HostPresent(_) => "host_present",
            RelayError::MalformedInput(_) => "malformed",
            RelayError::Exhausted(_) => "exhausted",
            _ => "internal",
        }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<RelayError> for axum::response::Response {
    fn from(err: RelayError) -> Self {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let status = match &err {
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Full(_) | RelayError::HostPresent(_) => StatusCode::CONFLICT,
            RelayError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            RelayError::Exhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": err.reason(), "message": err.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        self.into()
    }
}
