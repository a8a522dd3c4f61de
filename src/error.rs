// Error handling module
// Defines the error types surfaced to callers of the API client

use thiserror::Error;

/// Errors returned by the API client
#[derive(Error, Debug)]
pub enum ClientError {
    /// No response was received (network failure, timeout, TLS, ...)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The backend rejected the presented credential and it could not be recovered
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Any other non-2xx response
    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    /// The token refresh failed; the session has been torn down
    #[error("Token refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    /// A 2xx response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// HTTP status carried by this error, if a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Unauthorized { .. } => Some(401),
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Refresh(RefreshError::Rejected { status, .. }) => Some(*status),
            ClientError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for an authorization-denied failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }
}

/// Failures of the refresh-token exchange
#[derive(Error, Debug)]
pub enum RefreshError {
    /// The refresh endpoint answered with a non-2xx status
    #[error("refresh endpoint rejected the request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The refresh endpoint could not be reached
    #[error("refresh request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The refresh endpoint answered 2xx but without a usable token pair
    #[error("malformed refresh response: {0}")]
    MalformedPayload(String),
}

/// Credential store failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ClientError::Unauthorized {
            message: "token expired".to_string(),
        };
        assert_eq!(err.to_string(), "Unauthorized: token expired");

        let err = ClientError::Status {
            status: 429,
            message: "Rate limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 429 - Rate limit exceeded");

        let err = ClientError::InvalidRequest("bad url".to_string());
        assert_eq!(err.to_string(), "Invalid request: bad url");
    }

    #[test]
    fn test_refresh_error_message() {
        let err = ClientError::from(RefreshError::Rejected {
            status: 400,
            message: "invalid refresh token".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Token refresh failed: refresh endpoint rejected the request: 400 - invalid refresh token"
        );

        let err = ClientError::from(RefreshError::MalformedPayload("missing token".into()));
        assert_eq!(
            err.to_string(),
            "Token refresh failed: malformed refresh response: missing token"
        );
    }

    #[test]
    fn test_internal_error_message() {
        let err = ClientError::Internal(anyhow::anyhow!("Something went wrong"));
        assert_eq!(err.to_string(), "Internal error: Something went wrong");
    }

    #[test]
    fn test_status_accessor() {
        let err = ClientError::Unauthorized {
            message: String::new(),
        };
        assert_eq!(err.status(), Some(401));
        assert!(err.is_unauthorized());

        let err = ClientError::Status {
            status: 503,
            message: String::new(),
        };
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_unauthorized());

        let err = ClientError::Refresh(RefreshError::Rejected {
            status: 403,
            message: String::new(),
        });
        assert_eq!(err.status(), Some(403));

        let err = ClientError::Refresh(RefreshError::MalformedPayload(String::new()));
        assert_eq!(err.status(), None);

        let err = ClientError::InvalidRequest(String::new());
        assert_eq!(err.status(), None);
    }
}
