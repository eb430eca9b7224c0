//! REST-side error types.
//!
//! These errors come from the panel's HTTP API: token issuance, server
//! fetches, power requests and directory listings.

use std::fmt;

use crate::traits::HttpError;

/// Network-specific error variants.
#[derive(Debug, Clone)]
pub enum NetworkError {
    /// Connection to the panel failed.
    ConnectionFailed { url: String, message: String },

    /// Request timed out.
    Timeout { operation: String },

    /// HTTP status error (non-2xx response).
    HttpStatus { status: u16, message: String },

    /// The response body was not the envelope we expected.
    InvalidResponse { message: String },

    /// Request was cancelled.
    Cancelled,

    /// Generic network error.
    Other { message: String },
}

impl NetworkError {
    /// Check if this error is likely transient and can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::ConnectionFailed { .. } => true,
            NetworkError::Timeout { .. } => true,
            NetworkError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            NetworkError::InvalidResponse { .. } => false,
            NetworkError::Cancelled => false,
            NetworkError::Other { .. } => false,
        }
    }

    /// Check if the panel rejected our credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, NetworkError::HttpStatus { status: 401, .. })
    }

    /// Get a user-friendly error message.
    pub fn user_message(&self) -> String {
        match self {
            NetworkError::ConnectionFailed { .. } => {
                "Unable to reach the panel. Please check your connection.".to_string()
            }
            NetworkError::Timeout { operation } => {
                format!("The {} request timed out.", operation)
            }
            NetworkError::HttpStatus { status, .. } => match *status {
                401 => "Your session is no longer valid. Please sign in again.".to_string(),
                403 => "You don't have permission to do that on this server.".to_string(),
                404 => "The server or file could not be found.".to_string(),
                409 => "The server is busy with another operation.".to_string(),
                429 => "Too many requests. Please wait a moment and try again.".to_string(),
                500..=599 => "The panel is experiencing issues. Please try again later.".to_string(),
                _ => format!("The panel returned an error (HTTP {}).", status),
            },
            NetworkError::InvalidResponse { .. } => {
                "Received an unexpected response from the panel.".to_string()
            }
            NetworkError::Cancelled => "The request was cancelled.".to_string(),
            NetworkError::Other { message } => format!("Network error: {}", message),
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed { .. } => "E_NET_CONN",
            NetworkError::Timeout { .. } => "E_NET_TIMEOUT",
            NetworkError::HttpStatus { .. } => "E_NET_HTTP",
            NetworkError::InvalidResponse { .. } => "E_NET_INVALID",
            NetworkError::Cancelled => "E_NET_CANCEL",
            NetworkError::Other { .. } => "E_NET_OTHER",
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::ConnectionFailed { url, message } => {
                write!(f, "Connection failed to '{}': {}", url, message)
            }
            NetworkError::Timeout { operation } => write!(f, "{} timed out", operation),
            NetworkError::HttpStatus { status, message } => {
                write!(f, "HTTP {} error: {}", status, message)
            }
            NetworkError::InvalidResponse { message } => {
                write!(f, "Invalid response: {}", message)
            }
            NetworkError::Cancelled => write!(f, "Request cancelled"),
            NetworkError::Other { message } => write!(f, "Network error: {}", message),
        }
    }
}

impl std::error::Error for NetworkError {}

impl From<HttpError> for NetworkError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::ConnectionFailed(message) => NetworkError::ConnectionFailed {
                url: String::new(),
                message,
            },
            HttpError::Timeout(operation) => NetworkError::Timeout { operation },
            HttpError::ServerError { status, message } => {
                NetworkError::HttpStatus { status, message }
            }
            HttpError::Cancelled => NetworkError::Cancelled,
            HttpError::InvalidUrl(message) | HttpError::Other(message) => {
                NetworkError::Other { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let err = NetworkError::HttpStatus {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert!(err.is_retryable());

        let err = NetworkError::HttpStatus {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_unauthorized());

        let err = NetworkError::HttpStatus {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_from_http_error() {
        let err: NetworkError = HttpError::ServerError {
            status: 409,
            message: "conflict".to_string(),
        }
        .into();
        assert!(matches!(err, NetworkError::HttpStatus { status: 409, .. }));
        assert_eq!(err.user_message(), "The server is busy with another operation.");

        let err: NetworkError = HttpError::Timeout("power".to_string()).into();
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "E_NET_TIMEOUT");
    }
}
