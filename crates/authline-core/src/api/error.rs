use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

use crate::storage::StoreError;

/// Failure derived from a backend response status or envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - session has ended")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request rejected: {0}")]
    Unsuccessful(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(truncated),
            404 => ApiError::NotFound(truncated),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(truncated),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

/// Network-layer failure. Never retried by the pipeline.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a credential renewal failed. Clone so every request coalesced onto
/// one renewal receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    #[error("No refresh credential is stored")]
    MissingRefreshToken,

    #[error("Refresh credential rejected (status {0})")]
    Rejected(StatusCode),

    #[error("Renewal endpoint reported failure: {0}")]
    Unsuccessful(String),

    #[error("Renewal request failed: {0}")]
    Transport(String),

    #[error("Renewal timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Invalid renewal response: {0}")]
    InvalidResponse(String),

    /// A logout or new login replaced the credentials while renewing.
    #[error("Credentials changed while renewing")]
    Superseded,
}

/// Terminal failure of an authenticated request.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Credential renewal failed: {0}")]
    Renewal(#[source] RenewalError),

    /// The backend issued new credentials but they could not be persisted.
    #[error("Renewed credentials could not be stored: {0}")]
    StoreWrite(#[source] StoreError),

    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PipelineError {
    /// True when the session is over and the user must log in again.
    pub fn requires_reauthentication(&self) -> bool {
        match self {
            // Whoever replaced the credentials decides the session state
            PipelineError::Renewal(RenewalError::Superseded) => false,
            PipelineError::Renewal(_)
            | PipelineError::StoreWrite(_)
            | PipelineError::Api(ApiError::Unauthorized) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(ApiError::from_status(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized);
        assert_eq!(
            ApiError::from_status(StatusCode::FORBIDDEN, "nope"),
            ApiError::AccessDenied("nope".to_string())
        );
        assert_eq!(
            ApiError::from_status(StatusCode::NOT_FOUND, "/orders/9"),
            ApiError::NotFound("/orders/9".to_string())
        );
        assert_eq!(ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited);
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, "upstream"),
            ApiError::ServerError(_)
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, "bad"),
            ApiError::InvalidResponse(msg) if msg.contains("400")
        ));
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(1200);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(500)));
        assert!(truncated.ends_with("(truncated, 1200 total bytes)"));

        // Never splits a multi-byte character
        let wide = "é".repeat(400);
        let truncated = ApiError::truncate_body(&wide);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_requires_reauthentication() {
        assert!(PipelineError::Renewal(RenewalError::MissingRefreshToken).requires_reauthentication());
        assert!(PipelineError::Api(ApiError::Unauthorized).requires_reauthentication());
        assert!(!PipelineError::Api(ApiError::RateLimited).requires_reauthentication());
        assert!(!PipelineError::Transport(TransportError::TimedOut(Duration::from_secs(1)))
            .requires_reauthentication());
        assert!(!PipelineError::Renewal(RenewalError::Superseded).requires_reauthentication());
    }
}
