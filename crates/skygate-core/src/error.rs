//! # Error Types
//!
//! Error kinds, the failure classifier, and validation errors.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  skygate-core (this file)                                              │
//! │  ├── ErrorKind        - The closed set of handling categories          │
//! │  ├── classify()       - Raw failure (status, message) → ErrorKind      │
//! │  └── ValidationError  - Caller-supplied bad input                      │
//! │                                                                         │
//! │  skygate-sync (separate crate)                                         │
//! │  └── GatewayError     - Every failure the gateway can return           │
//! │                                                                         │
//! │  Flow: HTTP status + message → classify() → GatewayError → Outcome     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Classification Table
//! ```text
//! ┌──────────────────────────────────────┬──────────────┬────────────────┐
//! │ Failure                              │ Kind         │ Retried?       │
//! ├──────────────────────────────────────┼──────────────┼────────────────┤
//! │ 401, or expired/invalid auth message │ Unauthorized │ no (refresh)   │
//! │ 408, 429                             │ Retryable    │ yes            │
//! │ other 4xx                            │ ClientError  │ no             │
//! │ 5xx, network, anything unrecognized  │ Retryable    │ yes, bounded   │
//! │ bad input caught before the network  │ Validation   │ never sent     │
//! └──────────────────────────────────────┴──────────────┴────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Kind
// =============================================================================

/// Handling category for a failure. Downstream code switches on this tag,
/// never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Expired or invalid credentials.
    Unauthorized,
    /// Malformed request or absent resource (non-auth 4xx).
    ClientError,
    /// Network failure, 5xx, 408, 429, or unclassified.
    Retryable,
    /// Input rejected before any network call.
    Validation,
}

impl ErrorKind {
    /// Returns true if the retry executor may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Unauthorized => write!(f, "unauthorized"),
            ErrorKind::ClientError => write!(f, "client_error"),
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::Validation => write!(f, "validation"),
        }
    }
}

/// Message fragments (lowercased) that mean the session is no longer valid,
/// whatever status code carried them.
const AUTH_MESSAGE_MARKERS: &[&str] = &[
    "expiredtoken",
    "expired token",
    "token has expired",
    "invalidtoken",
    "invalid token",
    "authenticationrequired",
    "authentication required",
    "invalid identifier or password",
];

// =============================================================================
// Classifier
// =============================================================================

/// Maps a raw failure into its handling category.
///
/// `status` is `None` when no HTTP response was received (DNS failure,
/// connection reset, timeout inside the transport).
///
/// ## Example
/// ```rust
/// use skygate_core::{classify, ErrorKind};
///
/// assert_eq!(classify(Some(400), "ExpiredToken: Token has expired"), ErrorKind::Unauthorized);
/// assert_eq!(classify(Some(404), "Profile not found"), ErrorKind::ClientError);
/// assert_eq!(classify(Some(429), "Rate Limit Exceeded"), ErrorKind::Retryable);
/// assert_eq!(classify(None, "connection reset"), ErrorKind::Retryable);
/// ```
pub fn classify(status: Option<u16>, message: &str) -> ErrorKind {
    if status == Some(401) || mentions_expired_auth(message) {
        return ErrorKind::Unauthorized;
    }

    match status {
        Some(408) | Some(429) => ErrorKind::Retryable,
        Some(400..=499) => ErrorKind::ClientError,
        Some(500..=599) => ErrorKind::Retryable,
        // Unclassified failures default to retryable; the attempt ceiling
        // keeps this bounded.
        _ => ErrorKind::Retryable,
    }
}

fn mentions_expired_auth(message: &str) -> bool {
    let lowered = message.to_lowercase();
    AUTH_MESSAGE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These are raised synchronously, before any network call, and are never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., malformed handle, malformed URI).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify(Some(401), "Unauthorized"), ErrorKind::Unauthorized);
        assert_eq!(classify(Some(400), "InvalidRequest"), ErrorKind::ClientError);
        assert_eq!(classify(Some(403), "Forbidden"), ErrorKind::ClientError);
        assert_eq!(classify(Some(404), "NotFound"), ErrorKind::ClientError);
        assert_eq!(classify(Some(408), "Request Timeout"), ErrorKind::Retryable);
        assert_eq!(classify(Some(429), "RateLimitExceeded"), ErrorKind::Retryable);
        assert_eq!(classify(Some(500), "InternalServerError"), ErrorKind::Retryable);
        assert_eq!(classify(Some(503), "Service Unavailable"), ErrorKind::Retryable);
    }

    #[test]
    fn test_auth_message_overrides_status() {
        assert_eq!(
            classify(Some(400), "ExpiredToken: Token has expired"),
            ErrorKind::Unauthorized
        );
        assert_eq!(classify(None, "Invalid token"), ErrorKind::Unauthorized);
    }

    #[test]
    fn test_unclassified_defaults_to_retryable() {
        assert_eq!(classify(None, "Network request failed"), ErrorKind::Retryable);
        assert_eq!(classify(Some(302), "Found"), ErrorKind::Retryable);
        assert_eq!(classify(None, ""), ErrorKind::Retryable);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::ClientError.to_string(), "client_error");
        assert!(ErrorKind::Retryable.is_retryable());
        assert!(!ErrorKind::Unauthorized.is_retryable());
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "text".to_string(),
        };
        assert_eq!(err.to_string(), "text is required");

        let err = ValidationError::TooLong {
            field: "text".to_string(),
            max: 300,
        };
        assert_eq!(err.to_string(), "text must be at most 300 characters");
    }
}
