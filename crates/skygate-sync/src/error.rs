//! # Gateway Error Types
//!
//! Every failure the gateway can return, each tagged with its [`ErrorKind`].
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Gateway Error Categories                          │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Remote      │  │    Session      │  │     Input               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  status + code  │  │ NotAuthenticated│  │  Validation             │ │
//! │  │  kind from      │  │ (no network     │  │  (no network call)      │ │
//! │  │  classify()     │  │  call made)     │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Protocol     │  │  Configuration  │  │     Local state         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Malformed body │  │  InvalidConfig  │  │  Store                  │ │
//! │  │  UnexpectedReply│  │  InvalidUrl     │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `GatewayError` is `Clone` so one failure can be handed to every caller
//! waiting on a coalesced fetch.

use skygate_core::{classify, ErrorKind, ValidationError};
use thiserror::Error;

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error type covering all failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// A remote call failed. `kind` comes from the classifier.
    #[error("{message}")]
    Remote {
        kind: ErrorKind,
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    /// The reply body could not be decoded.
    #[error("Malformed response: {0}")]
    Protocol(String),

    /// The transport returned a reply of the wrong shape for the call.
    #[error("Unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: &'static str,
    },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// An authenticated-only operation was called while logged out.
    #[error("Not signed in: {operation} requires a session")]
    NotAuthenticated { operation: String },

    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Caller-supplied input was rejected before any network call.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid gateway configuration.
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    /// Invalid service URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load or save the config file.
    #[error("Config file error: {0}")]
    ConfigFile(String),

    // =========================================================================
    // Local State Errors
    // =========================================================================
    /// Session store read/write failed.
    #[error("Session store error: {0}")]
    Store(String),

    /// Serialization of a local record failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal gateway error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Builds the error for a failed remote call, classifying it once.
    ///
    /// `status` is `None` when no response was received.
    pub fn remote(status: Option<u16>, code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = match &code {
            Some(code) => classify(status, &format!("{}: {}", code, message)),
            None => classify(status, &message),
        };

        GatewayError::Remote {
            kind,
            status,
            code,
            message,
        }
    }

    /// Shorthand for [`GatewayError::NotAuthenticated`].
    pub fn not_authenticated(operation: impl Into<String>) -> Self {
        GatewayError::NotAuthenticated {
            operation: operation.into(),
        }
    }

    /// The handling category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Remote { kind, .. } => *kind,
            GatewayError::NotAuthenticated { .. } => ErrorKind::Unauthorized,
            GatewayError::Validation(_) => ErrorKind::Validation,
            // A garbled body is treated like any unclassified failure.
            GatewayError::Protocol(_) | GatewayError::Internal(_) => ErrorKind::Retryable,
            GatewayError::UnexpectedReply { .. }
            | GatewayError::InvalidConfig(_)
            | GatewayError::InvalidUrl(_)
            | GatewayError::ConfigFile(_)
            | GatewayError::Store(_)
            | GatewayError::Serialization(_) => ErrorKind::ClientError,
        }
    }

    /// Returns true if the retry executor may attempt the call again.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Returns true if a session refresh might fix this error.
    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }

    /// HTTP status of a remote failure, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Remote { status, .. } => *status,
            _ => None,
        }
    }

    /// Protocol error code of a remote failure (e.g., `ExpiredToken`).
    pub fn code(&self) -> Option<&str> {
        match self {
            GatewayError::Remote { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return GatewayError::Protocol(err.to_string());
        }
        GatewayError::remote(err.status().map(|status| status.as_u16()), None, err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Store(err.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(err: toml::de::Error) -> Self {
        GatewayError::ConfigFile(err.to_string())
    }
}

impl From<toml::ser::Error> for GatewayError {
    fn from(err: toml::ser::Error) -> Self {
        GatewayError::ConfigFile(err.to_string())
    }
}
