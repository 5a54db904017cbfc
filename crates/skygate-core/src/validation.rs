//! # Validation Module
//!
//! Input checks run before any network call.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (composer, login form)                                │
//! │  └── Immediate feedback while typing                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Gateway operation (Rust)                                     │
//! │  └── THIS MODULE: reject bad input, zero network calls                 │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote service                                               │
//! │  └── 400 InvalidRequest → ClientError (never retried)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use skygate_core::validation::{validate_limit, validate_post_text};
//!
//! validate_post_text("hello world").unwrap();
//! validate_limit(30).unwrap();
//! assert!(validate_limit(0).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::AtUri;
use crate::{MAX_PAGE_LIMIT, MAX_POST_CHARS};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identity Validators
// =============================================================================

/// Validates a handle such as `alice.bsky.social`.
///
/// ## Rules
/// - Must not be empty, at most 253 characters
/// - At least two dot-separated labels
/// - Labels use letters, digits and hyphens, and do not start or end with a hyphen
///
/// ## Example
/// ```rust
/// use skygate_core::validation::validate_handle;
///
/// assert!(validate_handle("alice.bsky.social").is_ok());
/// assert!(validate_handle("@alice.test").is_ok());
/// assert!(validate_handle("alice").is_err());
/// ```
pub fn validate_handle(handle: &str) -> ValidationResult<String> {
    let handle = handle.trim().trim_start_matches('@').to_lowercase();

    if handle.is_empty() {
        return Err(ValidationError::Required {
            field: "handle".to_string(),
        });
    }

    if handle.len() > 253 {
        return Err(ValidationError::TooLong {
            field: "handle".to_string(),
            max: 253,
        });
    }

    let labels: Vec<&str> = handle.split('.').collect();
    if labels.len() < 2 {
        return Err(ValidationError::InvalidFormat {
            field: "handle".to_string(),
            reason: "must contain at least one dot".to_string(),
        });
    }

    let label_ok = |label: &&str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };
    if !labels.iter().all(label_ok) {
        return Err(ValidationError::InvalidFormat {
            field: "handle".to_string(),
            reason: "labels must be letters, digits, and inner hyphens".to_string(),
        });
    }

    Ok(handle)
}

/// Validates a decentralized identifier such as `did:plc:abc123`.
pub fn validate_did(did: &str) -> ValidationResult<()> {
    let did = did.trim();

    if did.is_empty() {
        return Err(ValidationError::Required {
            field: "did".to_string(),
        });
    }

    let mut parts = did.splitn(3, ':');
    let scheme = parts.next().unwrap_or_default();
    let method = parts.next().unwrap_or_default();
    let id = parts.next().unwrap_or_default();

    if scheme != "did"
        || method.is_empty()
        || !method.chars().all(|c| c.is_ascii_lowercase())
        || id.is_empty()
    {
        return Err(ValidationError::InvalidFormat {
            field: "did".to_string(),
            reason: "expected did:<method>:<id>".to_string(),
        });
    }

    Ok(())
}

/// Validates an actor reference, which may be a DID or a handle.
///
/// Returns the normalized form.
pub fn validate_actor(actor: &str) -> ValidationResult<String> {
    let actor = actor.trim();
    if actor.starts_with("did:") {
        validate_did(actor)?;
        Ok(actor.to_string())
    } else {
        validate_handle(actor)
    }
}

/// Validates a record URI (`at://<repo>/<collection>/<rkey>`).
pub fn validate_at_uri(uri: &str) -> ValidationResult<AtUri> {
    if uri.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "uri".to_string(),
        });
    }

    uri.trim().parse()
}

/// Validates a content hash. Only presence is checked; the remote service
/// owns the encoding.
pub fn validate_cid(cid: &str) -> ValidationResult<()> {
    if cid.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "cid".to_string(),
        });
    }

    if cid.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "cid".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Login Validators
// =============================================================================

/// Validates a login identifier (handle, DID, or email).
pub fn validate_identifier(identifier: &str) -> ValidationResult<String> {
    let identifier = identifier.trim();

    if identifier.is_empty() {
        return Err(ValidationError::Required {
            field: "identifier".to_string(),
        });
    }

    if identifier.contains('@') && !identifier.starts_with('@') {
        // Email addresses go to the server as-is.
        return Ok(identifier.to_string());
    }

    validate_actor(identifier)
}

/// Validates a password or app password.
pub fn validate_secret(secret: &str) -> ValidationResult<()> {
    if secret.is_empty() {
        return Err(ValidationError::Required {
            field: "password".to_string(),
        });
    }

    if secret.len() > 256 {
        return Err(ValidationError::TooLong {
            field: "password".to_string(),
            max: 256,
        });
    }

    Ok(())
}

// =============================================================================
// Content Validators
// =============================================================================

/// Validates post text.
///
/// ## Rules
/// - Must not be empty or whitespace only
/// - At most MAX_POST_CHARS (300) characters
pub fn validate_post_text(text: &str) -> ValidationResult<()> {
    if text.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "text".to_string(),
        });
    }

    if text.chars().count() > MAX_POST_CHARS {
        return Err(ValidationError::TooLong {
            field: "text".to_string(),
            max: MAX_POST_CHARS,
        });
    }

    Ok(())
}

/// Validates a search query and returns it trimmed.
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.is_empty() {
        return Err(ValidationError::Required {
            field: "query".to_string(),
        });
    }

    if query.chars().count() > 256 {
        return Err(ValidationError::TooLong {
            field: "query".to_string(),
            max: 256,
        });
    }

    Ok(query.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a page size.
///
/// ## Rules
/// - Between 1 and MAX_PAGE_LIMIT (100)
pub fn validate_limit(limit: u32) -> ValidationResult<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: MAX_PAGE_LIMIT as i64,
        });
    }

    Ok(())
}

/// Validates an upload's MIME type and size.
pub fn validate_blob(mime_type: &str, len: usize) -> ValidationResult<()> {
    let mime_type = mime_type.trim();

    if mime_type.is_empty() {
        return Err(ValidationError::Required {
            field: "mime_type".to_string(),
        });
    }

    if !mime_type.contains('/') {
        return Err(ValidationError::InvalidFormat {
            field: "mime_type".to_string(),
            reason: "expected type/subtype".to_string(),
        });
    }

    if len == 0 {
        return Err(ValidationError::Required {
            field: "blob".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
