//! # Caller-Facing Outcome
//!
//! What every [`Gateway`](crate::Gateway) operation hands back to the UI.
//! Expected failures never cross this boundary as panics or bare errors.
//!
//! ## Serialization
//! ```json
//! { "success": true,  "data": { ... } }
//! { "success": false, "error": "Post not found", "kind": "client_error" }
//! ```

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use skygate_core::ErrorKind;

use crate::error::{GatewayError, GatewayResult};

/// Success payload, or a human-readable failure tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    Failure { error: String, kind: ErrorKind },
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Outcome::Success(data) => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            Outcome::Success(data) => Some(data),
            Outcome::Failure { .. } => None,
        }
    }

    /// Kind of the failure, if this is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(data) => Outcome::Success(f(data)),
            Outcome::Failure { error, kind } => Outcome::Failure { error, kind },
        }
    }
}

impl<T> From<GatewayError> for Outcome<T> {
    fn from(err: GatewayError) -> Self {
        Outcome::Failure {
            error: err.to_string(),
            kind: err.kind(),
        }
    }
}

impl<T> From<GatewayResult<T>> for Outcome<T> {
    fn from(result: GatewayResult<T>) -> Self {
        match result {
            Ok(data) => Outcome::Success(data),
            Err(err) => err.into(),
        }
    }
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Success(data) => {
                let mut state = serializer.serialize_struct("Outcome", 2)?;
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
                state.end()
            }
            Outcome::Failure { error, kind } => {
                let mut state = serializer.serialize_struct("Outcome", 3)?;
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
                state.serialize_field("kind", kind)?;
                state.end()
            }
        }
    }
}
