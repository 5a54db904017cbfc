//! # skygate-core: Pure Domain Logic for Skygate
//!
//! This crate holds everything about the gateway that can be decided without
//! touching the network: the records we read, how feeds are named, how a
//! failure is classified, what input is acceptable, and how an optimistic
//! change is applied and reverted.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Skygate Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               Presentation (screens, composer, player)          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ Outcome<T>                             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │      skygate-sync: Session, Retry, Feeds, Cache, Mutations      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ skygate-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌────────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ descriptor │  │   error   │  │   patch   │  │   │
//! │  │   │ PostView  │  │ following  │  │ ErrorKind │  │ PatchPair │  │   │
//! │  │   │ FeedPage  │  │ author|... │  │ classify  │  │ Patchable │  │   │
//! │  │   └───────────┘  └────────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO NETWORK • NO TIMERS • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Remote records (posts, profiles, feed pages) and session types
//! - [`descriptor`] - Feed descriptor grammar
//! - [`error`] - Error kinds, the classifier, validation errors
//! - [`validation`] - Input checks run before any network call
//! - [`patch`] - Forward/compensating patch pairs and the apply routine
//!
//! ## Example Usage
//!
//! ```rust
//! use skygate_core::{classify, ErrorKind, FeedDescriptor};
//!
//! let descriptor: FeedDescriptor = "feedgen|at://did:plc:abc/app.bsky.feed.generator/hot"
//!     .parse()
//!     .unwrap();
//! assert!(descriptor.is_explicit());
//!
//! assert_eq!(classify(Some(503), "Service Unavailable"), ErrorKind::Retryable);
//! assert_eq!(classify(Some(401), ""), ErrorKind::Unauthorized);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod descriptor;
pub mod error;
pub mod patch;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use descriptor::{AuthorFilter, FeedDescriptor};
pub use error::{classify, ErrorKind, ValidationError};
pub use patch::{Patch, PatchPair, Patchable, ViewerField};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Largest page size any feed or search request may ask for.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Maximum post length, counted in characters.
pub const MAX_POST_CHARS: usize = 300;

/// Prefix of the placeholder record URI written by optimistic patches
/// until the server assigns the real one.
pub const PLACEHOLDER_PREFIX: &str = "pending:";
