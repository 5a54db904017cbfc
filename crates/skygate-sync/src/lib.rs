//! # skygate-sync: Remote Access & Synchronization Layer
//!
//! This crate owns every network call the gateway makes: session lifecycle,
//! retries, feed fallback, the query cache, and optimistic mutations.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Skygate Sync Architecture                        │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Gateway (service facade)                    │  │
//! │  │                                                                  │  │
//! │  │  Built once at process start, passed explicitly                  │  │
//! │  │  Returns Outcome<T> for every operation                          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  QueryCache    │  │ MutationEngine │  │  FeedResolver          │    │
//! │  │                │  │                │  │                        │    │
//! │  │ Coalescing,    │  │ Forward patch, │  │ Explicit descriptors   │    │
//! │  │ stale-while-   │  │ remote write,  │  │ fail loudly; default   │    │
//! │  │ revalidate, GC │  │ compensate     │  │ feed falls back        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                               │                                         │
//! │                               ▼                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ SessionManager │─►│ RetryExecutor  │─►│  Transport (XRPC)      │    │
//! │  │ login / resume │  │ backoff+jitter │  │  authenticated/public  │    │
//! │  │ refresh/logout │  │ classify-aware │  │  endpoint              │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          ▼                                                              │
//! │  ┌────────────────┐                                                     │
//! │  │ SessionStore   │  credentials + profile summary, last writer wins   │
//! │  └────────────────┘                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Gateway configuration (service URLs, retry, cache, feeds)
//! - [`error`] - Gateway error type
//! - [`retry`] - Retry executor with exponential backoff
//! - [`protocol`] - Remote calls and typed replies
//! - [`transport`] - Transport trait and the XRPC/HTTP implementation
//! - [`store`] - Persisted session store
//! - [`session`] - Session manager
//! - [`feed`] - Feed resolver and the default-feed fallback chain
//! - [`cache`] - Query cache
//! - [`mutation`] - Optimistic mutations
//! - [`outcome`] - Caller-facing result shape
//! - [`gateway`] - Service facade
//!
//! ## Usage
//!
//! ```rust,ignore
//! use skygate_sync::{Gateway, GatewayConfig};
//!
//! let gateway = Gateway::from_config(GatewayConfig::load_or_default(None))?;
//! gateway.resume().await;
//!
//! let page = gateway.feed(None, Some(30), None).await;
//! println!("{}", serde_json::to_string(&page)?);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod mutation;
pub mod outcome;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod store;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::{QueryCache, QueryData, QueryFetcher, QueryKey};
pub use config::{CacheSettings, FeedSettings, GatewayConfig, RetrySettings, ServiceSettings};
pub use error::{GatewayError, GatewayResult};
pub use feed::FeedResolver;
pub use gateway::Gateway;
pub use mutation::{MutationEngine, MutationStatus, PendingMutation, ToggleOutcome};
pub use outcome::Outcome;
pub use protocol::{RemoteCall, RemoteReply};
pub use retry::{RetryExecutor, RetryPolicy};
pub use session::SessionManager;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use transport::{Transport, XrpcTransport};
