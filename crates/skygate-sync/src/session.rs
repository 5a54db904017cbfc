//! # Session Manager
//!
//! Owns the authenticated identity, the active transport endpoint, and the
//! persisted credentials.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Session Lifecycle                                │
//! │                                                                         │
//! │   process start                                                        │
//! │        │ resume_from_store()                                           │
//! │        ▼                                                                │
//! │  ┌────────────┐   stored + valid    ┌───────────────────┐              │
//! │  │  Public    │ ──────────────────► │  Authenticated    │              │
//! │  │ no creds   │                     │  creds persisted  │              │
//! │  │            │ ◄── invalid: clear  │                   │              │
//! │  └─────┬──────┘     store           └──┬─────────┬──────┘              │
//! │        │  ▲                            │         │ refresh()           │
//! │ login()│  │ login failed /             │         │ capture renewed     │
//! │        │  │ logout()                   │         │ tokens, re-persist  │
//! │        ▼  │                            │         ▼                      │
//! │  switch to Authenticated ──── ok ──────┘    (stays Authenticated)      │
//! │  BEFORE create_session                                                 │
//! │                                                                         │
//! │  INVARIANT: Authenticated endpoint ⇔ credentials present               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use skygate_core::validation::{validate_identifier, validate_secret};
use skygate_core::{
    Credentials, Endpoint, ErrorKind, HostPlatform, ProfileSummary, TransportSession,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{RemoteCall, RemoteReply};
use crate::retry::RetryExecutor;
use crate::store::{SessionStore, CREDENTIALS_KEY, PROFILE_KEY};
use crate::transport::Transport;

/// The one owner of session state.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    retry: RetryExecutor,
    platform: HostPlatform,
    credentials: RwLock<Option<Credentials>>,
    profile: RwLock<Option<ProfileSummary>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        retry: RetryExecutor,
        platform: HostPlatform,
    ) -> Self {
        SessionManager {
            transport,
            store,
            retry,
            platform,
            credentials: RwLock::new(None),
            profile: RwLock::new(None),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Logs in with a handle/DID/email and a password.
    ///
    /// The authenticated endpoint is activated before the attempt and
    /// reverted to public if it fails. A failed attempt also forgets any
    /// previously signed-in account, stored records included.
    pub async fn login(&self, identifier: &str, secret: &str) -> GatewayResult<Credentials> {
        let identifier = validate_identifier(identifier)?;
        validate_secret(secret)?;

        self.transport.switch_endpoint(Endpoint::Authenticated).await;

        let session = match self
            .retry
            .run("login", || self.transport.create_session(&identifier, secret))
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "Login failed");
                self.transport.switch_endpoint(Endpoint::Public).await;
                let had_session = self.credentials.write().await.take().is_some();
                *self.profile.write().await = None;
                if had_session {
                    self.clear_store().await;
                }
                return Err(err);
            }
        };

        let credentials = Credentials::from(session);
        if let Err(e) = self.persist(&credentials).await {
            warn!(?e, "Failed to persist credentials after login");
        }
        *self.credentials.write().await = Some(credentials.clone());

        info!(handle = %credentials.actor_handle, did = %credentials.actor_id, "Logged in");

        self.capture_profile(&credentials.actor_id).await;

        Ok(credentials)
    }

    /// Restores a persisted session on process start.
    ///
    /// Returns whether a session was resumed. Persisted credentials that fail
    /// remote validation are cleared.
    pub async fn resume_from_store(&self) -> bool {
        let credentials = match self.load_credentials().await {
            Some(credentials) => credentials,
            None => {
                self.transport.switch_endpoint(Endpoint::Public).await;
                *self.credentials.write().await = None;
                return false;
            }
        };

        self.transport.switch_endpoint(Endpoint::Authenticated).await;
        let stored = TransportSession::from(&credentials);

        let resumed = self
            .retry
            .run("resume-session", || self.transport.resume_session(stored.clone()))
            .await;

        match resumed {
            Ok(session) => {
                let credentials = Credentials::from(session);
                if let Err(e) = self.persist(&credentials).await {
                    warn!(?e, "Failed to re-persist resumed credentials");
                }
                *self.credentials.write().await = Some(credentials.clone());
                *self.profile.write().await = self.load_profile().await;

                info!(handle = %credentials.actor_handle, "Session resumed");
                true
            }
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "Stored session rejected, clearing");
                self.clear_store().await;
                self.transport.switch_endpoint(Endpoint::Public).await;
                *self.credentials.write().await = None;
                *self.profile.write().await = None;
                false
            }
        }
    }

    /// Captures the transport's current (possibly self-renewed) tokens and
    /// re-persists them. Makes no network call.
    ///
    /// Returns whether tokens were captured; false if no session is active.
    /// Persisting them is best effort.
    pub async fn refresh(&self) -> bool {
        if self.credentials.read().await.is_none() {
            return false;
        }

        let session = match self.transport.current_session().await {
            Some(session) => session,
            None => {
                debug!("Transport holds no session, nothing to capture");
                return false;
            }
        };

        let credentials = Credentials::from(session);
        *self.credentials.write().await = Some(credentials.clone());

        if let Err(e) = self.persist(&credentials).await {
            warn!(?e, "Failed to persist renewed credentials");
        }
        debug!(did = %credentials.actor_id, "Captured renewed credentials");
        true
    }

    /// Logs out. Safe to call when already logged out.
    pub async fn logout(&self) {
        let was_authenticated = self.credentials.write().await.take().is_some();
        *self.profile.write().await = None;

        self.clear_store().await;
        self.transport.clear_session().await;
        self.transport.switch_endpoint(Endpoint::Public).await;

        if was_authenticated {
            info!("Logged out");
        }
    }

    // =========================================================================
    // Unauthorized Recovery
    // =========================================================================

    /// The single refresh attempt made after an Unauthorized failure: the
    /// transport renews its tokens, then [`SessionManager::refresh`] captures
    /// them.
    pub async fn recover_unauthorized(&self) -> GatewayResult<()> {
        if !self.is_authenticated().await {
            return Err(GatewayError::not_authenticated("session refresh"));
        }

        if let Err(err) = self.transport.refresh_session().await {
            warn!(error = %err, "Session refresh failed");
            return Err(match err.kind() {
                ErrorKind::Unauthorized => err,
                _ => GatewayError::Remote {
                    kind: ErrorKind::Unauthorized,
                    status: err.status(),
                    code: err.code().map(str::to_string),
                    message: format!("Session refresh failed: {}", err),
                },
            });
        }

        if self.refresh().await {
            Ok(())
        } else {
            Err(GatewayError::not_authenticated("session refresh"))
        }
    }

    /// Runs `op`; on an Unauthorized failure with a live session, refreshes
    /// once and runs `op` once more.
    pub async fn run_with_recovery<T, F, Fut>(&self, op: F) -> GatewayResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        match op().await {
            Err(err) if err.is_unauthorized() && self.is_authenticated().await => {
                debug!(error = %err, "Unauthorized, attempting one session refresh");
                self.recover_unauthorized().await?;
                op().await
            }
            other => other,
        }
    }

    // =========================================================================
    // Remote Calls
    // =========================================================================

    /// Fails fast if the call cannot be made in the current session state.
    pub async fn ensure_access(&self, call: &RemoteCall) -> GatewayResult<()> {
        if self.is_authenticated().await {
            return Ok(());
        }

        if call.requires_session() || !self.platform.allows_public_reads() {
            return Err(GatewayError::not_authenticated(call.name()));
        }

        Ok(())
    }

    /// Sends a call through the retry executor.
    pub async fn execute(&self, call: RemoteCall) -> GatewayResult<RemoteReply> {
        self.ensure_access(&call).await?;
        self.retry
            .run(call.name(), || self.transport.call(call.clone()))
            .await
    }

    /// [`SessionManager::execute`] with one Unauthorized recovery.
    pub async fn execute_with_recovery(&self, call: RemoteCall) -> GatewayResult<RemoteReply> {
        self.run_with_recovery(|| self.execute(call.clone())).await
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub async fn is_authenticated(&self) -> bool {
        self.credentials.read().await.is_some()
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().await.clone()
    }

    /// DID of the logged-in actor.
    pub async fn actor_id(&self) -> Option<String> {
        self.credentials
            .read()
            .await
            .as_ref()
            .map(|credentials| credentials.actor_id.clone())
    }

    /// DID of the logged-in actor, or NotAuthenticated.
    pub async fn require_actor(&self, operation: &str) -> GatewayResult<String> {
        self.actor_id()
            .await
            .ok_or_else(|| GatewayError::not_authenticated(operation))
    }

    pub async fn profile(&self) -> Option<ProfileSummary> {
        self.profile.read().await.clone()
    }

    pub async fn endpoint(&self) -> Endpoint {
        self.transport.endpoint().await
    }

    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn persist(&self, credentials: &Credentials) -> GatewayResult<()> {
        let blob = serde_json::to_string(credentials)?;
        self.store.save(CREDENTIALS_KEY, &blob).await
    }

    /// Loads stored credentials; unreadable or incomplete records are
    /// removed and treated as absent.
    async fn load_credentials(&self) -> Option<Credentials> {
        let blob = match self.store.load(CREDENTIALS_KEY).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("No stored session");
                return None;
            }
            Err(e) => {
                warn!(?e, "Failed to read stored session");
                return None;
            }
        };

        match serde_json::from_str::<Credentials>(&blob) {
            Ok(credentials) if credentials.is_complete() => Some(credentials),
            Ok(_) | Err(_) => {
                warn!("Stored session is unreadable, discarding");
                self.clear_store().await;
                None
            }
        }
    }

    async fn load_profile(&self) -> Option<ProfileSummary> {
        let blob = self.store.load(PROFILE_KEY).await.ok().flatten()?;
        serde_json::from_str(&blob).ok()
    }

    /// Fetches and persists the actor's profile summary. Best effort.
    async fn capture_profile(&self, actor_id: &str) {
        let call = RemoteCall::GetProfile {
            actor: actor_id.to_string(),
        };
        let profile = match self.execute(call).await.and_then(RemoteReply::into_profile) {
            Ok(profile) => ProfileSummary::from(&profile),
            Err(e) => {
                warn!(error = %e, "Could not fetch profile after login");
                return;
            }
        };

        match serde_json::to_string(&profile) {
            Ok(blob) => {
                if let Err(e) = self.store.save(PROFILE_KEY, &blob).await {
                    warn!(?e, "Failed to persist profile summary");
                }
            }
            Err(e) => warn!(?e, "Failed to serialize profile summary"),
        }
        *self.profile.write().await = Some(profile);
    }

    async fn clear_store(&self) {
        for key in [CREDENTIALS_KEY, PROFILE_KEY] {
            if let Err(e) = self.store.remove(key).await {
                warn!(?e, key, "Failed to clear stored session record");
            }
        }
    }
}
