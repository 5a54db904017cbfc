//! # XRPC Transport
//!
//! Session-aware HTTP client for the remote protocol.
//!
//! ## Endpoint & Session State
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Transport Endpoint States                            │
//! │                                                                         │
//! │  ┌────────────┐  switch_endpoint(Authenticated)  ┌───────────────┐      │
//! │  │   Public   │ ───────────────────────────────► │ Authenticated │      │
//! │  │ no session │ ◄─────────────────────────────── │ session?      │      │
//! │  └────────────┘  switch_endpoint(Public)         └───────┬───────┘      │
//! │                  (session discarded)                     │              │
//! │                                                          │              │
//! │                          create_session / resume_session │              │
//! │                                                          ▼              │
//! │                                                  ┌───────────────┐      │
//! │                                                  │ session held  │      │
//! │                                                  │ bearer token  │      │
//! │                                                  └───────┬───────┘      │
//! │                                                          │              │
//! │  SELF-RENEWAL                       ExpiredToken on call │              │
//! │  ────────────                                            ▼              │
//! │  refreshSession(refreshJwt) → new tokens held → call re-sent once      │
//! │  The Session Manager later captures the renewed tokens (refresh()).    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};
use skygate_core::{Endpoint, TransportSession};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{RemoteCall, RemoteReply};

const CREATE_SESSION: &str = "com.atproto.server.createSession";
const GET_SESSION: &str = "com.atproto.server.getSession";
const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";

// =============================================================================
// Transport Trait
// =============================================================================

/// The remote side of the gateway.
///
/// Exactly one endpoint is active at a time. The transport holds the live
/// session tokens and may renew them on its own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Activates an endpoint. Moving to `Public` discards the session.
    async fn switch_endpoint(&self, endpoint: Endpoint);

    /// The endpoint currently in use.
    async fn endpoint(&self) -> Endpoint;

    /// Logs in and holds the new session.
    async fn create_session(&self, identifier: &str, secret: &str)
        -> GatewayResult<TransportSession>;

    /// Installs a persisted session and validates it remotely.
    ///
    /// On failure the session is dropped again.
    async fn resume_session(&self, session: TransportSession) -> GatewayResult<TransportSession>;

    /// The session as currently held, including self-renewed tokens.
    async fn current_session(&self) -> Option<TransportSession>;

    /// Renews the held tokens through the refresh procedure.
    async fn refresh_session(&self) -> GatewayResult<TransportSession>;

    /// Drops the held session without any network call.
    async fn clear_session(&self);

    /// Sends one remote call.
    async fn call(&self, call: RemoteCall) -> GatewayResult<RemoteReply>;
}

// =============================================================================
// XRPC over HTTP
// =============================================================================

struct TransportState {
    endpoint: Endpoint,
    session: Option<TransportSession>,
}

/// [`Transport`] over HTTP using `reqwest`.
pub struct XrpcTransport {
    http: reqwest::Client,
    authenticated_url: Url,
    public_url: Url,
    state: RwLock<TransportState>,
    /// Serializes token renewal so concurrent expirations refresh once.
    refresh_lock: Mutex<()>,
}

impl XrpcTransport {
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("skygate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(XrpcTransport {
            http,
            authenticated_url: Url::parse(&config.service.authenticated_url)?,
            public_url: Url::parse(&config.service.public_url)?,
            state: RwLock::new(TransportState {
                endpoint: Endpoint::Public,
                session: None,
            }),
            refresh_lock: Mutex::new(()),
        })
    }

    fn base_url(&self, endpoint: Endpoint) -> &Url {
        match endpoint {
            Endpoint::Authenticated => &self.authenticated_url,
            Endpoint::Public => &self.public_url,
        }
    }

    fn xrpc_url(&self, endpoint: Endpoint, nsid: &str) -> GatewayResult<Url> {
        Ok(self.base_url(endpoint).join(&format!("xrpc/{}", nsid))?)
    }

    /// Sends a request and returns the decoded JSON body.
    async fn execute(&self, request: RequestBuilder) -> GatewayResult<Value> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_body(status.as_u16(), &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Protocol(e.to_string()))
    }

    /// Builds the HTTP request for a remote call.
    fn build_request(
        &self,
        endpoint: Endpoint,
        call: &RemoteCall,
        token: Option<&str>,
    ) -> GatewayResult<RequestBuilder> {
        let url = self.xrpc_url(endpoint, call.nsid())?;

        let mut request = if call.is_query() {
            self.http.get(url).query(&call.query_params())
        } else if let RemoteCall::UploadBlob { mime_type, data } = call {
            self.http
                .post(url)
                .header(CONTENT_TYPE, mime_type.as_str())
                .body(data.clone())
        } else {
            let request = self.http.request(Method::POST, url);
            match call.json_body() {
                Some(body) => request.json(&body),
                None => request,
            }
        };

        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        Ok(request)
    }

    async fn send_call(&self, call: &RemoteCall) -> GatewayResult<Value> {
        let (endpoint, token) = {
            let state = self.state.read().await;
            let token = match state.endpoint {
                Endpoint::Authenticated => {
                    state.session.as_ref().map(|session| session.access_jwt.clone())
                }
                Endpoint::Public => None,
            };
            (state.endpoint, token)
        };

        if call.requires_session() && token.is_none() {
            return Err(GatewayError::not_authenticated(call.name()));
        }

        debug!(op = call.name(), %endpoint, "Sending remote call");
        let request = self.build_request(endpoint, call, token.as_deref())?;
        self.execute(request).await
    }

    async fn get_session(&self, access_jwt: &str) -> GatewayResult<Value> {
        let url = self.xrpc_url(Endpoint::Authenticated, GET_SESSION)?;
        self.execute(self.http.get(url).bearer_auth(access_jwt)).await
    }
}

#[async_trait]
impl Transport for XrpcTransport {
    async fn switch_endpoint(&self, endpoint: Endpoint) {
        let mut state = self.state.write().await;
        if state.endpoint != endpoint {
            info!(from = %state.endpoint, to = %endpoint, "Switching transport endpoint");
        }
        state.endpoint = endpoint;
        if endpoint == Endpoint::Public {
            state.session = None;
        }
    }

    async fn endpoint(&self) -> Endpoint {
        self.state.read().await.endpoint
    }

    async fn create_session(
        &self,
        identifier: &str,
        secret: &str,
    ) -> GatewayResult<TransportSession> {
        let url = self.xrpc_url(Endpoint::Authenticated, CREATE_SESSION)?;
        let body = self
            .execute(self.http.post(url).json(&json!({
                "identifier": identifier,
                "password": secret,
            })))
            .await?;

        let session: TransportSession =
            serde_json::from_value(body).map_err(|e| GatewayError::Protocol(e.to_string()))?;

        self.state.write().await.session = Some(session.clone());
        debug!(did = %session.did, "Session created");
        Ok(session)
    }

    async fn resume_session(&self, session: TransportSession) -> GatewayResult<TransportSession> {
        self.state.write().await.session = Some(session.clone());

        let validated = match self.get_session(&session.access_jwt).await {
            Err(err) if err.code() == Some("ExpiredToken") => {
                debug!("Stored access token expired, renewing before validation");
                match self.refresh_session().await {
                    Ok(renewed) => self.get_session(&renewed.access_jwt).await,
                    Err(refresh_err) => Err(refresh_err),
                }
            }
            other => other,
        };

        match validated {
            Ok(body) => {
                let mut state = self.state.write().await;
                let current = state.session.get_or_insert(session);
                if let Some(handle) = body.get("handle").and_then(Value::as_str) {
                    current.handle = handle.to_string();
                }
                if let Some(email) = body.get("email").and_then(Value::as_str) {
                    current.email = Some(email.to_string());
                }
                if let Some(active) = body.get("active").and_then(Value::as_bool) {
                    current.active = active;
                }
                Ok(current.clone())
            }
            Err(err) => {
                self.state.write().await.session = None;
                Err(err)
            }
        }
    }

    async fn current_session(&self) -> Option<TransportSession> {
        self.state.read().await.session.clone()
    }

    async fn refresh_session(&self) -> GatewayResult<TransportSession> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_jwt = self
            .state
            .read()
            .await
            .session
            .as_ref()
            .map(|session| session.refresh_jwt.clone())
            .ok_or_else(|| GatewayError::not_authenticated("refresh-session"))?;

        let url = self.xrpc_url(Endpoint::Authenticated, REFRESH_SESSION)?;
        let body = self.execute(self.http.post(url).bearer_auth(&refresh_jwt)).await?;
        let renewed: TransportSession =
            serde_json::from_value(body).map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let mut state = self.state.write().await;
        // A logout may have raced the refresh; do not resurrect the session.
        if state.session.is_none() {
            return Err(GatewayError::not_authenticated("refresh-session"));
        }
        state.session = Some(renewed.clone());
        info!(did = %renewed.did, "Transport renewed session tokens");
        Ok(renewed)
    }

    async fn clear_session(&self) {
        self.state.write().await.session = None;
    }

    async fn call(&self, call: RemoteCall) -> GatewayResult<RemoteReply> {
        let body = match self.send_call(&call).await {
            Err(err) if err.code() == Some("ExpiredToken") => {
                warn!(op = call.name(), "Access token expired, renewing once");
                self.refresh_session().await.map_err(|_| err)?;
                self.send_call(&call).await?
            }
            other => other?,
        };

        call.decode_reply(body)
    }
}

/// Builds the error for a non-success response from its XRPC error body
/// (`{"error": "<code>", "message": "<text>"}`).
pub fn error_from_body(status: u16, body: &str) -> GatewayError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|value| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = parsed
        .as_ref()
        .and_then(|value| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| code.clone())
        .unwrap_or_else(|| format!("Request failed with status {}", status));

    GatewayError::remote(Some(status), code, message)
}
