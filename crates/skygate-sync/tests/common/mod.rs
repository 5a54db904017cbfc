//! Shared harness for gateway scenario tests: a scripted in-memory transport
//! and fixture builders.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use skygate_core::{
    Endpoint, FeedItem, FeedPage, HostPlatform, PostRecord, PostView, PostViewerState,
    ProfileBasic, ProfileView, ProfileViewerState, RecordRef, TransportSession,
};
use skygate_sync::{
    Gateway, GatewayConfig, GatewayError, GatewayResult, MemorySessionStore, RemoteCall,
    RemoteReply, Transport,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CREATE_SESSION: &str = "create-session";
pub const RESUME_SESSION: &str = "resume-session";
pub const REFRESH_SESSION: &str = "refresh-session";

type Handler = Arc<dyn Fn(&RemoteCall) -> GatewayResult<RemoteReply> + Send + Sync>;

#[derive(Default)]
struct State {
    endpoint: Option<Endpoint>,
    session: Option<TransportSession>,
    calls: HashMap<String, usize>,
    log: Vec<RemoteCall>,
    handlers: HashMap<String, Handler>,
    queued: HashMap<String, VecDeque<GatewayResult<RemoteReply>>>,
    delays: HashMap<String, Duration>,
    login: Option<GatewayResult<TransportSession>>,
    resume: Option<GatewayResult<TransportSession>>,
    refresh: Option<GatewayResult<TransportSession>>,
}

/// In-memory [`Transport`] that replays scripted replies and counts calls
/// per operation name.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call to `op` is answered by `handler`.
    pub fn handle<F>(&self, op: &str, handler: F)
    where
        F: Fn(&RemoteCall) -> GatewayResult<RemoteReply> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .unwrap()
            .handlers
            .insert(op.to_string(), Arc::new(handler));
    }

    /// Every call to `op` succeeds with `reply`.
    pub fn reply(&self, op: &str, reply: RemoteReply) {
        self.handle(op, move |_| Ok(reply.clone()));
    }

    /// Every call to `op` fails with `err`.
    pub fn fail(&self, op: &str, err: GatewayError) {
        self.handle(op, move |_| Err(err.clone()));
    }

    /// The next call to `op` gets `result`, before any handler.
    pub fn queue(&self, op: &str, result: GatewayResult<RemoteReply>) {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(op.to_string())
            .or_default()
            .push_back(result);
    }

    /// Calls to `op` take this long.
    pub fn delay(&self, op: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(op.to_string(), delay);
    }

    pub fn accept_login(&self, session: TransportSession) {
        self.state.lock().unwrap().login = Some(Ok(session));
    }

    pub fn reject_login(&self, err: GatewayError) {
        self.state.lock().unwrap().login = Some(Err(err));
    }

    /// Result of validating a resumed session. Defaults to accepting it.
    pub fn resume_with(&self, result: GatewayResult<TransportSession>) {
        self.state.lock().unwrap().resume = Some(result);
    }

    /// Result of a token refresh. Defaults to failing.
    pub fn refresh_with(&self, result: GatewayResult<TransportSession>) {
        self.state.lock().unwrap().refresh = Some(result);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.values().sum()
    }

    /// Remote calls in the order they were sent.
    pub fn log(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn held_session(&self) -> Option<TransportSession> {
        self.state.lock().unwrap().session.clone()
    }

    fn count(&self, op: &str) {
        *self
            .state
            .lock()
            .unwrap()
            .calls
            .entry(op.to_string())
            .or_default() += 1;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn switch_endpoint(&self, endpoint: Endpoint) {
        let mut state = self.state.lock().unwrap();
        state.endpoint = Some(endpoint);
        if endpoint == Endpoint::Public {
            state.session = None;
        }
    }

    async fn endpoint(&self) -> Endpoint {
        self.state
            .lock()
            .unwrap()
            .endpoint
            .unwrap_or(Endpoint::Public)
    }

    async fn create_session(
        &self,
        _identifier: &str,
        _secret: &str,
    ) -> GatewayResult<TransportSession> {
        self.count(CREATE_SESSION);
        let mut state = self.state.lock().unwrap();
        let result = state
            .login
            .clone()
            .unwrap_or_else(|| Err(GatewayError::remote(Some(401), None, "Invalid identifier or password")));
        if let Ok(session) = &result {
            state.session = Some(session.clone());
        }
        result
    }

    async fn resume_session(&self, session: TransportSession) -> GatewayResult<TransportSession> {
        self.count(RESUME_SESSION);
        let mut state = self.state.lock().unwrap();
        let result = state.resume.clone().unwrap_or(Ok(session));
        state.session = result.as_ref().ok().cloned();
        result
    }

    async fn current_session(&self) -> Option<TransportSession> {
        self.state.lock().unwrap().session.clone()
    }

    async fn refresh_session(&self) -> GatewayResult<TransportSession> {
        self.count(REFRESH_SESSION);
        let mut state = self.state.lock().unwrap();
        let result = state
            .refresh
            .clone()
            .unwrap_or_else(|| Err(GatewayError::remote(Some(400), Some("ExpiredToken".into()), "Token has expired")));
        if let Ok(session) = &result {
            state.session = Some(session.clone());
        }
        result
    }

    async fn clear_session(&self) {
        self.state.lock().unwrap().session = None;
    }

    async fn call(&self, call: RemoteCall) -> GatewayResult<RemoteReply> {
        let op = call.name();
        self.count(op);

        let delay = {
            let mut state = self.state.lock().unwrap();
            state.log.push(call.clone());
            state.delays.get(op).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(result) = state.queued.get_mut(op).and_then(VecDeque::pop_front) {
            return result;
        }
        match state.handlers.get(op) {
            Some(handler) => handler(&call),
            None => Err(GatewayError::remote(
                Some(501),
                Some("MethodNotImplemented".into()),
                format!("no script for {}", op),
            )),
        }
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn session(did: &str, handle: &str) -> TransportSession {
    TransportSession {
        access_jwt: format!("access-{}", did),
        refresh_jwt: format!("refresh-{}", did),
        handle: handle.to_string(),
        did: did.to_string(),
        email: None,
        email_confirmed: None,
        email_auth_factor: None,
        active: true,
    }
}

/// A post indexed `minutes_ago` before [`base_time`].
pub fn post(uri: &str, minutes_ago: i64) -> PostView {
    let at = base_time() - ChronoDuration::minutes(minutes_ago);
    PostView {
        uri: uri.to_string(),
        cid: format!("cid-{}", uri.rsplit('/').next().unwrap_or("x")),
        author: ProfileBasic {
            did: "did:plc:author".to_string(),
            handle: "author.test".to_string(),
            display_name: None,
            avatar: None,
        },
        record: PostRecord {
            text: "hello".to_string(),
            created_at: at,
            reply: None,
        },
        reply_count: 0,
        repost_count: 0,
        like_count: 0,
        indexed_at: at,
        viewer: PostViewerState::default(),
    }
}

pub fn post_uri(rkey: &str) -> String {
    format!("at://did:plc:author/app.bsky.feed.post/{}", rkey)
}

pub fn page(posts: Vec<PostView>, cursor: Option<&str>) -> FeedPage {
    FeedPage {
        cursor: cursor.map(str::to_string),
        feed: posts
            .into_iter()
            .map(|post| FeedItem { post, reason: None })
            .collect(),
    }
}

pub fn profile(did: &str, handle: &str) -> ProfileView {
    ProfileView {
        did: did.to_string(),
        handle: handle.to_string(),
        display_name: Some("Test".to_string()),
        description: None,
        avatar: None,
        followers_count: 10,
        follows_count: 5,
        posts_count: 3,
        viewer: ProfileViewerState::default(),
    }
}

pub fn record(uri: &str) -> RemoteReply {
    RemoteReply::Record(RecordRef {
        uri: uri.to_string(),
        cid: "bafyrecord".to_string(),
    })
}

pub fn unavailable() -> GatewayError {
    GatewayError::remote(Some(503), None, "Service Unavailable")
}

/// Test configuration: small, deterministic fallback lists and no jitter.
pub fn config(platform: HostPlatform) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.service.platform = platform;
    config.retry.max_jitter_ms = 0;
    config.feeds.public_sources = vec![
        "at://did:plc:feeds/app.bsky.feed.generator/one".to_string(),
        "at://did:plc:feeds/app.bsky.feed.generator/two".to_string(),
    ];
    config.feeds.fallback_accounts = vec!["alice.test".to_string(), "bob.test".to_string()];
    config
}

pub struct Harness {
    pub gateway: Gateway,
    pub transport: Arc<ScriptedTransport>,
    pub store: Arc<MemorySessionStore>,
}

pub fn harness(platform: HostPlatform) -> Harness {
    harness_with(config(platform), Arc::new(MemorySessionStore::new()))
}

pub fn harness_with(config: GatewayConfig, store: Arc<MemorySessionStore>) -> Harness {
    let transport = ScriptedTransport::new();
    let gateway = Gateway::new(config, transport.clone(), store.clone());
    Harness {
        gateway,
        transport,
        store,
    }
}

/// Harness already logged in as `did:plc:me`.
pub async fn logged_in(platform: HostPlatform) -> Harness {
    let harness = harness(platform);
    harness
        .transport
        .accept_login(session("did:plc:me", "me.test"));
    harness
        .transport
        .reply("get-profile", RemoteReply::Profile(profile("did:plc:me", "me.test")));
    let outcome = harness.gateway.login("me.test", "app-password").await;
    assert!(outcome.is_success(), "login failed: {:?}", outcome);
    harness
}
