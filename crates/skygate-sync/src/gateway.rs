//! # Gateway Service
//!
//! The one long-lived service instance. Built once at process start and
//! passed explicitly to whoever needs it.
//!
//! ## Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             Gateway                                     │
//! │                                                                         │
//! │   reads ──► QueryCache ──► FeedResolver ─┐                              │
//! │                  │                        ├──► SessionManager           │
//! │                  └──► remote fetchers ────┘        │                    │
//! │                                                    ├─► RetryExecutor    │
//! │   writes ─► MutationEngine ─► QueryCache patches   │     └─► Transport  │
//! │                 └────────────────────────────────► ┘                    │
//! │                                                    └─► SessionStore     │
//! │                                                                         │
//! │   Every public operation returns Outcome<T>.                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::FutureExt;
use skygate_core::validation::{
    validate_actor, validate_at_uri, validate_limit, validate_search_query,
};
use skygate_core::{
    BlobRef, Credentials, FeedDescriptor, FeedPage, NewPost, ProfileSummary, ProfileView,
    RecordRef, ThreadView,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{QueryCache, QueryData, QueryFetcher, QueryKey};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::feed::FeedResolver;
use crate::mutation::{MutationEngine, PendingMutation, ToggleOutcome};
use crate::outcome::Outcome;
use crate::protocol::{ActorPage, GeneratorPage, PostPage, RemoteCall, RemoteReply};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::session::SessionManager;
use crate::store::{FileSessionStore, SessionStore};
use crate::transport::{Transport, XrpcTransport};

pub struct Gateway {
    config: GatewayConfig,
    session: Arc<SessionManager>,
    resolver: Arc<FeedResolver>,
    cache: QueryCache,
    mutations: MutationEngine,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        let retry = RetryExecutor::new(RetryPolicy::from_settings(&config.retry));
        let session = Arc::new(SessionManager::new(
            transport,
            store,
            retry,
            config.platform(),
        ));
        let resolver = Arc::new(FeedResolver::new(session.clone(), config.feeds.clone()));
        let cache = QueryCache::from_settings(&config.cache);
        let mutations = MutationEngine::new(session.clone(), cache.clone());

        Gateway {
            config,
            session,
            resolver,
            cache,
            mutations,
        }
    }

    /// Builds a gateway over HTTP with a file-backed session store.
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;

        let transport = XrpcTransport::new(&config)?;
        let dir = config.store_dir().ok_or_else(|| {
            GatewayError::InvalidConfig("no directory available for the session store".into())
        })?;

        info!(
            service = %config.service.authenticated_url,
            platform = %config.platform(),
            store = ?dir,
            "Gateway configured"
        );

        Ok(Gateway::new(
            config,
            Arc::new(transport),
            Arc::new(FileSessionStore::new(dir)),
        ))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Starts periodic cache eviction.
    pub fn start_gc(&self) -> JoinHandle<()> {
        self.cache.spawn_gc(self.config.cache.gc_interval())
    }

    // =========================================================================
    // Session
    // =========================================================================

    pub async fn login(&self, identifier: &str, secret: &str) -> Outcome<Credentials> {
        let was_authenticated = self.session.is_authenticated().await;
        let result = self.session.login(identifier, secret).await;
        if result.is_ok() || was_authenticated {
            // Cached entries carry viewer state of the previous identity.
            self.cache.clear().await;
        }
        result.into()
    }

    pub async fn resume(&self) -> bool {
        self.session.resume_from_store().await
    }

    pub async fn logout(&self) -> Outcome<()> {
        self.session.logout().await;
        self.cache.clear().await;
        Outcome::Success(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session.is_authenticated().await
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.session.credentials().await
    }

    pub async fn profile_summary(&self) -> Option<ProfileSummary> {
        self.session.profile().await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// One page of a feed. `descriptor` uses the pipe grammar; `None` is the
    /// default feed.
    pub async fn feed(
        &self,
        descriptor: Option<&str>,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Outcome<FeedPage> {
        self.load_feed(descriptor, limit, cursor).await.into()
    }

    async fn load_feed(
        &self,
        descriptor: Option<&str>,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> GatewayResult<FeedPage> {
        let descriptor = FeedDescriptor::parse_or_default(descriptor)?;
        let limit = limit.unwrap_or(self.config.feeds.default_limit);
        validate_limit(limit)?;

        let key = QueryKey::feed(&descriptor, limit, cursor);
        let resolver = self.resolver.clone();
        let cursor = cursor.map(str::to_string);
        let fetcher: QueryFetcher = Arc::new(move || {
            let resolver = resolver.clone();
            let descriptor = descriptor.clone();
            let cursor = cursor.clone();
            async move {
                resolver
                    .resolve(&descriptor, limit, cursor.as_deref())
                    .await
                    .map(QueryData::Feed)
            }
            .boxed()
        });

        self.cache.get(key, fetcher).await?.into_feed()
    }

    pub async fn profile(&self, actor: &str) -> Outcome<ProfileView> {
        let result = async {
            let actor = validate_actor(actor)?;
            let key = QueryKey::profile(&actor);
            let call = RemoteCall::GetProfile { actor };
            self.read(key, call, |reply| reply.into_profile().map(QueryData::Profile))
                .await?
                .into_profile()
        };
        result.await.into()
    }

    pub async fn thread(&self, uri: &str) -> Outcome<ThreadView> {
        let result = async {
            let uri = validate_at_uri(uri)?.to_string();
            let key = QueryKey::thread(&uri);
            let call = RemoteCall::GetPostThread { uri, depth: None };
            self.read(key, call, |reply| reply.into_thread().map(QueryData::Thread))
                .await?
                .into_thread()
        };
        result.await.into()
    }

    pub async fn search_actors(&self, query: &str) -> Outcome<ActorPage> {
        let result = async {
            let query = validate_search_query(query)?;
            let key = QueryKey::search_actors(&query);
            let call = RemoteCall::SearchActors {
                query,
                limit: self.config.feeds.default_limit,
                cursor: None,
            };
            self.read(key, call, |reply| reply.into_actors().map(QueryData::Actors))
                .await?
                .into_actors()
        };
        result.await.into()
    }

    pub async fn search_posts(&self, query: &str) -> Outcome<PostPage> {
        let result = async {
            let query = validate_search_query(query)?;
            let key = QueryKey::search_posts(&query);
            let call = RemoteCall::SearchPosts {
                query,
                limit: self.config.feeds.default_limit,
                cursor: None,
            };
            self.read(key, call, |reply| reply.into_posts().map(QueryData::Posts))
                .await?
                .into_posts()
        };
        result.await.into()
    }

    /// Suggested accounts to follow. Needs a session.
    pub async fn suggestions(&self) -> Outcome<ActorPage> {
        let call = RemoteCall::GetSuggestions {
            limit: self.config.feeds.default_limit,
            cursor: None,
        };
        let result = self
            .read(QueryKey::suggestions(), call, |reply| {
                reply.into_actors().map(QueryData::Actors)
            })
            .await
            .and_then(QueryData::into_actors);
        result.into()
    }

    pub async fn popular_feeds(&self) -> Outcome<GeneratorPage> {
        let call = RemoteCall::GetPopularFeedGenerators {
            limit: self.config.feeds.default_limit,
            cursor: None,
        };
        let result = self
            .read(QueryKey::popular_feeds(), call, |reply| {
                reply.into_generators().map(QueryData::Generators)
            })
            .await
            .and_then(QueryData::into_generators);
        result.into()
    }

    /// Cached read of a single remote call.
    async fn read(
        &self,
        key: QueryKey,
        call: RemoteCall,
        wrap: fn(RemoteReply) -> GatewayResult<QueryData>,
    ) -> GatewayResult<QueryData> {
        let session = self.session.clone();
        let fetcher: QueryFetcher = Arc::new(move || {
            let session = session.clone();
            let call = call.clone();
            async move { session.execute_with_recovery(call).await.and_then(wrap) }.boxed()
        });

        self.cache.get(key, fetcher).await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub async fn toggle_like(&self, uri: &str, cid: &str) -> Outcome<ToggleOutcome> {
        let subject = RecordRef {
            uri: uri.to_string(),
            cid: cid.to_string(),
        };
        self.mutations.toggle_like(subject).await.into()
    }

    pub async fn toggle_repost(&self, uri: &str, cid: &str) -> Outcome<ToggleOutcome> {
        let subject = RecordRef {
            uri: uri.to_string(),
            cid: cid.to_string(),
        };
        self.mutations.toggle_repost(subject).await.into()
    }

    pub async fn toggle_follow(&self, did: &str) -> Outcome<ToggleOutcome> {
        self.mutations.toggle_follow(did).await.into()
    }

    pub async fn create_post(&self, post: NewPost) -> Outcome<RecordRef> {
        self.mutations.create_post(post).await.into()
    }

    pub async fn delete_post(&self, uri: &str) -> Outcome<()> {
        self.mutations.delete_post(uri).await.into()
    }

    pub async fn upload_blob(&self, mime_type: &str, data: Vec<u8>) -> Outcome<BlobRef> {
        self.mutations.upload_blob(mime_type, data).await.into()
    }

    /// Mutations whose remote write has not finished.
    pub async fn pending_mutations(&self) -> Vec<PendingMutation> {
        self.mutations.pending().await
    }

    /// Recently finished mutations, newest first.
    pub async fn recent_mutations(&self) -> Vec<PendingMutation> {
        self.mutations.recent().await
    }
}
