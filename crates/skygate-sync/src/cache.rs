//! # Query Cache
//!
//! Keyed, time-bounded cache of query results with request coalescing and
//! stale-while-revalidate reads.
//!
//! ## Read Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        QueryCache::get(key)                             │
//! │                                                                         │
//! │  entry fresh ─────────────────────────────────────► return cached      │
//! │                                                                         │
//! │  entry stale / invalidated ──► return cached now                        │
//! │                                └─ background refetch (unless one is    │
//! │                                   already in flight for this key)      │
//! │                                                                         │
//! │  no entry ──► join the in-flight fetch, or start one, and wait          │
//! │                                                                         │
//! │  Every fetch takes a sequence number when it starts. Its result is     │
//! │  written only if no newer fetch or patch has touched the key since.    │
//! │  Entries older than the retain window are dropped by GC.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use skygate_core::{FeedDescriptor, FeedPage, Patch, Patchable, PostView, ProfileView, ThreadView};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{ActorPage, GeneratorPage, PostPage};

// =============================================================================
// Keys & Data
// =============================================================================

/// Identity under which a query result and its staleness are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn feed(descriptor: &FeedDescriptor, limit: u32, cursor: Option<&str>) -> Self {
        QueryKey(format!(
            "feed:{}:{}:{}",
            descriptor.cache_key(),
            limit,
            cursor.unwrap_or_default()
        ))
    }

    pub fn profile(actor: &str) -> Self {
        QueryKey(format!("profile:{}", actor))
    }

    pub fn thread(uri: &str) -> Self {
        QueryKey(format!("thread:{}", uri))
    }

    pub fn search_actors(query: &str) -> Self {
        QueryKey(format!("search-actors:{}", query))
    }

    pub fn search_posts(query: &str) -> Self {
        QueryKey(format!("search-posts:{}", query))
    }

    pub fn suggestions() -> Self {
        QueryKey("suggestions".to_string())
    }

    pub fn popular_feeds() -> Self {
        QueryKey("popular-feeds".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_feed(&self) -> bool {
        self.0.starts_with("feed:")
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum QueryData {
    Feed(FeedPage),
    Thread(ThreadView),
    Profile(ProfileView),
    Actors(ActorPage),
    Posts(PostPage),
    Generators(GeneratorPage),
}

impl QueryData {
    pub fn name(&self) -> &'static str {
        match self {
            QueryData::Feed(_) => "feed",
            QueryData::Thread(_) => "thread",
            QueryData::Profile(_) => "profile",
            QueryData::Actors(_) => "actors",
            QueryData::Posts(_) => "posts",
            QueryData::Generators(_) => "generators",
        }
    }

    fn mismatch(&self, expected: &'static str) -> GatewayError {
        GatewayError::UnexpectedReply {
            expected,
            actual: self.name(),
        }
    }

    pub fn into_feed(self) -> GatewayResult<FeedPage> {
        match self {
            QueryData::Feed(page) => Ok(page),
            other => Err(other.mismatch("feed")),
        }
    }

    pub fn into_thread(self) -> GatewayResult<ThreadView> {
        match self {
            QueryData::Thread(thread) => Ok(thread),
            other => Err(other.mismatch("thread")),
        }
    }

    pub fn into_profile(self) -> GatewayResult<ProfileView> {
        match self {
            QueryData::Profile(profile) => Ok(profile),
            other => Err(other.mismatch("profile")),
        }
    }

    pub fn into_actors(self) -> GatewayResult<ActorPage> {
        match self {
            QueryData::Actors(page) => Ok(page),
            other => Err(other.mismatch("actors")),
        }
    }

    pub fn into_posts(self) -> GatewayResult<PostPage> {
        match self {
            QueryData::Posts(page) => Ok(page),
            other => Err(other.mismatch("posts")),
        }
    }

    pub fn into_generators(self) -> GatewayResult<GeneratorPage> {
        match self {
            QueryData::Generators(page) => Ok(page),
            other => Err(other.mismatch("generators")),
        }
    }

    /// First post with this URI anywhere in the result.
    pub fn find_post(&self, uri: &str) -> Option<&PostView> {
        match self {
            QueryData::Feed(page) => page
                .feed
                .iter()
                .map(|item| &item.post)
                .find(|post| post.uri == uri),
            QueryData::Thread(thread) => find_in_thread(thread, uri),
            QueryData::Posts(page) => page.posts.iter().find(|post| post.uri == uri),
            _ => None,
        }
    }

    /// First profile with this DID anywhere in the result.
    pub fn find_profile(&self, did: &str) -> Option<&ProfileView> {
        match self {
            QueryData::Profile(profile) if profile.did == did => Some(profile),
            QueryData::Actors(page) => page.actors.iter().find(|actor| actor.did == did),
            _ => None,
        }
    }
}

impl Patchable for QueryData {
    fn apply_patch(&mut self, patch: &Patch) -> bool {
        match self {
            QueryData::Feed(page) => page.apply_patch(patch),
            QueryData::Thread(thread) => thread.apply_patch(patch),
            QueryData::Profile(profile) => profile.apply_patch(patch),
            QueryData::Actors(page) => page.actors.apply_patch(patch),
            QueryData::Posts(page) => page.posts.apply_patch(patch),
            QueryData::Generators(_) => false,
        }
    }
}

fn find_in_thread<'a>(thread: &'a ThreadView, uri: &str) -> Option<&'a PostView> {
    if thread.post.uri == uri {
        return Some(&thread.post);
    }
    thread
        .parent
        .as_deref()
        .and_then(|parent| find_in_thread(parent, uri))
        .or_else(|| thread.replies.iter().find_map(|reply| find_in_thread(reply, uri)))
}

// =============================================================================
// Cache State
// =============================================================================

/// Produces a fresh fetch for one key. Stored with the key so stale reads
/// and explicit refetches can run it again.
pub type QueryFetcher = Arc<dyn Fn() -> BoxFuture<'static, GatewayResult<QueryData>> + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, GatewayResult<QueryData>>>;

struct Entry {
    data: QueryData,
    fetched_at: Instant,
    invalidated: bool,
}

struct Inflight {
    seq: u64,
    fetch: SharedFetch,
}

struct Slot {
    entry: Option<Entry>,
    fetcher: QueryFetcher,
    inflight: Option<Inflight>,
    /// Sequence number of the newest fetch or patch for this key.
    latest: u64,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<QueryKey, Slot>,
    next_seq: u64,
}

impl CacheState {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

struct CacheInner {
    state: Mutex<CacheState>,
    fresh: Duration,
    retain: Duration,
}

// =============================================================================
// Query Cache
// =============================================================================

/// Shared handle to the query cache. Cloning is cheap.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(fresh: Duration, retain: Duration) -> Self {
        QueryCache {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                fresh,
                retain,
            }),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.fresh(), settings.retain())
    }

    /// Reads a key, fetching with `fetcher` when there is nothing usable.
    pub async fn get(&self, key: QueryKey, fetcher: QueryFetcher) -> GatewayResult<QueryData> {
        let fetch = {
            let mut state = self.inner.state.lock().await;
            let slot = state.slots.entry(key.clone()).or_insert_with(|| Slot {
                entry: None,
                fetcher: fetcher.clone(),
                inflight: None,
                latest: 0,
            });
            slot.fetcher = fetcher;

            if let Some(entry) = &slot.entry {
                let data = entry.data.clone();

                if !entry.invalidated && entry.fetched_at.elapsed() < self.inner.fresh {
                    debug!(key = %key, "Cache hit");
                    return Ok(data);
                }

                debug!(key = %key, invalidated = entry.invalidated, "Serving stale entry, revalidating");
                if slot.inflight.is_none() {
                    let fetch = self.start_fetch(&mut state, &key);
                    tokio::spawn(fetch);
                }
                return Ok(data);
            }

            match &slot.inflight {
                Some(inflight) => {
                    debug!(key = %key, "Joining in-flight fetch");
                    inflight.fetch.clone()
                }
                None => {
                    debug!(key = %key, "Cache miss");
                    self.start_fetch(&mut state, &key)
                }
            }
        };

        fetch.await
    }

    /// Starts a fetch that supersedes any in flight for this key, and waits
    /// for it. Returns `None` if the key was never read.
    pub async fn refetch(&self, key: &QueryKey) -> Option<GatewayResult<QueryData>> {
        let fetch = {
            let mut state = self.inner.state.lock().await;
            if !state.slots.contains_key(key) {
                return None;
            }
            debug!(key = %key, "Explicit refetch");
            self.start_fetch(&mut state, key)
        };

        Some(fetch.await)
    }

    fn start_fetch(&self, state: &mut CacheState, key: &QueryKey) -> SharedFetch {
        let seq = state.bump();
        let Some(slot) = state.slots.get_mut(key) else {
            // Callers only start fetches for registered keys.
            return futures_util::future::ready(Err(GatewayError::Internal(format!(
                "no query registered for {}",
                key
            ))))
            .boxed()
            .shared();
        };

        let request = (slot.fetcher)();
        let inner = self.inner.clone();
        let key = key.clone();

        let fetch = async move {
            let result = request.await;
            inner.complete(&key, seq, &result).await;
            result
        }
        .boxed()
        .shared();

        slot.latest = seq;
        slot.inflight = Some(Inflight {
            seq,
            fetch: fetch.clone(),
        });
        fetch
    }

    // =========================================================================
    // Patches & Invalidation
    // =========================================================================

    /// Applies a patch to every cached entry containing its target.
    ///
    /// Fetches already in flight for the touched keys are superseded: their
    /// results still reach their waiters but are not written back.
    /// Returns the touched keys.
    pub async fn apply_patch(&self, patch: &Patch) -> Vec<QueryKey> {
        let mut state = self.inner.state.lock().await;
        let CacheState { slots, next_seq } = &mut *state;

        let mut touched = Vec::new();
        for (key, slot) in slots.iter_mut() {
            let Some(entry) = slot.entry.as_mut() else {
                continue;
            };
            if !entry.data.apply_patch(patch) {
                continue;
            }
            if slot.inflight.is_some() {
                *next_seq += 1;
                slot.latest = *next_seq;
            }
            touched.push(key.clone());
        }

        debug!(target = patch.target(), entries = touched.len(), "Patch applied");
        touched
    }

    /// Marks an entry so the next read refetches it. Returns false if there
    /// was no entry.
    pub async fn invalidate(&self, key: &QueryKey) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.slots.get_mut(key).and_then(|slot| slot.entry.as_mut()) {
            Some(entry) => {
                entry.invalidated = true;
                true
            }
            None => false,
        }
    }

    /// Invalidates every entry whose key matches. Returns how many.
    pub async fn invalidate_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&QueryKey) -> bool,
    {
        let mut state = self.inner.state.lock().await;
        let mut count = 0;
        for (key, slot) in state.slots.iter_mut() {
            if let Some(entry) = slot.entry.as_mut() {
                if predicate(key) {
                    entry.invalidated = true;
                    count += 1;
                }
            }
        }
        debug!(count, "Entries invalidated");
        count
    }

    /// Current data for a key, fresh or not, without fetching.
    pub async fn peek(&self, key: &QueryKey) -> Option<QueryData> {
        let state = self.inner.state.lock().await;
        state
            .slots
            .get(key)
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| entry.data.clone())
    }

    /// The cached copy of a post, as currently observed.
    pub async fn find_post(&self, uri: &str) -> Option<PostView> {
        let state = self.inner.state.lock().await;
        state
            .slots
            .values()
            .filter_map(|slot| slot.entry.as_ref())
            .find_map(|entry| entry.data.find_post(uri).cloned())
    }

    /// The cached copy of a profile, as currently observed.
    pub async fn find_profile(&self, did: &str) -> Option<ProfileView> {
        let state = self.inner.state.lock().await;
        state
            .slots
            .values()
            .filter_map(|slot| slot.entry.as_ref())
            .find_map(|entry| entry.data.find_profile(did).cloned())
    }

    /// Number of keys with cached data.
    pub async fn len(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.slots.values().filter(|slot| slot.entry.is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops everything. In-flight fetches finish but are not written.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        let dropped = state.slots.len();
        state.slots.clear();
        debug!(dropped, "Cache cleared");
    }

    // =========================================================================
    // Garbage Collection
    // =========================================================================

    /// Drops entries older than the retain window, and keys left with no
    /// data after a failed first fetch. Returns how many keys were dropped.
    pub async fn collect_garbage(&self) -> usize {
        let retain = self.inner.retain;
        let mut state = self.inner.state.lock().await;
        let before = state.slots.len();

        state.slots.retain(|_, slot| {
            if slot.inflight.is_some() {
                return true;
            }
            match &slot.entry {
                Some(entry) => entry.fetched_at.elapsed() < retain,
                None => false,
            }
        });

        let evicted = before - state.slots.len();
        if evicted > 0 {
            debug!(evicted, "Cache entries evicted");
        }
        evicted
    }

    /// Runs [`QueryCache::collect_garbage`] every `interval` until the
    /// returned handle is aborted.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.collect_garbage().await;
            }
        })
    }
}

impl CacheInner {
    /// Records the result of fetch `seq` for `key`.
    async fn complete(&self, key: &QueryKey, seq: u64, result: &GatewayResult<QueryData>) {
        let mut state = self.state.lock().await;
        let Some(slot) = state.slots.get_mut(key) else {
            return;
        };

        if slot.inflight.as_ref().map(|inflight| inflight.seq) == Some(seq) {
            slot.inflight = None;
        }

        match result {
            Ok(data) if slot.latest == seq => {
                slot.entry = Some(Entry {
                    data: data.clone(),
                    fetched_at: Instant::now(),
                    invalidated: false,
                });
            }
            Ok(_) => debug!(key = %key, seq, "Discarding superseded fetch result"),
            Err(err) => warn!(key = %key, kind = %err.kind(), error = %err, "Query fetch failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skygate_core::{ProfileViewerState, ViewerField};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn profile(did: &str, followers: i64) -> ProfileView {
        ProfileView {
            did: did.to_string(),
            handle: "alice.test".to_string(),
            display_name: None,
            description: None,
            avatar: None,
            followers_count: followers,
            follows_count: 0,
            posts_count: 0,
            viewer: ProfileViewerState::default(),
        }
    }

    fn counting_fetcher(calls: Arc<AtomicU32>, delay: Duration) -> QueryFetcher {
        Arc::new(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) as i64;
                tokio::time::sleep(delay).await;
                Ok::<_, GatewayError>(QueryData::Profile(profile("did:plc:alice", n)))
            }
            .boxed()
        })
    }

    fn cache() -> QueryCache {
        QueryCache::new(Duration::from_secs(30), Duration::from_secs(300))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_fetch() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = counting_fetcher(calls.clone(), Duration::from_millis(100));
        let key = QueryKey::profile("did:plc:alice");

        let (a, b, c) = tokio::join!(
            cache.get(key.clone(), fetcher.clone()),
            cache.get(key.clone(), fetcher.clone()),
            cache.get(key.clone(), fetcher.clone()),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), b.clone().unwrap());
        assert_eq!(b.unwrap(), c.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_while_revalidating() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = counting_fetcher(calls.clone(), Duration::from_millis(10));
        let key = QueryKey::profile("did:plc:alice");

        let first = cache.get(key.clone(), fetcher.clone()).await.unwrap();
        assert_eq!(first.clone().into_profile().unwrap().followers_count, 0);

        // Still fresh: no new fetch.
        cache.get(key.clone(), fetcher.clone()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;

        // Stale: old data now, refetch in the background.
        let stale = cache.get(key.clone(), fetcher.clone()).await.unwrap();
        assert_eq!(stale, first);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let refreshed = cache.peek(&key).await.unwrap().into_profile().unwrap();
        assert_eq!(refreshed.followers_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_patch_supersedes_inflight_fetch() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = counting_fetcher(calls.clone(), Duration::from_millis(100));
        let key = QueryKey::profile("did:plc:alice");

        cache.get(key.clone(), fetcher.clone()).await.unwrap();
        cache.invalidate(&key).await;

        // Starts a background refetch that will finish in 100ms.
        cache.get(key.clone(), fetcher.clone()).await.unwrap();

        let pair = skygate_core::PatchPair::toggle_follow_state("did:plc:alice", None);
        let touched = cache.apply_patch(&pair.forward).await;
        assert_eq!(touched, vec![key.clone()]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The refetch result was discarded; the patched entry survives.
        let current = cache.peek(&key).await.unwrap().into_profile().unwrap();
        assert_eq!(current.followers_count, 1);
        assert!(current.viewer.following.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_fetch_wins_over_slower_older_one() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        // First call is slow, later calls are quick.
        let fetcher: QueryFetcher = Arc::new(move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let delay = if n == 0 { 200 } else { 10 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<_, GatewayError>(QueryData::Profile(profile("did:plc:alice", n as i64)))
            }
            .boxed()
        });
        let key = QueryKey::profile("did:plc:alice");

        let newer = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.refetch(&key).await
        };
        let (older, newer) = tokio::join!(cache.get(key.clone(), fetcher), newer);

        // Each waiter gets its own fetch's result.
        assert_eq!(older.unwrap(), QueryData::Profile(profile("did:plc:alice", 0)));
        assert_eq!(
            newer.unwrap().unwrap(),
            QueryData::Profile(profile("did:plc:alice", 1))
        );

        // The older result landed last but was discarded.
        let current = cache.peek(&key).await.unwrap().into_profile().unwrap();
        assert_eq!(current.followers_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_task_evicts_expired_entries() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let key = QueryKey::profile("did:plc:alice");
        cache
            .get(key.clone(), counting_fetcher(calls, Duration::ZERO))
            .await
            .unwrap();

        let gc = cache.spawn_gc(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(250)).await;
        assert_eq!(cache.len().await, 1);

        // Past the retain window, the next tick drops it.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(cache.is_empty().await);
        assert!(cache.peek(&key).await.is_none());

        gc.abort();
    }

    #[tokio::test]
    async fn test_failed_first_fetch_is_not_cached() {
        let cache = cache();
        let key = QueryKey::thread("at://did:plc:a/app.bsky.feed.post/1");
        let fetcher: QueryFetcher = Arc::new(|| {
            async { Err::<QueryData, _>(GatewayError::remote(Some(404), None, "Post not found")) }
                .boxed()
        });

        let err = cache.get(key.clone(), fetcher).await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(cache.peek(&key).await.is_none());
        assert_eq!(cache.collect_garbage().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_evicts_after_retain_window() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = counting_fetcher(calls, Duration::ZERO);

        cache
            .get(QueryKey::profile("did:plc:alice"), fetcher.clone())
            .await
            .unwrap();
        assert_eq!(cache.collect_garbage().await, 0);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.collect_garbage().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidate_matching() {
        let cache = cache();
        let calls = Arc::new(AtomicU32::new(0));
        let fetcher = counting_fetcher(calls, Duration::ZERO);

        let feed = QueryKey::feed(&FeedDescriptor::Public, 30, None);
        cache.get(feed.clone(), fetcher.clone()).await.unwrap();
        cache
            .get(QueryKey::profile("did:plc:alice"), fetcher.clone())
            .await
            .unwrap();

        assert_eq!(cache.invalidate_matching(QueryKey::is_feed).await, 1);
        assert_eq!(feed.as_str(), "feed:public:30:");
        assert!(!cache.invalidate(&QueryKey::suggestions()).await);
    }

    #[test]
    fn test_generator_listings_ignore_patches() {
        let data = QueryData::Generators(GeneratorPage::default());
        assert!(data.find_post("at://x").is_none());
        let mut data = data;
        let patch = Patch::PostViewer {
            uri: "at://x".into(),
            field: ViewerField::Like,
            value: None,
            count_delta: 1,
        };
        assert!(!data.apply_patch(&patch));
    }
}
