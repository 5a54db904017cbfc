//! # Feed Resolver
//!
//! Turns a [`FeedDescriptor`] into a page of posts.
//!
//! ## Fallback Chain (default feed only)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Default Feed Resolution                          │
//! │                                                                         │
//! │  1. public sources, in order ── first success ──► page (public:i|c)   │
//! │        │ each failure swallowed                                        │
//! │        ▼                                                                │
//! │  2. following (only with a session) ── ok ──────► page (following|c)  │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  3. well-known accounts, concurrently, failures tolerated              │
//! │     merge → dedupe by uri → newest first → truncate ──► page (no c)   │
//! │        │ nothing came back                                             │
//! │        ▼                                                                │
//! │  4. empty page (success)                                               │
//! │                                                                         │
//! │  Explicit descriptors never fall back: they fail loudly.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::future::join_all;
use skygate_core::validation::validate_limit;
use skygate_core::{AuthorFilter, ErrorKind, FeedDescriptor, FeedPage};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::FeedSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{RemoteCall, RemoteReply};
use crate::session::SessionManager;

const PUBLIC_CURSOR_PREFIX: &str = "public:";
const FOLLOWING_CURSOR_TAG: &str = "following";

/// Stage of the fallback chain that produced a page, carried in its cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FallbackCursor {
    Public { index: usize, cursor: String },
    Following { cursor: String },
}

impl FallbackCursor {
    fn parse(raw: &str) -> Option<Self> {
        let (tag, cursor) = raw.split_once('|')?;
        let cursor = cursor.to_string();

        if tag == FOLLOWING_CURSOR_TAG {
            return Some(FallbackCursor::Following { cursor });
        }

        let index = tag.strip_prefix(PUBLIC_CURSOR_PREFIX)?.parse().ok()?;
        Some(FallbackCursor::Public { index, cursor })
    }

    fn encode(&self) -> String {
        match self {
            FallbackCursor::Public { index, cursor } => {
                format!("{}{}|{}", PUBLIC_CURSOR_PREFIX, index, cursor)
            }
            FallbackCursor::Following { cursor } => {
                format!("{}|{}", FOLLOWING_CURSOR_TAG, cursor)
            }
        }
    }
}

/// Resolves feed descriptors against the remote service.
pub struct FeedResolver {
    session: Arc<SessionManager>,
    settings: FeedSettings,
}

impl FeedResolver {
    pub fn new(session: Arc<SessionManager>, settings: FeedSettings) -> Self {
        FeedResolver { session, settings }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Resolves one page of a feed.
    ///
    /// Never fails for [`FeedDescriptor::Public`] except on an invalid
    /// limit; every other descriptor surfaces its failure.
    pub async fn resolve(
        &self,
        descriptor: &FeedDescriptor,
        limit: u32,
        cursor: Option<&str>,
    ) -> GatewayResult<FeedPage> {
        validate_limit(limit)?;

        if descriptor.requires_session() && !self.session.is_authenticated().await {
            return Err(GatewayError::not_authenticated("get-timeline"));
        }

        let cursor = cursor.map(str::to_string);
        let call = match descriptor {
            FeedDescriptor::Public => return Ok(self.resolve_default(limit, cursor).await),
            FeedDescriptor::Following => RemoteCall::GetTimeline { limit, cursor },
            FeedDescriptor::Author { actor, filter } => RemoteCall::GetAuthorFeed {
                actor: actor.clone(),
                filter: *filter,
                limit,
                cursor,
            },
            FeedDescriptor::Generator { uri } => RemoteCall::GetFeed {
                feed: uri.clone(),
                limit,
                cursor,
            },
            FeedDescriptor::Likes { actor } => RemoteCall::GetActorLikes {
                actor: actor.clone(),
                limit,
                cursor,
            },
            FeedDescriptor::List { uri } => RemoteCall::GetListFeed {
                list: uri.clone(),
                limit,
                cursor,
            },
        };

        match self.fetch(call).await {
            Err(err) if matches!(descriptor, FeedDescriptor::Likes { .. }) && likes_unavailable(&err) => {
                debug!(%descriptor, error = %err, "Likes not visible, serving empty page");
                Ok(FeedPage::empty())
            }
            other => other,
        }
    }

    async fn fetch(&self, call: RemoteCall) -> GatewayResult<FeedPage> {
        self.session
            .execute_with_recovery(call)
            .await
            .and_then(RemoteReply::into_feed)
    }

    // =========================================================================
    // Fallback Chain
    // =========================================================================

    async fn resolve_default(&self, limit: u32, cursor: Option<String>) -> FeedPage {
        if let Some(raw) = cursor {
            return self.resume_stage(limit, &raw).await;
        }

        for (index, source) in self.settings.public_sources.iter().enumerate() {
            match self.fetch_generator(source, limit, None).await {
                Ok(page) => {
                    info!(source = %source, "Default feed served by public source");
                    return tag_page(page, |cursor| FallbackCursor::Public { index, cursor });
                }
                Err(err) => {
                    warn!(source = %source, kind = %err.kind(), error = %err, "Public source failed");
                }
            }
        }

        if self.session.is_authenticated().await {
            match self.fetch_timeline(limit, None).await {
                Ok(page) => {
                    info!("Default feed served by following timeline");
                    return tag_page(page, |cursor| FallbackCursor::Following { cursor });
                }
                Err(err) => {
                    warn!(kind = %err.kind(), error = %err, "Following fallback failed");
                }
            }
        }

        let page = self.aggregate_accounts(limit).await;
        if page.is_empty() {
            warn!("Every fallback source exhausted, serving empty page");
        } else {
            info!(posts = page.feed.len(), "Default feed served by account aggregation");
        }
        page
    }

    /// Continues the stage named by a tagged cursor. A failure, or a cursor
    /// that names no stage, ends the feed.
    async fn resume_stage(&self, limit: u32, raw: &str) -> FeedPage {
        let result = match FallbackCursor::parse(raw) {
            Some(FallbackCursor::Public { index, cursor }) => {
                match self.settings.public_sources.get(index) {
                    Some(source) => self
                        .fetch_generator(source, limit, Some(cursor))
                        .await
                        .map(|page| tag_page(page, |cursor| FallbackCursor::Public { index, cursor })),
                    None => {
                        debug!(index, "Cursor names an unknown public source");
                        return FeedPage::empty();
                    }
                }
            }
            Some(FallbackCursor::Following { cursor }) => {
                if !self.session.is_authenticated().await {
                    return FeedPage::empty();
                }
                self.fetch_timeline(limit, Some(cursor))
                    .await
                    .map(|page| tag_page(page, |cursor| FallbackCursor::Following { cursor }))
            }
            None => {
                debug!(cursor = raw, "Unrecognized default feed cursor");
                return FeedPage::empty();
            }
        };

        result.unwrap_or_else(|err| {
            warn!(kind = %err.kind(), error = %err, "Default feed page failed, ending feed");
            FeedPage::empty()
        })
    }

    async fn fetch_generator(
        &self,
        source: &str,
        limit: u32,
        cursor: Option<String>,
    ) -> GatewayResult<FeedPage> {
        self.fetch(RemoteCall::GetFeed {
            feed: source.to_string(),
            limit,
            cursor,
        })
        .await
    }

    async fn fetch_timeline(&self, limit: u32, cursor: Option<String>) -> GatewayResult<FeedPage> {
        self.fetch(RemoteCall::GetTimeline { limit, cursor }).await
    }

    /// Merges the recent posts of the well-known accounts, newest first.
    async fn aggregate_accounts(&self, limit: u32) -> FeedPage {
        let per_account = self.settings.per_account_limit.clamp(1, skygate_core::MAX_PAGE_LIMIT);

        let fetches = self.settings.fallback_accounts.iter().map(|account| async move {
            let call = RemoteCall::GetAuthorFeed {
                actor: account.clone(),
                filter: AuthorFilter::PostsNoReplies,
                limit: per_account,
                cursor: None,
            };
            match self.fetch(call).await {
                Ok(page) => page.feed,
                Err(err) => {
                    warn!(account = %account, kind = %err.kind(), error = %err, "Account feed failed");
                    Vec::new()
                }
            }
        });

        let mut seen = HashSet::new();
        let mut items: Vec<_> = join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .filter(|item| seen.insert(item.post.uri.clone()))
            .collect();

        items.sort_by_key(|item| std::cmp::Reverse(item.sort_at()));
        items.truncate(limit as usize);

        FeedPage {
            cursor: None,
            feed: items,
        }
    }
}

fn tag_page(mut page: FeedPage, stage: impl FnOnce(String) -> FallbackCursor) -> FeedPage {
    page.cursor = page.cursor.take().map(|cursor| stage(cursor).encode());
    page
}

/// An actor's likes can be hidden or absent; that is not a failure of the
/// feed request itself.
fn likes_unavailable(err: &GatewayError) -> bool {
    err.kind() == ErrorKind::ClientError && matches!(err.status(), Some(400 | 403 | 404))
}
