//! # Remote Protocol Calls
//!
//! The closed set of remote operations the gateway consumes, and their
//! typed replies.
//!
//! ## Call Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Remote Operations                                 │
//! │                                                                         │
//! │  QUERIES (GET, query string)             REPLY                         │
//! │  ───────────────────────────             ─────                         │
//! │  get-timeline          (session)         Feed                          │
//! │  get-author-feed                         Feed                          │
//! │  get-actor-likes                         Feed                          │
//! │  get-feed (generator)                    Feed                          │
//! │  get-list-feed                           Feed                          │
//! │  get-post-thread                         Thread                        │
//! │  get-profile                             Profile                       │
//! │  search-actors / get-suggestions         Actors                        │
//! │  search-posts                            Posts                         │
//! │  get-popular-feed-generators             Generators                    │
//! │                                                                         │
//! │  PROCEDURES (POST, JSON body, all need a session)                      │
//! │  ────────────────────────────────────────────────                      │
//! │  create-post / like / repost / follow    Record {uri, cid}             │
//! │  delete-record                           Deleted                       │
//! │  upload-blob (raw bytes)                 Blob                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use skygate_core::{
    AuthorFilter, BlobRef, FeedGeneratorView, FeedPage, NewPost, PostView, ProfileView,
    RecordRef, ThreadView,
};

use crate::error::{GatewayError, GatewayResult};

/// Record collections written by procedures.
pub mod collection {
    pub const POST: &str = "app.bsky.feed.post";
    pub const LIKE: &str = "app.bsky.feed.like";
    pub const REPOST: &str = "app.bsky.feed.repost";
    pub const FOLLOW: &str = "app.bsky.graph.follow";
}

// =============================================================================
// Calls
// =============================================================================

/// One logical remote call. Each retry attempt sends it exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    GetTimeline {
        limit: u32,
        cursor: Option<String>,
    },
    GetAuthorFeed {
        actor: String,
        filter: AuthorFilter,
        limit: u32,
        cursor: Option<String>,
    },
    GetActorLikes {
        actor: String,
        limit: u32,
        cursor: Option<String>,
    },
    GetFeed {
        feed: String,
        limit: u32,
        cursor: Option<String>,
    },
    GetListFeed {
        list: String,
        limit: u32,
        cursor: Option<String>,
    },
    GetPostThread {
        uri: String,
        depth: Option<u32>,
    },
    GetProfile {
        actor: String,
    },
    SearchActors {
        query: String,
        limit: u32,
        cursor: Option<String>,
    },
    SearchPosts {
        query: String,
        limit: u32,
        cursor: Option<String>,
    },
    GetSuggestions {
        limit: u32,
        cursor: Option<String>,
    },
    GetPopularFeedGenerators {
        limit: u32,
        cursor: Option<String>,
    },
    CreatePost {
        repo: String,
        post: NewPost,
    },
    DeleteRecord {
        repo: String,
        collection: String,
        rkey: String,
    },
    Follow {
        repo: String,
        subject: String,
    },
    Like {
        repo: String,
        subject: RecordRef,
    },
    Repost {
        repo: String,
        subject: RecordRef,
    },
    UploadBlob {
        mime_type: String,
        data: Vec<u8>,
    },
}

impl RemoteCall {
    /// Short operation name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCall::GetTimeline { .. } => "get-timeline",
            RemoteCall::GetAuthorFeed { .. } => "get-author-feed",
            RemoteCall::GetActorLikes { .. } => "get-actor-likes",
            RemoteCall::GetFeed { .. } => "get-feed",
            RemoteCall::GetListFeed { .. } => "get-list-feed",
            RemoteCall::GetPostThread { .. } => "get-post-thread",
            RemoteCall::GetProfile { .. } => "get-profile",
            RemoteCall::SearchActors { .. } => "search-actors",
            RemoteCall::SearchPosts { .. } => "search-posts",
            RemoteCall::GetSuggestions { .. } => "get-suggestions",
            RemoteCall::GetPopularFeedGenerators { .. } => "get-popular-feed-generators",
            RemoteCall::CreatePost { .. } => "create-post",
            RemoteCall::DeleteRecord { .. } => "delete-record",
            RemoteCall::Follow { .. } => "follow",
            RemoteCall::Like { .. } => "like",
            RemoteCall::Repost { .. } => "repost",
            RemoteCall::UploadBlob { .. } => "upload-blob",
        }
    }

    /// XRPC method id.
    pub fn nsid(&self) -> &'static str {
        match self {
            RemoteCall::GetTimeline { .. } => "app.bsky.feed.getTimeline",
            RemoteCall::GetAuthorFeed { .. } => "app.bsky.feed.getAuthorFeed",
            RemoteCall::GetActorLikes { .. } => "app.bsky.feed.getActorLikes",
            RemoteCall::GetFeed { .. } => "app.bsky.feed.getFeed",
            RemoteCall::GetListFeed { .. } => "app.bsky.feed.getListFeed",
            RemoteCall::GetPostThread { .. } => "app.bsky.feed.getPostThread",
            RemoteCall::GetProfile { .. } => "app.bsky.actor.getProfile",
            RemoteCall::SearchActors { .. } => "app.bsky.actor.searchActors",
            RemoteCall::SearchPosts { .. } => "app.bsky.feed.searchPosts",
            RemoteCall::GetSuggestions { .. } => "app.bsky.actor.getSuggestions",
            RemoteCall::GetPopularFeedGenerators { .. } => {
                "app.bsky.unspecced.getPopularFeedGenerators"
            }
            RemoteCall::CreatePost { .. }
            | RemoteCall::Follow { .. }
            | RemoteCall::Like { .. }
            | RemoteCall::Repost { .. } => "com.atproto.repo.createRecord",
            RemoteCall::DeleteRecord { .. } => "com.atproto.repo.deleteRecord",
            RemoteCall::UploadBlob { .. } => "com.atproto.repo.uploadBlob",
        }
    }

    /// Returns true for read-only queries (sent as GET).
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            RemoteCall::GetTimeline { .. }
                | RemoteCall::GetAuthorFeed { .. }
                | RemoteCall::GetActorLikes { .. }
                | RemoteCall::GetFeed { .. }
                | RemoteCall::GetListFeed { .. }
                | RemoteCall::GetPostThread { .. }
                | RemoteCall::GetProfile { .. }
                | RemoteCall::SearchActors { .. }
                | RemoteCall::SearchPosts { .. }
                | RemoteCall::GetSuggestions { .. }
                | RemoteCall::GetPopularFeedGenerators { .. }
        )
    }

    /// Returns true if the call cannot be served without a session.
    pub fn requires_session(&self) -> bool {
        !self.is_query()
            || matches!(
                self,
                RemoteCall::GetTimeline { .. } | RemoteCall::GetSuggestions { .. }
            )
    }

    /// Query-string parameters (queries only).
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        match self {
            RemoteCall::GetTimeline { limit, cursor }
            | RemoteCall::GetSuggestions { limit, cursor }
            | RemoteCall::GetPopularFeedGenerators { limit, cursor } => {
                push_page(&mut params, *limit, cursor)
            }
            RemoteCall::GetAuthorFeed {
                actor,
                filter,
                limit,
                cursor,
            } => {
                params.push(("actor", actor.clone()));
                params.push(("filter", filter.as_str().to_string()));
                push_page(&mut params, *limit, cursor);
            }
            RemoteCall::GetActorLikes {
                actor,
                limit,
                cursor,
            } => {
                params.push(("actor", actor.clone()));
                push_page(&mut params, *limit, cursor);
            }
            RemoteCall::GetFeed {
                feed,
                limit,
                cursor,
            } => {
                params.push(("feed", feed.clone()));
                push_page(&mut params, *limit, cursor);
            }
            RemoteCall::GetListFeed {
                list,
                limit,
                cursor,
            } => {
                params.push(("list", list.clone()));
                push_page(&mut params, *limit, cursor);
            }
            RemoteCall::GetPostThread { uri, depth } => {
                params.push(("uri", uri.clone()));
                if let Some(depth) = depth {
                    params.push(("depth", depth.to_string()));
                }
            }
            RemoteCall::GetProfile { actor } => params.push(("actor", actor.clone())),
            RemoteCall::SearchActors {
                query,
                limit,
                cursor,
            }
            | RemoteCall::SearchPosts {
                query,
                limit,
                cursor,
            } => {
                params.push(("q", query.clone()));
                push_page(&mut params, *limit, cursor);
            }
            _ => {}
        }

        params
    }

    /// JSON body (procedures other than upload-blob).
    pub fn json_body(&self) -> Option<Value> {
        let now = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

        match self {
            RemoteCall::CreatePost { repo, post } => {
                let mut record = json!({
                    "$type": collection::POST,
                    "text": post.text,
                    "createdAt": now,
                });
                if let Some(reply) = &post.reply {
                    record["reply"] = json!(reply);
                }
                if !post.images.is_empty() {
                    let images: Vec<Value> = post
                        .images
                        .iter()
                        .map(|image| json!({ "image": image.blob, "alt": image.alt }))
                        .collect();
                    record["embed"] = json!({
                        "$type": "app.bsky.embed.images",
                        "images": images,
                    });
                }
                Some(json!({
                    "repo": repo,
                    "collection": collection::POST,
                    "record": record,
                }))
            }
            RemoteCall::Like { repo, subject } | RemoteCall::Repost { repo, subject } => {
                let collection = if matches!(self, RemoteCall::Like { .. }) {
                    collection::LIKE
                } else {
                    collection::REPOST
                };
                Some(json!({
                    "repo": repo,
                    "collection": collection,
                    "record": {
                        "$type": collection,
                        "subject": subject,
                        "createdAt": now,
                    },
                }))
            }
            RemoteCall::Follow { repo, subject } => Some(json!({
                "repo": repo,
                "collection": collection::FOLLOW,
                "record": {
                    "$type": collection::FOLLOW,
                    "subject": subject,
                    "createdAt": now,
                },
            })),
            RemoteCall::DeleteRecord {
                repo,
                collection,
                rkey,
            } => Some(json!({
                "repo": repo,
                "collection": collection,
                "rkey": rkey,
            })),
            _ => None,
        }
    }

    /// Decodes a successful response body into the reply for this call.
    pub fn decode_reply(&self, body: Value) -> GatewayResult<RemoteReply> {
        let name = self.name();

        let reply = match self {
            RemoteCall::GetTimeline { .. }
            | RemoteCall::GetAuthorFeed { .. }
            | RemoteCall::GetActorLikes { .. }
            | RemoteCall::GetFeed { .. }
            | RemoteCall::GetListFeed { .. } => RemoteReply::Feed(decode(name, body)?),
            RemoteCall::GetPostThread { .. } => {
                let thread = body.get("thread").and_then(decode_thread).ok_or_else(|| {
                    GatewayError::remote(Some(404), Some("NotFound".into()), "Post not found")
                })?;
                RemoteReply::Thread(thread)
            }
            RemoteCall::GetProfile { .. } => RemoteReply::Profile(decode(name, body)?),
            RemoteCall::SearchActors { .. } | RemoteCall::GetSuggestions { .. } => {
                RemoteReply::Actors(decode(name, body)?)
            }
            RemoteCall::SearchPosts { .. } => RemoteReply::Posts(decode(name, body)?),
            RemoteCall::GetPopularFeedGenerators { .. } => RemoteReply::Generators(decode(name, body)?),
            RemoteCall::CreatePost { .. }
            | RemoteCall::Follow { .. }
            | RemoteCall::Like { .. }
            | RemoteCall::Repost { .. } => RemoteReply::Record(decode(name, body)?),
            RemoteCall::DeleteRecord { .. } => RemoteReply::Deleted,
            RemoteCall::UploadBlob { .. } => {
                let blob = body
                    .get("blob")
                    .cloned()
                    .ok_or_else(|| GatewayError::Protocol("upload-blob: missing blob".into()))?;
                RemoteReply::Blob(BlobRef(blob))
            }
        };

        Ok(reply)
    }
}

fn push_page(params: &mut Vec<(&'static str, String)>, limit: u32, cursor: &Option<String>) {
    params.push(("limit", limit.to_string()));
    if let Some(cursor) = cursor {
        params.push(("cursor", cursor.clone()));
    }
}

fn decode<T: DeserializeOwned>(name: &str, body: Value) -> GatewayResult<T> {
    serde_json::from_value(body).map_err(|e| GatewayError::Protocol(format!("{}: {}", name, e)))
}

/// Decodes a thread node, skipping nodes that carry no post (blocked or
/// deleted entries).
fn decode_thread(node: &Value) -> Option<ThreadView> {
    let post: PostView = serde_json::from_value(node.get("post")?.clone()).ok()?;
    let parent = node.get("parent").and_then(decode_thread).map(Box::new);
    let replies = node
        .get("replies")
        .and_then(Value::as_array)
        .map(|replies| replies.iter().filter_map(decode_thread).collect())
        .unwrap_or_default();

    Some(ThreadView {
        post,
        parent,
        replies,
    })
}

// =============================================================================
// Replies
// =============================================================================

/// A page of actors (search results, suggestions).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub actors: Vec<ProfileView>,
}

/// A page of posts (search results).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub posts: Vec<PostView>,
}

/// A page of feed generators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub feeds: Vec<FeedGeneratorView>,
}

/// Typed reply to a [`RemoteCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteReply {
    Feed(FeedPage),
    Thread(ThreadView),
    Profile(ProfileView),
    Actors(ActorPage),
    Posts(PostPage),
    Generators(GeneratorPage),
    Record(RecordRef),
    Deleted,
    Blob(BlobRef),
}

impl RemoteReply {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteReply::Feed(_) => "feed",
            RemoteReply::Thread(_) => "thread",
            RemoteReply::Profile(_) => "profile",
            RemoteReply::Actors(_) => "actors",
            RemoteReply::Posts(_) => "posts",
            RemoteReply::Generators(_) => "generators",
            RemoteReply::Record(_) => "record",
            RemoteReply::Deleted => "deleted",
            RemoteReply::Blob(_) => "blob",
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
            RemoteReply::Feed(page) => Ok(page),
            other => Err(other.mismatch("feed")),
        }
    }

    pub fn into_thread(self) -> GatewayResult<ThreadView> {
        match self {
            RemoteReply::Thread(thread) => Ok(thread),
            other => Err(other.mismatch("thread")),
        }
    }

    pub fn into_profile(self) -> GatewayResult<ProfileView> {
        match self {
            RemoteReply::Profile(profile) => Ok(profile),
            other => Err(other.mismatch("profile")),
        }
    }

    pub fn into_actors(self) -> GatewayResult<ActorPage> {
        match self {
            RemoteReply::Actors(page) => Ok(page),
            other => Err(other.mismatch("actors")),
        }
    }

    pub fn into_posts(self) -> GatewayResult<PostPage> {
        match self {
            RemoteReply::Posts(page) => Ok(page),
            other => Err(other.mismatch("posts")),
        }
    }

    pub fn into_generators(self) -> GatewayResult<GeneratorPage> {
        match self {
            RemoteReply::Generators(page) => Ok(page),
            other => Err(other.mismatch("generators")),
        }
    }

    pub fn into_record(self) -> GatewayResult<RecordRef> {
        match self {
            RemoteReply::Record(record) => Ok(record),
            other => Err(other.mismatch("record")),
        }
    }

    pub fn into_deleted(self) -> GatewayResult<()> {
        match self {
            RemoteReply::Deleted => Ok(()),
            other => Err(other.mismatch("deleted")),
        }
    }

    pub fn into_blob(self) -> GatewayResult<BlobRef> {
        match self {
            RemoteReply::Blob(blob) => Ok(blob),
            other => Err(other.mismatch("blob")),
        }
    }
}
