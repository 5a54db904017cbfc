//! # Domain Types
//!
//! Records read from the remote protocol plus the session types owned by the
//! Session Manager.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  SESSION                           CONTENT                              │
//! │  ┌─────────────────┐               ┌─────────────────┐                  │
//! │  │  Credentials    │  persisted    │    FeedPage     │                  │
//! │  │  accessToken    │  as a blob    │  cursor         │                  │
//! │  │  refreshToken   │               │  feed: [Item]   │                  │
//! │  │  actorHandle/Id │               └────────┬────────┘                  │
//! │  └────────▲────────┘                        ▼                           │
//! │           │ From                   ┌─────────────────┐                  │
//! │  ┌────────┴────────┐               │    PostView     │                  │
//! │  │TransportSession │  wire shape   │  uri, cid       │                  │
//! │  │ accessJwt ...   │               │  likeCount      │                  │
//! │  └─────────────────┘               │  viewer.like    │  ← patched       │
//! │                                    └─────────────────┘    optimistically│
//! │  Endpoint: Authenticated | Public                                       │
//! │  HostPlatform: Native | Web                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Remote records use the protocol's camelCase field names so they
//! deserialize straight from response bodies; unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// =============================================================================
// Host Platform & Endpoint
// =============================================================================

/// The kind of host the gateway runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPlatform {
    /// Mobile/desktop host. Remote reads always need a session.
    #[default]
    Native,
    /// Browser host. May read from the public endpoint while logged out.
    Web,
}

impl HostPlatform {
    /// Returns true if unauthenticated reads may use the public endpoint.
    pub fn allows_public_reads(&self) -> bool {
        matches!(self, HostPlatform::Web)
    }
}

impl std::fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostPlatform::Native => write!(f, "native"),
            HostPlatform::Web => write!(f, "web"),
        }
    }
}

impl std::str::FromStr for HostPlatform {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" | "mobile" | "desktop" => Ok(HostPlatform::Native),
            "web" | "browser" => Ok(HostPlatform::Web),
            _ => Err(ValidationError::NotAllowed {
                field: "platform".to_string(),
                allowed: vec!["native".to_string(), "web".to_string()],
            }),
        }
    }
}

/// The transport endpoint currently in use. Exactly one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// The account's service, used with a session.
    Authenticated,
    /// The public read-only service, used without a session.
    Public,
}

impl Endpoint {
    /// The endpoint that matches the session state.
    pub fn for_session(has_session: bool) -> Self {
        if has_session {
            Endpoint::Authenticated
        } else {
            Endpoint::Public
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Authenticated => write!(f, "authenticated"),
            Endpoint::Public => write!(f, "public"),
        }
    }
}

// =============================================================================
// Session Types
// =============================================================================

/// Session credentials owned by the Session Manager.
///
/// Replaced wholesale on refresh, destroyed on logout, and persisted as an
/// opaque JSON blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    pub actor_handle: String,
    pub actor_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed: Option<bool>,
    #[serde(default)]
    pub requires_second_factor: Option<bool>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Credentials {
    /// Returns true if both tokens and the actor identity are present.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && !self.actor_id.is_empty()
    }
}

/// Session as the transport holds it, in the protocol's wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportSession {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed: Option<bool>,
    #[serde(default)]
    pub email_auth_factor: Option<bool>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl From<TransportSession> for Credentials {
    fn from(session: TransportSession) -> Self {
        Credentials {
            access_token: session.access_jwt,
            refresh_token: session.refresh_jwt,
            actor_handle: session.handle,
            actor_id: session.did,
            email: session.email,
            email_confirmed: session.email_confirmed,
            requires_second_factor: session.email_auth_factor,
            is_active: session.active,
        }
    }
}

impl From<&Credentials> for TransportSession {
    fn from(credentials: &Credentials) -> Self {
        TransportSession {
            access_jwt: credentials.access_token.clone(),
            refresh_jwt: credentials.refresh_token.clone(),
            handle: credentials.actor_handle.clone(),
            did: credentials.actor_id.clone(),
            email: credentials.email.clone(),
            email_confirmed: credentials.email_confirmed,
            email_auth_factor: credentials.requires_second_factor,
            active: credentials.is_active,
        }
    }
}

/// Persisted summary of the logged-in actor's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl From<&ProfileView> for ProfileSummary {
    fn from(profile: &ProfileView) -> Self {
        ProfileSummary {
            did: profile.did.clone(),
            handle: profile.handle.clone(),
            display_name: profile.display_name.clone(),
            avatar: profile.avatar.clone(),
        }
    }
}

// =============================================================================
// Profiles
// =============================================================================

/// Minimal actor reference embedded in posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBasic {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// The viewer's relationship to a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewerState {
    /// URI of the viewer's follow record, if following.
    #[serde(default)]
    pub following: Option<String>,
    #[serde(default)]
    pub followed_by: Option<String>,
}

/// Full profile view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub did: String,
    pub handle: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub follows_count: i64,
    #[serde(default)]
    pub posts_count: i64,
    #[serde(default)]
    pub viewer: ProfileViewerState,
}

// =============================================================================
// Posts
// =============================================================================

/// Strong reference to a record: its URI plus content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

/// Reply pointers stored in a post record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: RecordRef,
    pub parent: RecordRef,
}

/// The post record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
}

/// The viewer's relationship to a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostViewerState {
    /// URI of the viewer's like record, if liked.
    #[serde(default)]
    pub like: Option<String>,
    /// URI of the viewer's repost record, if reposted.
    #[serde(default)]
    pub repost: Option<String>,
}

/// A hydrated post as served by feeds and threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileBasic,
    pub record: PostRecord,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub repost_count: i64,
    #[serde(default)]
    pub like_count: i64,
    pub indexed_at: DateTime<Utc>,
    #[serde(default)]
    pub viewer: PostViewerState,
}

impl PostView {
    /// Strong reference to this post.
    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            uri: self.uri.clone(),
            cid: self.cid.clone(),
        }
    }
}

/// Why a post appears in a feed (e.g., reposted by someone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedReason {
    #[serde(default)]
    pub by: Option<ProfileBasic>,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
}

/// One entry of a feed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub post: PostView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FeedReason>,
}

impl FeedItem {
    /// Timestamp used for recency ordering: the repost time when reposted,
    /// otherwise when the post was indexed.
    pub fn sort_at(&self) -> DateTime<Utc> {
        self.reason
            .as_ref()
            .and_then(|reason| reason.indexed_at)
            .unwrap_or(self.post.indexed_at)
    }
}

/// A page of feed items plus the cursor for the next page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default)]
    pub feed: Vec<FeedItem>,
}

impl FeedPage {
    /// A successful page with no content and no cursor.
    pub fn empty() -> Self {
        FeedPage::default()
    }

    pub fn is_empty(&self) -> bool {
        self.feed.is_empty()
    }
}

/// A post with its ancestors and replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadView {
    pub post: PostView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<ThreadView>>,
    #[serde(default)]
    pub replies: Vec<ThreadView>,
}

/// A feed generator listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedGeneratorView {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub like_count: i64,
}

/// Opaque blob reference returned by an upload, embedded back into records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(pub serde_json::Value);

impl BlobRef {
    pub fn mime_type(&self) -> Option<&str> {
        self.0.get("mimeType").and_then(|value| value.as_str())
    }

    pub fn size(&self) -> Option<u64> {
        self.0.get("size").and_then(|value| value.as_u64())
    }
}

/// An image attached to a new post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub blob: BlobRef,
    #[serde(default)]
    pub alt: String,
}

/// A post the caller wants to publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPost {
    pub text: String,
    #[serde(default)]
    pub reply: Option<ReplyRef>,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
}

impl NewPost {
    pub fn new(text: impl Into<String>) -> Self {
        NewPost {
            text: text.into(),
            reply: None,
            images: Vec::new(),
        }
    }

    pub fn reply_to(mut self, root: RecordRef, parent: RecordRef) -> Self {
        self.reply = Some(ReplyRef { root, parent });
        self
    }
}

// =============================================================================
// Record URIs
// =============================================================================

/// Parsed `at://<repo>/<collection>/<rkey>` record URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtUri {
    pub repo: String,
    pub collection: String,
    pub rkey: String,
}

impl std::str::FromStr for AtUri {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field: "uri".to_string(),
            reason: reason.to_string(),
        };

        let rest = s
            .strip_prefix("at://")
            .ok_or_else(|| invalid("must start with at://"))?;
        let mut parts = rest.splitn(3, '/');
        let repo = parts.next().unwrap_or_default();
        let collection = parts.next().unwrap_or_default();
        let rkey = parts.next().unwrap_or_default();

        if repo.is_empty() || collection.is_empty() || rkey.is_empty() || rkey.contains('/') {
            return Err(invalid("expected at://<repo>/<collection>/<rkey>"));
        }

        Ok(AtUri {
            repo: repo.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        })
    }
}

impl std::fmt::Display for AtUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at://{}/{}/{}", self.repo, self.collection, self.rkey)
    }
}
