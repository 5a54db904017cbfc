//! # Optimistic Patches
//!
//! Every optimistic mutation is modelled as a {forward, compensating} pair
//! computed once, when the mutation is invoked, and applied through one
//! routine: [`Patchable::apply_patch`].
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Optimistic Patch Lifecycle                           │
//! │                                                                         │
//! │  observed state: likeCount=4, viewer.like=None                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PatchPair::toggle_like(post)                                          │
//! │       ├── forward:      viewer.like=Some("pending:<uuid>"), count +1   │
//! │       └── compensating: viewer.like=None,                  count -1    │
//! │       │                                                                 │
//! │       ├── remote write OK   → confirm(real uri), then invalidate       │
//! │       └── remote write FAIL → apply compensating → count=4, like=None  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The pair is derived from the viewer state observed at invocation time.
//! Two overlapping toggles on one entity may therefore produce a
//! compensating patch that does not invert the first; the invalidation that
//! follows every mutation reconciles this.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{FeedItem, FeedPage, PostView, ProfileView, ThreadView};
use crate::PLACEHOLDER_PREFIX;

/// Which viewer flag of a post a patch touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerField {
    Like,
    Repost,
}

impl std::fmt::Display for ViewerField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerField::Like => write!(f, "like"),
            ViewerField::Repost => write!(f, "repost"),
        }
    }
}

/// A single local state change. Sets a viewer flag and shifts its counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Patch {
    /// Viewer like/repost on the post with this URI.
    PostViewer {
        uri: String,
        field: ViewerField,
        value: Option<String>,
        count_delta: i64,
    },
    /// Viewer follow on the profile with this DID.
    ProfileFollow {
        did: String,
        value: Option<String>,
        count_delta: i64,
    },
}

impl Patch {
    /// URI or DID of the entity this patch touches.
    pub fn target(&self) -> &str {
        match self {
            Patch::PostViewer { uri, .. } => uri,
            Patch::ProfileFollow { did, .. } => did,
        }
    }

    /// The flag value this patch writes.
    pub fn value(&self) -> Option<&str> {
        match self {
            Patch::PostViewer { value, .. } | Patch::ProfileFollow { value, .. } => {
                value.as_deref()
            }
        }
    }
}

/// Forward and compensating patches for one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPair {
    pub forward: Patch,
    pub compensating: Patch,
}

impl PatchPair {
    /// Like or unlike, depending on the post's current viewer state.
    pub fn toggle_like(post: &PostView) -> Self {
        Self::toggle_post(post, ViewerField::Like)
    }

    /// Repost or unrepost, depending on the post's current viewer state.
    pub fn toggle_repost(post: &PostView) -> Self {
        Self::toggle_post(post, ViewerField::Repost)
    }

    fn toggle_post(post: &PostView, field: ViewerField) -> Self {
        let current = match field {
            ViewerField::Like => post.viewer.like.clone(),
            ViewerField::Repost => post.viewer.repost.clone(),
        };
        Self::toggle_viewer(&post.uri, field, current)
    }

    /// Toggle of a post viewer flag whose current value was observed
    /// elsewhere (or not at all, in which case `current` is `None`).
    pub fn toggle_viewer(uri: &str, field: ViewerField, current: Option<String>) -> Self {
        let (next, delta) = flip(&current);

        PatchPair {
            forward: Patch::PostViewer {
                uri: uri.to_string(),
                field,
                value: next,
                count_delta: delta,
            },
            compensating: Patch::PostViewer {
                uri: uri.to_string(),
                field,
                value: current,
                count_delta: -delta,
            },
        }
    }

    /// Follow or unfollow, depending on the profile's current viewer state.
    pub fn toggle_follow(profile: &ProfileView) -> Self {
        Self::toggle_follow_state(&profile.did, profile.viewer.following.clone())
    }

    /// Toggle of a follow whose current record was observed elsewhere.
    pub fn toggle_follow_state(did: &str, current: Option<String>) -> Self {
        let (next, delta) = flip(&current);

        PatchPair {
            forward: Patch::ProfileFollow {
                did: did.to_string(),
                value: next,
                count_delta: delta,
            },
            compensating: Patch::ProfileFollow {
                did: did.to_string(),
                value: current,
                count_delta: -delta,
            },
        }
    }

    /// Returns true if the forward patch turns the flag on.
    pub fn activates(&self) -> bool {
        self.forward.value().is_some()
    }

    /// The record the forward patch turns off, if it deactivates.
    pub fn existing_record(&self) -> Option<&str> {
        if self.activates() {
            None
        } else {
            self.compensating.value()
        }
    }

    /// Patch that writes the server-assigned record URI in place of the
    /// placeholder without moving the counter.
    pub fn confirm(&self, record_uri: Option<String>) -> Patch {
        match &self.forward {
            Patch::PostViewer { uri, field, .. } => Patch::PostViewer {
                uri: uri.clone(),
                field: *field,
                value: record_uri,
                count_delta: 0,
            },
            Patch::ProfileFollow { did, .. } => Patch::ProfileFollow {
                did: did.clone(),
                value: record_uri,
                count_delta: 0,
            },
        }
    }
}

fn flip(current: &Option<String>) -> (Option<String>, i64) {
    match current {
        Some(_) => (None, -1),
        None => (Some(placeholder_uri()), 1),
    }
}

/// A fresh placeholder record URI.
pub fn placeholder_uri() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4())
}

/// Returns true if the URI is a placeholder written by an optimistic patch.
pub fn is_placeholder(uri: &str) -> bool {
    uri.starts_with(PLACEHOLDER_PREFIX)
}

// =============================================================================
// Apply Routine
// =============================================================================

/// Anything a patch can be applied to.
pub trait Patchable {
    /// Applies the patch to every matching entity inside `self`.
    ///
    /// Returns true if anything matched.
    fn apply_patch(&mut self, patch: &Patch) -> bool;
}

impl Patchable for PostView {
    fn apply_patch(&mut self, patch: &Patch) -> bool {
        let Patch::PostViewer {
            uri,
            field,
            value,
            count_delta,
        } = patch
        else {
            return false;
        };

        if &self.uri != uri {
            return false;
        }

        match field {
            ViewerField::Like => {
                self.viewer.like = value.clone();
                self.like_count += count_delta;
            }
            ViewerField::Repost => {
                self.viewer.repost = value.clone();
                self.repost_count += count_delta;
            }
        }
        true
    }
}

impl Patchable for ProfileView {
    fn apply_patch(&mut self, patch: &Patch) -> bool {
        let Patch::ProfileFollow {
            did,
            value,
            count_delta,
        } = patch
        else {
            return false;
        };

        if &self.did != did {
            return false;
        }

        self.viewer.following = value.clone();
        self.followers_count += count_delta;
        true
    }
}

impl Patchable for FeedItem {
    fn apply_patch(&mut self, patch: &Patch) -> bool {
        self.post.apply_patch(patch)
    }
}

impl Patchable for FeedPage {
    fn apply_patch(&mut self, patch: &Patch) -> bool {
        self.feed.apply_patch(patch)
    }
}

impl Patchable for ThreadView {
    fn apply_patch(&mut self, patch: &Patch) -> bool {
        let mut matched = self.post.apply_patch(patch);
        if let Some(parent) = self.parent.as_mut() {
            matched |= parent.apply_patch(patch);
        }
        matched |= self.replies.apply_patch(patch);
        matched
    }
}

impl<T: Patchable> Patchable for Vec<T> {
    fn apply_patch(&mut self, patch: &Patch) -> bool {
        // No short-circuit: a post can appear more than once (e.g., reposts).
        self.iter_mut()
            .fold(false, |matched, item| item.apply_patch(patch) | matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PostRecord, PostViewerState, ProfileBasic, ProfileViewerState};
    use chrono::{TimeZone, Utc};

    fn post(uri: &str, likes: i64, like: Option<&str>) -> PostView {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        PostView {
            uri: uri.to_string(),
            cid: "bafy".to_string(),
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
            like_count: likes,
            indexed_at: at,
            viewer: PostViewerState {
                like: like.map(str::to_string),
                repost: None,
            },
        }
    }

    #[test]
    fn test_like_forward_then_compensate_restores_state() {
        let original = post("at://a/app.bsky.feed.post/1", 4, None);
        let pair = PatchPair::toggle_like(&original);
        assert!(pair.activates());

        let mut view = original.clone();
        assert!(view.apply_patch(&pair.forward));
        assert_eq!(view.like_count, 5);
        assert!(view.viewer.like.as_deref().is_some_and(is_placeholder));

        assert!(view.apply_patch(&pair.compensating));
        assert_eq!(view, original);
    }

    #[test]
    fn test_unlike_remembers_existing_record() {
        let original = post("at://a/app.bsky.feed.post/1", 7, Some("at://me/app.bsky.feed.like/9"));
        let pair = PatchPair::toggle_like(&original);
        assert!(!pair.activates());
        assert_eq!(pair.existing_record(), Some("at://me/app.bsky.feed.like/9"));

        let mut view = original.clone();
        view.apply_patch(&pair.forward);
        assert_eq!(view.like_count, 6);
        assert_eq!(view.viewer.like, None);

        view.apply_patch(&pair.compensating);
        assert_eq!(view, original);
    }

    #[test]
    fn test_patch_reaches_every_copy_in_a_page() {
        let target = post("at://a/app.bsky.feed.post/1", 1, None);
        let other = post("at://a/app.bsky.feed.post/2", 1, None);
        let mut page = FeedPage {
            cursor: Some("c".into()),
            feed: vec![
                FeedItem { post: target.clone(), reason: None },
                FeedItem { post: other.clone(), reason: None },
                FeedItem { post: target.clone(), reason: None },
            ],
        };

        let pair = PatchPair::toggle_repost(&target);
        assert!(page.apply_patch(&pair.forward));
        assert_eq!(page.feed[0].post.repost_count, 2);
        assert_eq!(page.feed[1].post, other);
        assert_eq!(page.feed[2].post.repost_count, 2);
    }

    #[test]
    fn test_thread_patch_walks_parent_and_replies() {
        let root = post("at://a/app.bsky.feed.post/root", 0, None);
        let reply = post("at://a/app.bsky.feed.post/reply", 0, None);
        let mut thread = ThreadView {
            post: reply.clone(),
            parent: Some(Box::new(ThreadView {
                post: root.clone(),
                parent: None,
                replies: vec![],
            })),
            replies: vec![],
        };

        let pair = PatchPair::toggle_like(&root);
        assert!(thread.apply_patch(&pair.forward));
        assert_eq!(thread.parent.as_ref().unwrap().post.like_count, 1);
        assert_eq!(thread.post.like_count, 0);
    }

    #[test]
    fn test_follow_and_confirm() {
        let profile = ProfileView {
            did: "did:plc:bob".into(),
            handle: "bob.test".into(),
            display_name: None,
            description: None,
            avatar: None,
            followers_count: 10,
            follows_count: 0,
            posts_count: 0,
            viewer: ProfileViewerState::default(),
        };

        let pair = PatchPair::toggle_follow(&profile);
        let mut view = profile.clone();
        view.apply_patch(&pair.forward);
        assert_eq!(view.followers_count, 11);

        let confirmed = pair.confirm(Some("at://me/app.bsky.graph.follow/1".into()));
        view.apply_patch(&confirmed);
        assert_eq!(view.followers_count, 11);
        assert_eq!(view.viewer.following.as_deref(), Some("at://me/app.bsky.graph.follow/1"));
    }

    #[test]
    fn test_mismatched_patch_is_ignored() {
        let mut view = post("at://a/app.bsky.feed.post/1", 3, None);
        let pair = PatchPair::toggle_like(&post("at://a/app.bsky.feed.post/other", 0, None));
        assert!(!view.apply_patch(&pair.forward));
        assert_eq!(view.like_count, 3);
    }
}
