//! # Mutation Engine
//!
//! Executes writes with optimistic local patches.
//!
//! ## Toggle Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Optimistic Toggle                                │
//! │                                                                         │
//! │  observe current flag (cache) ──► PatchPair {forward, compensating}    │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  apply forward to every cached entry ── status: Applying               │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  remote write (retry + one Unauthorized recovery)                      │
//! │        │                                                                │
//! │   ┌────┴─────────────────────┐                                          │
//! │   ▼ ok                       ▼ err                                      │
//! │  swap placeholder for the   apply compensating patch                  │
//! │  server record uri,         status: RolledBack                         │
//! │  invalidate touched keys    return the classified error                │
//! │  status: Committed                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Patches are derived from the flag observed at invocation time. Two rapid
//! toggles on one entity can therefore compensate imperfectly; the next
//! refetch restores authoritative state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use skygate_core::patch::is_placeholder;
use skygate_core::validation::{
    validate_at_uri, validate_blob, validate_cid, validate_did, validate_post_text,
};
use skygate_core::{
    AtUri, BlobRef, NewPost, PatchPair, RecordRef, ValidationError, ViewerField,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{QueryCache, QueryKey};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{collection, RemoteCall, RemoteReply};
use crate::session::SessionManager;

/// How many finished mutations are kept for inspection.
const RECENT_CAPACITY: usize = 32;

// =============================================================================
// Pending Mutations
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Applying,
    Committed,
    RolledBack,
}

/// One mutation, from invocation to its final status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: Uuid,
    pub operation: &'static str,
    /// URI or DID of the affected entity.
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patches: Option<PatchPair>,
    pub status: MutationStatus,
    pub started_at: DateTime<Utc>,
}

/// Result of a like, repost or follow toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    pub mutation_id: Uuid,
    /// Whether the flag is now on.
    pub active: bool,
    /// Server-assigned record when the flag was turned on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_uri: Option<String>,
}

#[derive(Default)]
struct Ledger {
    in_flight: HashMap<Uuid, PendingMutation>,
    recent: VecDeque<PendingMutation>,
}

// =============================================================================
// Mutation Engine
// =============================================================================

pub struct MutationEngine {
    session: Arc<SessionManager>,
    cache: QueryCache,
    ledger: Mutex<Ledger>,
}

impl MutationEngine {
    pub fn new(session: Arc<SessionManager>, cache: QueryCache) -> Self {
        MutationEngine {
            session,
            cache,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    // =========================================================================
    // Toggles
    // =========================================================================

    /// Likes the post, or unlikes it if the cached copy shows a like.
    pub async fn toggle_like(&self, subject: RecordRef) -> GatewayResult<ToggleOutcome> {
        self.toggle_post(subject, ViewerField::Like).await
    }

    /// Reposts the post, or removes the repost.
    pub async fn toggle_repost(&self, subject: RecordRef) -> GatewayResult<ToggleOutcome> {
        self.toggle_post(subject, ViewerField::Repost).await
    }

    /// Follows the actor, or unfollows if the cached profile shows a follow.
    pub async fn toggle_follow(&self, did: &str) -> GatewayResult<ToggleOutcome> {
        validate_did(did)?;
        let repo = self.session.require_actor("follow").await?;

        let current = self
            .cache
            .find_profile(did)
            .await
            .and_then(|profile| profile.viewer.following);
        let pair = PatchPair::toggle_follow_state(did, current);

        let call = match pair.existing_record() {
            None => RemoteCall::Follow {
                repo,
                subject: did.to_string(),
            },
            Some(record) => delete_call(repo, record)?,
        };

        self.run_toggle("follow", did, pair, call).await
    }

    async fn toggle_post(
        &self,
        subject: RecordRef,
        field: ViewerField,
    ) -> GatewayResult<ToggleOutcome> {
        validate_at_uri(&subject.uri)?;
        validate_cid(&subject.cid)?;
        let operation = match field {
            ViewerField::Like => "like",
            ViewerField::Repost => "repost",
        };
        let repo = self.session.require_actor(operation).await?;

        let current = self.cache.find_post(&subject.uri).await.and_then(|post| match field {
            ViewerField::Like => post.viewer.like,
            ViewerField::Repost => post.viewer.repost,
        });
        let pair = PatchPair::toggle_viewer(&subject.uri, field, current);

        let target = subject.uri.clone();
        let call = match (pair.existing_record(), field) {
            (None, ViewerField::Like) => RemoteCall::Like { repo, subject },
            (None, ViewerField::Repost) => RemoteCall::Repost { repo, subject },
            (Some(record), _) => delete_call(repo, record)?,
        };

        self.run_toggle(operation, &target, pair, call).await
    }

    async fn run_toggle(
        &self,
        operation: &'static str,
        target: &str,
        pair: PatchPair,
        call: RemoteCall,
    ) -> GatewayResult<ToggleOutcome> {
        let id = self.begin(operation, target, Some(pair.clone())).await;
        let touched = self.cache.apply_patch(&pair.forward).await;

        match self.session.execute_with_recovery(call).await {
            Ok(reply) => {
                let record_uri = if pair.activates() {
                    reply.into_record().ok().map(|record| record.uri)
                } else {
                    None
                };

                if let Some(uri) = &record_uri {
                    self.cache.apply_patch(&pair.confirm(Some(uri.clone()))).await;
                }
                for key in &touched {
                    self.cache.invalidate(key).await;
                }

                self.finish(id, MutationStatus::Committed).await;
                Ok(ToggleOutcome {
                    mutation_id: id,
                    active: pair.activates(),
                    record_uri,
                })
            }
            Err(err) => {
                let undone = self.cache.apply_patch(&pair.compensating).await;
                // A read landing mid-flight may have stored server state that
                // the compensation then corrupted.
                for key in touched.iter().chain(&undone) {
                    self.cache.invalidate(key).await;
                }
                warn!(operation, target, kind = %err.kind(), error = %err, "Mutation rolled back");
                self.finish(id, MutationStatus::RolledBack).await;
                Err(err)
            }
        }
    }

    // =========================================================================
    // Posts & Blobs
    // =========================================================================

    /// Publishes a post or reply.
    pub async fn create_post(&self, post: NewPost) -> GatewayResult<RecordRef> {
        validate_post_text(&post.text)?;
        if let Some(reply) = &post.reply {
            validate_at_uri(&reply.root.uri)?;
            validate_at_uri(&reply.parent.uri)?;
        }
        let repo = self.session.require_actor("create-post").await?;

        let thread_keys: Vec<QueryKey> = post
            .reply
            .iter()
            .flat_map(|reply| [QueryKey::thread(&reply.root.uri), QueryKey::thread(&reply.parent.uri)])
            .collect();

        let id = self.begin("create-post", &repo, None).await;
        let result = self
            .session
            .execute_with_recovery(RemoteCall::CreatePost { repo, post })
            .await
            .and_then(RemoteReply::into_record);

        match result {
            Ok(record) => {
                self.cache
                    .invalidate_matching(|key| key.is_feed() || thread_keys.contains(key))
                    .await;
                self.finish(id, MutationStatus::Committed).await;
                Ok(record)
            }
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "Post not published");
                self.finish(id, MutationStatus::RolledBack).await;
                Err(err)
            }
        }
    }

    /// Deletes one of the session's own posts.
    pub async fn delete_post(&self, uri: &str) -> GatewayResult<()> {
        let parsed = validate_at_uri(uri)?;
        if parsed.collection != collection::POST {
            return Err(ValidationError::NotAllowed {
                field: "uri".to_string(),
                allowed: vec![collection::POST.to_string()],
            }
            .into());
        }
        let repo = self.session.require_actor("delete-post").await?;

        let id = self.begin("delete-post", uri, None).await;
        let call = RemoteCall::DeleteRecord {
            repo,
            collection: parsed.collection,
            rkey: parsed.rkey,
        };
        let result = self
            .session
            .execute_with_recovery(call)
            .await
            .and_then(RemoteReply::into_deleted);

        match result {
            Ok(()) => {
                let thread = QueryKey::thread(uri);
                self.cache
                    .invalidate_matching(|key| key.is_feed() || key == &thread)
                    .await;
                self.finish(id, MutationStatus::Committed).await;
                Ok(())
            }
            Err(err) => {
                warn!(uri, kind = %err.kind(), error = %err, "Post not deleted");
                self.finish(id, MutationStatus::RolledBack).await;
                Err(err)
            }
        }
    }

    /// Uploads media for a later post.
    pub async fn upload_blob(&self, mime_type: &str, data: Vec<u8>) -> GatewayResult<BlobRef> {
        validate_blob(mime_type, data.len())?;
        self.session.require_actor("upload-blob").await?;

        let call = RemoteCall::UploadBlob {
            mime_type: mime_type.to_string(),
            data,
        };
        let blob = self
            .session
            .execute_with_recovery(call)
            .await
            .and_then(RemoteReply::into_blob)?;

        debug!(mime_type, size = ?blob.size(), "Blob uploaded");
        Ok(blob)
    }

    // =========================================================================
    // Ledger
    // =========================================================================

    /// Mutations still waiting on the remote write.
    pub async fn pending(&self) -> Vec<PendingMutation> {
        let ledger = self.ledger.lock().await;
        let mut pending: Vec<_> = ledger.in_flight.values().cloned().collect();
        pending.sort_by_key(|mutation| mutation.started_at);
        pending
    }

    /// Recently finished mutations, newest first.
    pub async fn recent(&self) -> Vec<PendingMutation> {
        self.ledger.lock().await.recent.iter().cloned().collect()
    }

    async fn begin(&self, operation: &'static str, target: &str, patches: Option<PatchPair>) -> Uuid {
        let mutation = PendingMutation {
            id: Uuid::new_v4(),
            operation,
            target: target.to_string(),
            patches,
            status: MutationStatus::Applying,
            started_at: Utc::now(),
        };
        let id = mutation.id;

        debug!(%id, operation, target, "Mutation started");
        self.ledger.lock().await.in_flight.insert(id, mutation);
        id
    }

    async fn finish(&self, id: Uuid, status: MutationStatus) {
        let mut ledger = self.ledger.lock().await;
        let Some(mut mutation) = ledger.in_flight.remove(&id) else {
            return;
        };
        mutation.status = status;

        info!(%id, operation = mutation.operation, target = %mutation.target, ?status, "Mutation finished");

        ledger.recent.push_front(mutation);
        ledger.recent.truncate(RECENT_CAPACITY);
    }
}

/// Delete call for the record a deactivating toggle removes.
fn delete_call(repo: String, record: &str) -> GatewayResult<RemoteCall> {
    if is_placeholder(record) {
        return Err(ValidationError::InvalidFormat {
            field: "record".to_string(),
            reason: "previous change has not been confirmed yet".to_string(),
        }
        .into());
    }

    let record: AtUri = record.parse()?;
    Ok(RemoteCall::DeleteRecord {
        repo,
        collection: record.collection,
        rkey: record.rkey,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_call_targets_record() {
        let call = delete_call(
            "did:plc:me".into(),
            "at://did:plc:me/app.bsky.feed.like/3kabc",
        )
        .unwrap();
        assert_eq!(
            call,
            RemoteCall::DeleteRecord {
                repo: "did:plc:me".into(),
                collection: "app.bsky.feed.like".into(),
                rkey: "3kabc".into(),
            }
        );
    }

    #[test]
    fn test_delete_call_rejects_placeholder() {
        let err = delete_call("did:plc:me".into(), &skygate_core::patch::placeholder_uri())
            .unwrap_err();
        assert_eq!(err.kind(), skygate_core::ErrorKind::Validation);
    }
}
