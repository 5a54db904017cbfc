// Session lifecycle scenarios: login, resume, refresh, logout, and the one
// refresh attempt after an Unauthorized failure.

mod common;

use async_trait::async_trait;
use common::*;
use skygate_core::{Credentials, Endpoint, ErrorKind, HostPlatform};
use skygate_sync::store::{CREDENTIALS_KEY, PROFILE_KEY};
use skygate_sync::{
    Gateway, GatewayError, GatewayResult, MemorySessionStore, RemoteReply, SessionStore,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Memory store whose writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemorySessionStore,
    fail_saves: AtomicBool,
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn load(&self, key: &str) -> GatewayResult<Option<String>> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, value: &str) -> GatewayResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(GatewayError::Store("disk full".into()));
        }
        self.inner.save(key, value).await
    }

    async fn remove(&self, key: &str) -> GatewayResult<()> {
        self.inner.remove(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_login_persists_credentials() {
    let h = logged_in(HostPlatform::Native).await;

    assert!(h.gateway.is_authenticated().await);
    assert_eq!(h.gateway.session().endpoint().await, Endpoint::Authenticated);

    let blob = h.store.load(CREDENTIALS_KEY).await.unwrap().unwrap();
    let stored: Credentials = serde_json::from_str(&blob).unwrap();
    assert!(!stored.access_token.is_empty());
    assert!(!stored.refresh_token.is_empty());
    assert_eq!(stored.actor_id, "did:plc:me");

    let summary = h.gateway.profile_summary().await.unwrap();
    assert_eq!(summary.handle, "me.test");
    assert!(h.store.load(PROFILE_KEY).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_login_reverts_to_public() {
    let h = harness(HostPlatform::Web);
    h.transport
        .reject_login(GatewayError::remote(Some(401), Some("AuthenticationRequired".into()), "Invalid identifier or password"));

    let outcome = h.gateway.login("me.test", "wrong").await;

    assert_eq!(outcome.kind(), Some(ErrorKind::Unauthorized));
    assert_eq!(outcome.error(), Some("Invalid identifier or password"));
    assert_eq!(h.transport.calls(CREATE_SESSION), 1);
    assert!(!h.gateway.is_authenticated().await);
    assert_eq!(h.gateway.session().endpoint().await, Endpoint::Public);
    assert!(h.store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_failed_relogin_forgets_previous_account() {
    let h = logged_in(HostPlatform::Native).await;
    assert!(h.gateway.profile("did:plc:me").await.is_success());
    assert!(!h.gateway.cache().is_empty().await);

    h.transport
        .reject_login(GatewayError::remote(Some(401), Some("AuthenticationRequired".into()), "Invalid identifier or password"));
    let outcome = h.gateway.login("other.test", "wrong").await;

    assert_eq!(outcome.kind(), Some(ErrorKind::Unauthorized));
    assert!(!h.gateway.is_authenticated().await);
    assert!(h.gateway.profile_summary().await.is_none());
    assert_eq!(h.gateway.session().endpoint().await, Endpoint::Public);
    assert!(h.gateway.cache().is_empty().await);
    assert!(h.store.is_empty().await);

    // A restart must not bring the old account back.
    let restarted = harness_with(config(HostPlatform::Native), h.store.clone());
    assert!(!restarted.gateway.resume().await);
    assert_eq!(restarted.transport.calls(RESUME_SESSION), 0);
}

#[tokio::test(start_paused = true)]
async fn test_login_rejects_bad_input_without_network() {
    let h = harness(HostPlatform::Web);

    let outcome = h.gateway.login("   ", "secret").await;
    assert_eq!(outcome.kind(), Some(ErrorKind::Validation));

    let outcome = h.gateway.login("me.test", "").await;
    assert_eq!(outcome.kind(), Some(ErrorKind::Validation));

    assert_eq!(h.transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_login_logout_resume_is_unauthenticated() {
    let h = logged_in(HostPlatform::Native).await;

    assert!(h.gateway.logout().await.is_success());
    // Safe to repeat.
    assert!(h.gateway.logout().await.is_success());

    assert!(!h.gateway.resume().await);
    assert!(!h.gateway.is_authenticated().await);
    assert_eq!(h.gateway.session().endpoint().await, Endpoint::Public);
    assert!(h.transport.held_session().is_none());
    assert!(h.store.is_empty().await);
    assert_eq!(h.transport.calls(RESUME_SESSION), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resume_restores_stored_session() {
    let first = logged_in(HostPlatform::Native).await;
    let store = first.store.clone();

    let h = harness_with(config(HostPlatform::Native), store);
    assert!(h.gateway.resume().await);

    assert!(h.gateway.is_authenticated().await);
    assert_eq!(h.gateway.session().endpoint().await, Endpoint::Authenticated);
    assert_eq!(h.transport.calls(RESUME_SESSION), 1);
    assert_eq!(h.gateway.profile_summary().await.unwrap().did, "did:plc:me");
}

#[tokio::test(start_paused = true)]
async fn test_resume_clears_rejected_session() {
    let first = logged_in(HostPlatform::Native).await;
    let store = first.store.clone();

    let h = harness_with(config(HostPlatform::Native), store.clone());
    h.transport.resume_with(Err(GatewayError::remote(
        Some(400),
        Some("ExpiredToken".into()),
        "Token has expired",
    )));

    assert!(!h.gateway.resume().await);
    assert_eq!(h.transport.calls(RESUME_SESSION), 1);
    assert!(!h.gateway.is_authenticated().await);
    assert_eq!(h.gateway.session().endpoint().await, Endpoint::Public);
    assert!(store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_resume_discards_unreadable_record() {
    let store = Arc::new(skygate_sync::MemorySessionStore::new());
    store.save(CREDENTIALS_KEY, "{not json").await.unwrap();

    let h = harness_with(config(HostPlatform::Web), store.clone());

    assert!(!h.gateway.resume().await);
    assert_eq!(h.transport.total_calls(), 0);
    assert!(store.load(CREDENTIALS_KEY).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_captures_renewed_tokens() {
    let h = logged_in(HostPlatform::Native).await;

    let mut renewed = session("did:plc:me", "me.test");
    renewed.access_jwt = "access-renewed".into();
    h.transport.refresh_with(Ok(renewed));
    {
        use skygate_sync::Transport;
        h.transport.refresh_session().await.unwrap();
    }

    assert!(h.gateway.session().refresh().await);
    assert_eq!(
        h.gateway.credentials().await.unwrap().access_token,
        "access-renewed"
    );

    let blob = h.store.load(CREDENTIALS_KEY).await.unwrap().unwrap();
    assert!(blob.contains("access-renewed"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_keeps_captured_tokens_when_save_fails() {
    let store = Arc::new(FlakyStore::default());
    let transport = ScriptedTransport::new();
    let gateway = Gateway::new(config(HostPlatform::Native), transport.clone(), store.clone());

    transport.accept_login(session("did:plc:me", "me.test"));
    transport.reply("get-profile", RemoteReply::Profile(profile("did:plc:me", "me.test")));
    assert!(gateway.login("me.test", "app-password").await.is_success());

    let mut renewed = session("did:plc:me", "me.test");
    renewed.access_jwt = "access-renewed".into();
    transport.refresh_with(Ok(renewed));
    {
        use skygate_sync::Transport;
        transport.refresh_session().await.unwrap();
    }
    store.fail_saves.store(true, Ordering::SeqCst);

    assert!(gateway.session().refresh().await);
    assert_eq!(gateway.credentials().await.unwrap().access_token, "access-renewed");

    let blob = store.load(CREDENTIALS_KEY).await.unwrap().unwrap();
    assert!(!blob.contains("access-renewed"));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_without_session_is_false() {
    let h = harness(HostPlatform::Web);
    assert!(!h.gateway.session().refresh().await);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_read_refreshes_once_and_retries() {
    let h = logged_in(HostPlatform::Native).await;
    let calls_before = h.transport.calls("get-profile");

    let mut renewed = session("did:plc:me", "me.test");
    renewed.access_jwt = "access-2".into();
    h.transport.refresh_with(Ok(renewed));
    h.transport.queue(
        "get-profile",
        Err(GatewayError::remote(Some(401), None, "Unauthorized")),
    );
    h.transport.reply(
        "get-profile",
        RemoteReply::Profile(profile("did:plc:other", "other.test")),
    );

    let outcome = h.gateway.profile("did:plc:other").await;

    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(h.transport.calls(REFRESH_SESSION), 1);
    assert_eq!(h.transport.calls("get-profile") - calls_before, 2);
    assert_eq!(h.gateway.credentials().await.unwrap().access_token, "access-2");
}

#[tokio::test(start_paused = true)]
async fn test_failed_refresh_surfaces_unauthorized() {
    let h = logged_in(HostPlatform::Native).await;
    h.transport.fail(
        "get-profile",
        GatewayError::remote(Some(401), None, "Unauthorized"),
    );

    let outcome = h.gateway.profile("did:plc:other").await;

    assert_eq!(outcome.kind(), Some(ErrorKind::Unauthorized));
    assert_eq!(h.transport.calls(REFRESH_SESSION), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_reruns_operation_once_after_refresh() {
    let h = logged_in(HostPlatform::Native).await;
    h.transport.refresh_with(Ok(session("did:plc:me", "me.test")));
    let runs = &AtomicU32::new(0);

    let result = h
        .gateway
        .session()
        .run_with_recovery(move || async move {
            if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GatewayError::remote(Some(401), None, "Unauthorized"))
            } else {
                Ok(7)
            }
        })
        .await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(h.transport.calls(REFRESH_SESSION), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_skipped_without_session() {
    let h = harness(HostPlatform::Web);
    let runs = &AtomicU32::new(0);

    let result: GatewayResult<()> = h
        .gateway
        .session()
        .run_with_recovery(move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Err(GatewayError::remote(Some(401), None, "Unauthorized"))
        })
        .await;

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Unauthorized);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(h.transport.calls(REFRESH_SESSION), 0);
}
