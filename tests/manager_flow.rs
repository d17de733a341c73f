// tests/manager_flow.rs
// Request lifecycle against the in-memory provider


use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use session_manager::manager::CookieState;
use session_manager::{CodecError, SessionOrigin};
use test_helpers::*;

#[tokio::test]
async fn test_full_request_cycle() {
    let manager = create_test_manager(test_config("memory", "")).await;

    // first request: no cookie
    let start = manager.session_start(&HeaderMap::new()).await.unwrap();
    assert_eq!(start.origin, SessionOrigin::Anonymous);
    start.store.set("username", "user001").unwrap();
    start.store.release().await.unwrap();

    let mut response = HeaderMap::new();
    manager.write_response_headers(&start, &mut response).unwrap();
    let token = start.token.clone().unwrap();
    assert_eq!(cookie_pair(&response), Some(format!("sessionid={}", token)));

    // second request: attached
    let next = manager.session_start(&with_cookie("sessionid", &token)).await.unwrap();
    assert_eq!(next.origin, SessionOrigin::Attached);
    assert_eq!(next.store.get::<String>("username").as_deref(), Some("user001"));

    let mut response = HeaderMap::new();
    manager.write_response_headers(&next, &mut response).unwrap();
    assert!(response.get(SET_COOKIE).is_none());
    assert_eq!(manager.active_session_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_token_survives_manager_restart_with_fixed_keys() {
    let first = create_test_manager(test_config("memory", "")).await;
    let start = first.session_start(&HeaderMap::new()).await.unwrap();
    let token = start.token.unwrap();

    let second = create_test_manager(test_config("memory", "")).await;
    assert_eq!(
        second.cookie_state(&with_cookie("sessionid", &token)),
        CookieState::Valid(start.store.session_id().to_string())
    );
}

#[tokio::test]
async fn test_token_from_other_keys_rejected() {
    let first = create_test_manager(test_config("memory", "")).await;
    let token = first.session_start(&HeaderMap::new()).await.unwrap().token.unwrap();

    let mut config = test_config("memory", "");
    config.hash_key = Some("anotherhashkey".to_string());
    let second = create_test_manager(config).await;
    assert_eq!(
        second.cookie_state(&with_cookie("sessionid", &token)),
        CookieState::Invalid(CodecError::TamperedOrMalformed)
    );
    let start = second.session_start(&with_cookie("sessionid", &token)).await.unwrap();
    assert_eq!(start.origin, SessionOrigin::Anonymous);
}

#[tokio::test]
async fn test_regenerate_moves_values() {
    let manager = create_test_manager(test_config("memory", "")).await;
    let start = manager.session_start(&HeaderMap::new()).await.unwrap();
    start.store.set("role", "admin").unwrap();
    start.store.release().await.unwrap();
    let old_sid = start.store.session_id().to_string();
    let headers = with_cookie("sessionid", start.token.as_deref().unwrap());

    let regenerated = manager.session_regenerate_id(&headers).await.unwrap();
    assert_eq!(regenerated.origin, SessionOrigin::Attached);
    assert_ne!(regenerated.store.session_id(), old_sid);
    assert_eq!(regenerated.store.get::<String>("role").as_deref(), Some("admin"));
    assert!(manager.get_session_store(&old_sid).await.unwrap().is_empty());

    // the old cookie no longer attaches
    let stale = manager.session_start(&headers).await.unwrap();
    assert_eq!(stale.origin, SessionOrigin::Anonymous);
    assert_ne!(stale.store.session_id(), old_sid);
    assert!(stale.token.is_some());
    assert!(stale.store.is_empty());

    let fresh = with_cookie("sessionid", regenerated.token.as_deref().unwrap());
    let next = manager.session_start(&fresh).await.unwrap();
    assert_eq!(next.store.get::<String>("role").as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_regenerate_store_keeps_unreleased_changes() {
    let manager = create_test_manager(test_config("memory", "")).await;
    let start = manager.session_start(&HeaderMap::new()).await.unwrap();
    start.store.set("cart", vec![1, 2, 3]).unwrap();

    let regenerated = manager.regenerate_store(&start.store).await.unwrap();
    assert_eq!(regenerated.store.get::<Vec<i32>>("cart"), Some(vec![1, 2, 3]));
    assert!(regenerated.token.is_some());
}

#[tokio::test]
async fn test_destroy_expires_cookie() {
    let manager = create_test_manager(test_config("memory", "")).await;
    let start = manager.session_start(&HeaderMap::new()).await.unwrap();
    start.store.set("k", "v").unwrap();
    start.store.release().await.unwrap();
    let sid = start.store.session_id().to_string();

    let headers = with_cookie("sessionid", start.token.as_deref().unwrap());
    let removal = manager.session_destroy(&headers).await.unwrap().unwrap();
    let removal = removal.to_str().unwrap();
    assert!(removal.starts_with("sessionid=;"));
    assert!(removal.contains("Max-Age=0"));

    assert!(!manager.provider().exists(&sid).await.unwrap());
    assert_eq!(manager.active_session_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_replayed_cookie_after_destroy_gets_new_session() {
    let manager = create_test_manager(test_config("memory", "")).await;
    let start = manager.session_start(&HeaderMap::new()).await.unwrap();
    start.store.set("username", "user001").unwrap();
    start.store.release().await.unwrap();
    let sid = start.store.session_id().to_string();
    let headers = with_cookie("sessionid", start.token.as_deref().unwrap());

    manager.session_destroy(&headers).await.unwrap();

    let replay = manager.session_start(&headers).await.unwrap();
    assert_eq!(replay.origin, SessionOrigin::Anonymous);
    assert_ne!(replay.store.session_id(), sid);
    assert!(replay.token.is_some());
    assert!(replay.store.get::<String>("username").is_none());

    replay.store.release().await.unwrap();
    assert!(!manager.provider().exists(&sid).await.unwrap());
    assert_eq!(manager.active_session_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_signed_cookie_for_unknown_sid_is_not_adopted() {
    let manager = create_test_manager(test_config("memory", "")).await;
    let token = manager.encode_sid("never-issued").unwrap();

    let start = manager.session_start(&with_cookie("sessionid", &token)).await.unwrap();
    assert_eq!(start.origin, SessionOrigin::Anonymous);
    assert_ne!(start.store.session_id(), "never-issued");
    start.store.release().await.unwrap();
    assert!(!manager.provider().exists("never-issued").await.unwrap());
}

#[tokio::test]
async fn test_corrupt_backend_payload_starts_new_session() {
    let manager = create_test_manager(test_config("memory", "")).await;
    let sid = "corrupted-sid";
    manager.provider().write(sid, b"{not json".to_vec()).await.unwrap();

    let token = manager.encode_sid(sid).unwrap();
    let start = manager.session_start(&with_cookie("sessionid", &token)).await.unwrap();
    assert_eq!(start.origin, SessionOrigin::Anonymous);
    assert_ne!(start.store.session_id(), sid);

    // the undecodable bytes are left alone
    assert!(manager.provider().exists(sid).await.unwrap());
}

#[tokio::test]
async fn test_expired_cookie_is_discarded() {
    let mut config = test_config("memory", "");
    config.cookie_lifetime = 1;
    let manager = create_test_manager(config).await;
    let token = manager.session_start(&HeaderMap::new()).await.unwrap().token.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;
    assert_eq!(
        manager.cookie_state(&with_cookie("sessionid", &token)),
        CookieState::Invalid(CodecError::Expired)
    );
}

#[tokio::test]
async fn test_concurrent_requests_share_manager() {
    let manager = Arc::new(create_test_manager(test_config("memory", "")).await);
    let mut handles = Vec::new();
    for i in 0..32 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let start = manager.session_start(&HeaderMap::new()).await.unwrap();
            start.store.set("n", i).unwrap();
            start.store.release().await.unwrap();
            start.store.session_id().to_string()
        }));
    }

    let sids: HashSet<String> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(sids.len(), 32);
    assert_eq!(manager.active_session_count().await.unwrap(), 32);
}
