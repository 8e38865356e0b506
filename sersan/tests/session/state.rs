//! End-to-end load/save scenarios against the recorder storage.
use serde_json::json;
use sersan::{
    ForceInvalidate, Operation, RecorderStorage, ServerSessionState, SessionMap,
    FORCE_INVALIDATE_KEY,
};

use crate::fixtures::{map, session_with, state, FailingStorage};

#[tokio::test]
async fn empty_save_is_a_noop() {
    let storage = RecorderStorage::new();
    let state = state(storage.clone());

    let (data, token) = state.load("").await.unwrap();
    assert!(data.is_empty());
    assert!(token.session().is_none());

    let written = state.save(token, data).await.unwrap();
    assert!(written.is_none());
    assert!(storage.operation_log().await.is_empty());
}

#[tokio::test]
async fn first_write_inserts_an_unauthenticated_session() {
    let storage = RecorderStorage::new();
    let state = state(storage.clone());

    let (mut data, token) = state.load("").await.unwrap();
    let now = token.now();
    data.insert("a".to_owned(), json!("b"));

    let sess = state.save(token, data).await.unwrap().unwrap();
    assert_eq!(sess.auth_id, "");
    assert_eq!(sess.values, map(&[("a", json!("b"))]));
    assert_eq!(sess.created_at, now);
    assert_eq!(sess.accessed_at, now);
    assert_eq!(
        storage.operation_log().await,
        vec![Operation::Insert(sess.id)]
    );

    // The stored row is exactly what save returned.
    use sersan::store::SessionStorage as _;
    let stored = storage.get(&sess.id).await.unwrap().unwrap();
    assert_eq!(stored, sess);
}

#[tokio::test]
async fn login_destroys_the_old_session_and_rotates_the_id() {
    let s0 = session_with("", map(&[("foo", json!("bar"))]));
    let storage = RecorderStorage::with_sessions([s0.clone()]);
    let state = state(storage.clone());
    let cookie = state.codec().encode(&s0.id).unwrap();

    let (mut data, token) = state.load(&cookie).await.unwrap();
    assert_eq!(data, map(&[("foo", json!("bar"))]));
    let now = token.now();
    storage.reset_operation_log().await;

    data.insert(state.auth_key.clone(), json!("john"));
    let sess = state.save(token, data).await.unwrap().unwrap();

    assert_ne!(sess.id, s0.id);
    assert_eq!(sess.auth_id, "john");
    assert_eq!(sess.values, map(&[("foo", json!("bar"))]));
    assert_eq!(sess.created_at, now);
    assert_eq!(
        storage.operation_log().await,
        vec![Operation::Destroy(s0.id), Operation::Insert(sess.id)]
    );
}

#[tokio::test]
async fn forced_global_invalidation_logs_out_everywhere() {
    let s1 = session_with("john", map(&[("foo", json!("bar"))]));
    let storage = RecorderStorage::with_sessions([s1.clone()]);
    let state = state(storage.clone());
    let cookie = state.codec().encode(&s1.id).unwrap();

    let (mut data, token) = state.load(&cookie).await.unwrap();
    // The auth ID is recomposed into the payload under the auth key.
    assert_eq!(data[&state.auth_key], json!("john"));
    storage.reset_operation_log().await;

    data.insert(
        FORCE_INVALIDATE_KEY.to_owned(),
        serde_json::to_value(ForceInvalidate::AllSessionIdsOfLoggedUser).unwrap(),
    );
    let sess = state.save(token, data).await.unwrap().unwrap();

    assert_ne!(sess.id, s1.id);
    assert_eq!(sess.auth_id, "john");
    assert_eq!(sess.values, map(&[("foo", json!("bar"))]));
    assert_eq!(
        storage.operation_log().await,
        vec![
            Operation::Destroy(s1.id),
            Operation::DestroyAllOfAuthId("john".to_owned()),
            Operation::Insert(sess.id),
        ]
    );
}

#[tokio::test]
async fn pure_update_replaces_in_place() {
    let s2 = session_with("john", SessionMap::new());
    let storage = RecorderStorage::with_sessions([s2.clone()]);
    let state = state(storage.clone());
    let cookie = state.codec().encode(&s2.id).unwrap();

    let (mut data, token) = state.load(&cookie).await.unwrap();
    let now = token.now();
    storage.reset_operation_log().await;

    data.insert("foo".to_owned(), json!("bar"));
    data.insert("x".to_owned(), json!("y"));
    let sess = state.save(token, data).await.unwrap().unwrap();

    assert_eq!(sess.id, s2.id);
    assert_eq!(sess.auth_id, "john");
    assert_eq!(sess.values, map(&[("foo", json!("bar")), ("x", json!("y"))]));
    assert_eq!(sess.created_at, s2.created_at);
    assert_eq!(sess.accessed_at, now);
    assert_eq!(
        storage.operation_log().await,
        vec![Operation::Replace(s2.id)]
    );
}

#[tokio::test]
async fn logout_destroys_without_a_replacement() {
    let s = session_with("john", SessionMap::new());
    let storage = RecorderStorage::with_sessions([s.clone()]);
    let state = state(storage.clone());
    let cookie = state.codec().encode(&s.id).unwrap();

    let (mut data, token) = state.load(&cookie).await.unwrap();
    storage.reset_operation_log().await;

    // Dropping the auth key logs the user out; with nothing else in the
    // payload there is nothing to persist.
    data.remove(&state.auth_key);
    let written = state.save(token, data).await.unwrap();

    assert!(written.is_none());
    assert_eq!(
        storage.operation_log().await,
        vec![Operation::Destroy(s.id)]
    );
    assert!(storage.is_empty().await);
}

#[tokio::test]
async fn invalid_cookie_signature_is_treated_as_no_cookie() {
    let storage = RecorderStorage::new();
    let state = state(storage.clone());

    let (data, token) = state.load("tampered-cookie-value").await.unwrap();
    assert!(data.is_empty());
    assert!(token.session().is_none());
    // The storage is never consulted for a cookie that fails verification.
    assert!(storage.operation_log().await.is_empty());
}

#[tokio::test]
async fn unknown_session_id_yields_a_fresh_session() {
    let storage = RecorderStorage::new();
    let state = state(storage.clone());
    let id = sersan::SessionId::random();
    let cookie = state.codec().encode(&id).unwrap();

    let (data, token) = state.load(&cookie).await.unwrap();
    assert!(data.is_empty());
    assert!(token.session().is_none());
    assert_eq!(storage.operation_log().await, vec![Operation::Get(id)]);
}

#[tokio::test]
async fn expired_session_yields_a_fresh_session() {
    let mut s = session_with("john", map(&[("foo", json!("bar"))]));
    s.created_at -= time::Duration::days(400);
    s.accessed_at -= time::Duration::days(400);
    let storage = RecorderStorage::with_sessions([s.clone()]);
    let state = state(storage.clone());
    let cookie = state.codec().encode(&s.id).unwrap();

    let (data, token) = state.load(&cookie).await.unwrap();
    assert!(data.is_empty());
    assert!(token.session().is_none());
}

#[tokio::test]
async fn load_with_empty_cookie_never_touches_a_broken_storage() {
    let state = ServerSessionState::new(FailingStorage, [b"key".to_vec()]);
    let (data, token) = state.load("").await.unwrap();
    assert!(data.is_empty());
    assert!(token.session().is_none());
}

#[tokio::test]
async fn storage_failures_propagate_out_of_load() {
    let state = ServerSessionState::new(FailingStorage, [b"key".to_vec()]);
    let cookie = state.codec().encode(&sersan::SessionId::random()).unwrap();
    assert!(state.load(&cookie).await.is_err());
}

#[tokio::test]
async fn storage_failures_propagate_out_of_save() {
    let state = ServerSessionState::new(FailingStorage, [b"key".to_vec()]);
    let (mut data, token) = state.load("").await.unwrap();
    data.insert("a".to_owned(), json!("b"));
    assert!(state.save(token, data).await.is_err());
}
