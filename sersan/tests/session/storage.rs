//! Storage-contract properties, exercised against the recorder.
use serde_json::json;
use sersan::store::errors::{InsertError, ReplaceError};
use sersan::store::SessionStorage;
use sersan::{RecorderStorage, SessionId};

use crate::fixtures::{generate_session, map, session_with};

#[tokio::test]
async fn insert_then_get_returns_the_same_session() {
    let storage = RecorderStorage::new();
    let sess = generate_session("auth-id");

    storage.insert(&sess).await.unwrap();
    let stored = storage.get(&sess.id).await.unwrap().unwrap();
    assert_eq!(stored, sess);
}

#[tokio::test]
async fn get_of_an_unknown_id_is_none() {
    let storage = RecorderStorage::new();
    assert!(storage.get(&SessionId::random()).await.unwrap().is_none());
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let storage = RecorderStorage::new();
    let sess = generate_session("");

    // Destroying an absent session succeeds.
    storage.destroy(&sess.id).await.unwrap();

    storage.insert(&sess).await.unwrap();
    storage.destroy(&sess.id).await.unwrap();
    assert!(storage.get(&sess.id).await.unwrap().is_none());

    // And destroying it again still succeeds.
    storage.destroy(&sess.id).await.unwrap();
}

#[tokio::test]
async fn insert_on_an_existing_id_fails() {
    let storage = RecorderStorage::new();
    let old = session_with("john", map(&[("a", json!(1))]));
    storage.insert(&old).await.unwrap();

    let mut new = session_with("jane", map(&[("b", json!(2))]));
    new.id = old.id;

    let err = storage.insert(&new).await.unwrap_err();
    let InsertError::AlreadyExists(err) = err else {
        panic!("expected SessionAlreadyExists, got {err:?}");
    };
    assert_eq!(*err.old, old);
    assert_eq!(*err.new, new);

    // The original row is untouched.
    assert_eq!(storage.get(&old.id).await.unwrap().unwrap(), old);
}

#[tokio::test]
async fn replace_on_a_missing_id_fails() {
    let storage = RecorderStorage::new();
    let sess = generate_session("john");

    let err = storage.replace(&sess).await.unwrap_err();
    let ReplaceError::DoesNotExist(err) = err else {
        panic!("expected SessionDoesNotExist, got {err:?}");
    };
    assert_eq!(*err.session, sess);
}

#[tokio::test]
async fn replace_overwrites_wholesale() {
    let storage = RecorderStorage::new();
    let old = session_with("john", map(&[("a", json!(1)), ("b", json!(2))]));
    storage.insert(&old).await.unwrap();

    let mut new = old.clone();
    new.values = map(&[("c", json!(3))]);
    storage.replace(&new).await.unwrap();

    assert_eq!(storage.get(&old.id).await.unwrap().unwrap(), new);
}

#[tokio::test]
async fn destroy_all_of_auth_id_only_touches_that_auth_id() {
    let storage = RecorderStorage::new();

    let master = generate_session("A");
    storage.insert(&master).await.unwrap();
    let mut slaves = Vec::new();
    for _ in 0..200 {
        let sess = generate_session("A");
        storage.insert(&sess).await.unwrap();
        slaves.push(sess);
    }
    let mut others = Vec::new();
    for i in 0..60 {
        let sess = generate_session(&format!("other-{i}"));
        storage.insert(&sess).await.unwrap();
        others.push(sess);
    }

    storage.destroy_all_of_auth_id("A").await.unwrap();

    assert!(storage.get(&master.id).await.unwrap().is_none());
    for sess in &slaves {
        assert!(storage.get(&sess.id).await.unwrap().is_none());
    }
    for sess in &others {
        assert_eq!(storage.get(&sess.id).await.unwrap().unwrap(), *sess);
    }

    // Destroying an auth ID with no sessions left is a no-op.
    storage.destroy_all_of_auth_id("A").await.unwrap();
    assert_eq!(storage.len().await, others.len());
}
