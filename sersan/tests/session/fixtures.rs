use anyhow::anyhow;
use serde_json::json;
use sersan::store::errors::{
    DestroyAllError, DestroyError, GetError, InsertError, ReplaceError,
};
use sersan::store::SessionStorage;
use sersan::{RecorderStorage, ServerSessionState, Session, SessionId, SessionMap};
use time::OffsetDateTime;

pub const SECRET: &[u8] = b"integration-test-secret-key";

/// A state bundle over the given recorder, with the default configuration.
pub fn state(storage: RecorderStorage) -> ServerSessionState {
    ServerSessionState::new(storage, [SECRET.to_vec()])
}

/// A session created now, with the given auth ID and payload.
pub fn session_with(auth_id: &str, values: SessionMap) -> Session {
    let now = OffsetDateTime::now_utc();
    Session {
        id: SessionId::random(),
        auth_id: auth_id.to_owned(),
        values,
        created_at: now,
        accessed_at: now,
    }
}

/// A session with a handful of random-ish payload entries.
pub fn generate_session(auth_id: &str) -> Session {
    let mut values = SessionMap::new();
    for i in 0..5 {
        values.insert(format!("key-{}-{i}", SessionId::random()), json!(i));
    }
    session_with(auth_id, values)
}

pub fn map(entries: &[(&str, serde_json::Value)]) -> SessionMap {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

#[derive(Debug, Clone, Default)]
/// A storage where every operation fails, to exercise error propagation.
pub struct FailingStorage;

fn boom() -> anyhow::Error {
    anyhow!("storage is down")
}

#[async_trait::async_trait]
impl SessionStorage for FailingStorage {
    async fn get(&self, _id: &SessionId) -> Result<Option<Session>, GetError> {
        Err(GetError::Other(boom()))
    }

    async fn destroy(&self, _id: &SessionId) -> Result<(), DestroyError> {
        Err(DestroyError::Other(boom()))
    }

    async fn destroy_all_of_auth_id(&self, _auth_id: &str) -> Result<(), DestroyAllError> {
        Err(DestroyAllError::Other(boom()))
    }

    async fn insert(&self, _sess: &Session) -> Result<(), InsertError> {
        Err(InsertError::Other(boom()))
    }

    async fn replace(&self, _sess: &Session) -> Result<(), ReplaceError> {
        Err(ReplaceError::Other(boom()))
    }
}
