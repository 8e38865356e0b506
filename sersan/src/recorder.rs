//! An in-memory session storage geared towards testing.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::store::errors::{
    DestroyAllError, DestroyError, GetError, InsertError, ReplaceError, SessionAlreadyExists,
    SessionDoesNotExist,
};
use crate::store::SessionStorage;
use crate::{Session, SessionId};

#[derive(Debug, Clone, Default)]
/// An in-memory [`SessionStorage`] that records every operation performed on
/// it.
///
/// Nothing is persisted between restarts and nothing is shared between
/// processes: this storage exists so that tests can assert both the final
/// state *and* the exact sequence of storage operations a request produced.
pub struct RecorderStorage(Arc<Mutex<Inner>>);

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    log: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq)]
/// One entry in [`RecorderStorage`]'s operation log.
pub enum Operation {
    /// A [`get`][SessionStorage::get] for the given ID.
    Get(SessionId),
    /// A [`destroy`][SessionStorage::destroy] of the given ID.
    Destroy(SessionId),
    /// A [`destroy_all_of_auth_id`][SessionStorage::destroy_all_of_auth_id]
    /// for the given auth ID.
    DestroyAllOfAuthId(String),
    /// An [`insert`][SessionStorage::insert] of the given ID.
    Insert(SessionId),
    /// A [`replace`][SessionStorage::replace] of the given ID.
    Replace(SessionId),
}

impl RecorderStorage {
    /// Creates a new, empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recorder preloaded with the given sessions.
    ///
    /// The preload does not show up in the operation log.
    pub fn with_sessions(sessions: impl IntoIterator<Item = Session>) -> Self {
        let sessions = sessions.into_iter().map(|s| (s.id, s)).collect();
        Self(Arc::new(Mutex::new(Inner {
            sessions,
            log: Vec::new(),
        })))
    }

    /// A snapshot of the operations performed so far.
    pub async fn operation_log(&self) -> Vec<Operation> {
        self.0.lock().await.log.clone()
    }

    /// Clear the operation log, keeping the stored sessions.
    pub async fn reset_operation_log(&self) {
        self.0.lock().await.log.clear();
    }

    /// The number of live sessions.
    pub async fn len(&self) -> usize {
        self.0.lock().await.sessions.len()
    }

    /// Whether the storage holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.0.lock().await.sessions.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStorage for RecorderStorage {
    #[tracing::instrument(name = "Get session record", level = tracing::Level::TRACE, skip_all)]
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, GetError> {
        let mut inner = self.0.lock().await;
        inner.log.push(Operation::Get(*id));
        Ok(inner.sessions.get(id).cloned())
    }

    #[tracing::instrument(name = "Destroy session record", level = tracing::Level::TRACE, skip_all)]
    async fn destroy(&self, id: &SessionId) -> Result<(), DestroyError> {
        let mut inner = self.0.lock().await;
        inner.log.push(Operation::Destroy(*id));
        inner.sessions.remove(id);
        Ok(())
    }

    #[tracing::instrument(
        name = "Destroy all session records of auth ID",
        level = tracing::Level::TRACE,
        skip_all
    )]
    async fn destroy_all_of_auth_id(&self, auth_id: &str) -> Result<(), DestroyAllError> {
        let mut inner = self.0.lock().await;
        inner.log.push(Operation::DestroyAllOfAuthId(auth_id.to_owned()));
        inner.sessions.retain(|_, sess| sess.auth_id != auth_id);
        Ok(())
    }

    #[tracing::instrument(name = "Insert session record", level = tracing::Level::TRACE, skip_all)]
    async fn insert(&self, sess: &Session) -> Result<(), InsertError> {
        let mut inner = self.0.lock().await;
        inner.log.push(Operation::Insert(sess.id));
        if let Some(old) = inner.sessions.get(&sess.id) {
            return Err(SessionAlreadyExists {
                old: Box::new(old.clone()),
                new: Box::new(sess.clone()),
            }
            .into());
        }
        inner.sessions.insert(sess.id, sess.clone());
        Ok(())
    }

    #[tracing::instrument(name = "Replace session record", level = tracing::Level::TRACE, skip_all)]
    async fn replace(&self, sess: &Session) -> Result<(), ReplaceError> {
        let mut inner = self.0.lock().await;
        inner.log.push(Operation::Replace(sess.id));
        if !inner.sessions.contains_key(&sess.id) {
            return Err(SessionDoesNotExist {
                session: Box::new(sess.clone()),
            }
            .into());
        }
        inner.sessions.insert(sess.id, sess.clone());
        Ok(())
    }
}
