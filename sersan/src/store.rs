use crate::{Session, SessionId};

use errors::{DestroyAllError, DestroyError, GetError, InsertError, ReplaceError};

#[async_trait::async_trait]
/// Where sessions are persisted.
///
/// Implementations must uphold two invariants, under concurrent callers:
/// a session with a non-empty `auth_id` is reachable through the auth index
/// under that ID, and a session with an empty `auth_id` is in no auth index.
/// Sessions are written wholesale — there are no partial updates.
pub trait SessionStorage: std::fmt::Debug + Send + Sync {
    /// Fetch the session with the given ID, or `None` if there is none.
    ///
    /// No expiry filtering happens here: deciding whether a stored session
    /// is still fresh is the caller's job.
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, GetError>;

    /// Remove the session with the given ID, along with its auth-index
    /// membership if it had one.
    ///
    /// Idempotent: destroying an absent session succeeds.
    async fn destroy(&self, id: &SessionId) -> Result<(), DestroyError>;

    /// Remove every session whose `auth_id` equals the argument, atomically
    /// with respect to the auth index.
    ///
    /// Idempotent on empty sets.
    async fn destroy_all_of_auth_id(&self, auth_id: &str) -> Result<(), DestroyAllError>;

    /// Store a brand-new session.
    ///
    /// Fails with [`SessionAlreadyExists`][errors::SessionAlreadyExists] if
    /// the ID is already taken. Registers the session in the auth index when
    /// its `auth_id` is non-empty.
    async fn insert(&self, sess: &Session) -> Result<(), InsertError>;

    /// Overwrite an existing session wholesale.
    ///
    /// Fails with [`SessionDoesNotExist`][errors::SessionDoesNotExist] if no
    /// session with that ID exists. Moves the session between auth-index
    /// buckets if its `auth_id` changed.
    async fn replace(&self, sess: &Session) -> Result<(), ReplaceError>;
}

/// Errors that can occur when interacting with a session storage.
pub mod errors {
    use crate::Session;

    #[derive(Debug, thiserror::Error)]
    #[error("there is already a session with id `{}`", .new.id)]
    /// [`insert`][super::SessionStorage::insert] found a session with the
    /// same ID already in storage.
    pub struct SessionAlreadyExists {
        /// The session already in storage.
        pub old: Box<Session>,
        /// The session whose insertion was refused.
        pub new: Box<Session>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("there is no session with id `{}`", .session.id)]
    /// [`replace`][super::SessionStorage::replace] found no session with the
    /// given ID. It was either never inserted or deleted in the meantime.
    pub struct SessionDoesNotExist {
        /// The session that could not be written.
        pub session: Box<Session>,
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorage::get`][super::SessionStorage::get].
    pub enum GetError {
        /// The stored bytes could not be decoded into a session.
        #[error("failed to deserialize the stored session")]
        Deserialization(#[source] anyhow::Error),
        /// Something else went wrong when fetching the session.
        #[error("something went wrong when fetching the session")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorage::destroy`][super::SessionStorage::destroy].
    pub enum DestroyError {
        /// Something went wrong when destroying the session.
        #[error("something went wrong when destroying the session")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by
    /// [`SessionStorage::destroy_all_of_auth_id`][super::SessionStorage::destroy_all_of_auth_id].
    pub enum DestroyAllError {
        /// Something went wrong when destroying the sessions of the auth ID.
        #[error("something went wrong when destroying the sessions of the auth ID")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorage::insert`][super::SessionStorage::insert].
    pub enum InsertError {
        #[error(transparent)]
        /// A session with the same ID already exists.
        AlreadyExists(#[from] SessionAlreadyExists),
        /// The session could not be serialized for storage.
        #[error("failed to serialize the session")]
        Serialization(#[source] anyhow::Error),
        /// Something else went wrong when inserting the session.
        #[error("something went wrong when inserting the session")]
        Other(#[source] anyhow::Error),
    }

    #[non_exhaustive]
    #[derive(Debug, thiserror::Error)]
    /// The error returned by [`SessionStorage::replace`][super::SessionStorage::replace].
    pub enum ReplaceError {
        #[error(transparent)]
        /// There is no session with the given ID.
        DoesNotExist(#[from] SessionDoesNotExist),
        /// The session could not be serialized for storage.
        #[error("failed to serialize the session")]
        Serialization(#[source] anyhow::Error),
        /// Something else went wrong when replacing the session.
        #[error("something went wrong when replacing the session")]
        Other(#[source] anyhow::Error),
    }
}
