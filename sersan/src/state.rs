use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::codec::{SessionCodec, SignedCodec};
use crate::config::{is_valid_cookie_name, CookieOptions, InvalidCookieName};
use crate::session::{decompose_session, recompose_session, DecomposedSession, ForceInvalidate};
use crate::store::SessionStorage;
use crate::{Session, SessionId, SessionMap};

use errors::{LoadError, SaveError};

const DEFAULT_COOKIE_NAME: &str = "sersan:session";
const DEFAULT_AUTH_KEY: &str = "_authid";
/// 7 days.
const DEFAULT_IDLE_TIMEOUT: u64 = 604_800;
/// 60 days.
const DEFAULT_ABSOLUTE_TIMEOUT: u64 = 5_184_000;

/// The instant at which `sess` stops being acceptable, given an idle and an
/// absolute timeout in seconds (0 disables either).
///
/// When both timeouts are active the earlier deadline wins. `None` means the
/// session never expires through this mechanism.
pub fn next_expires(
    sess: &Session,
    idle_timeout: u64,
    absolute_timeout: u64,
) -> Option<OffsetDateTime> {
    let idle =
        (idle_timeout != 0).then(|| sess.accessed_at + Duration::seconds(idle_timeout as i64));
    let absolute = (absolute_timeout != 0)
        .then(|| sess.created_at + Duration::seconds(absolute_timeout as i64));
    match (idle, absolute) {
        (Some(idle), Some(absolute)) => Some(idle.min(absolute)),
        (idle, absolute) => idle.or(absolute),
    }
}

/// Whether `sess` is expired at `now`.
pub fn is_session_expired(
    now: OffsetDateTime,
    sess: &Session,
    idle_timeout: u64,
    absolute_timeout: u64,
) -> bool {
    next_expires(sess, idle_timeout, absolute_timeout).is_some_and(|expires| expires <= now)
}

/// The `Max-Age` to put on the session cookie at `now`: `0` when the session
/// never expires (emit a session cookie with no `Max-Age` attribute), `-1`
/// when it is already expired (ask the client to drop the cookie), the
/// remaining whole seconds otherwise.
pub fn next_expires_max_age(
    now: OffsetDateTime,
    sess: &Session,
    idle_timeout: u64,
    absolute_timeout: u64,
) -> i64 {
    match next_expires(sess, idle_timeout, absolute_timeout) {
        None => 0,
        Some(expires) if expires <= now => -1,
        Some(expires) => (expires - now).whole_seconds(),
    }
}

#[derive(Debug)]
/// Everything the session state machine needs in order to work: the storage
/// backend, the cookie codec, the timeout policy and the cookie attributes.
///
/// This is a plain configuration bundle, not a singleton — build one per
/// application and hand it to the middleware explicitly.
pub struct ServerSessionState {
    cookie_name: String,
    /// The payload key under which the auth ID is exposed to handlers.
    ///
    /// Writing a different value under this key is what logs a user in or
    /// out; the key itself never reaches storage.
    pub auth_key: String,
    storage: Arc<dyn SessionStorage>,
    codec: Arc<dyn SessionCodec>,
    /// Attributes applied to the emitted session cookie.
    pub cookie_options: CookieOptions,
    /// Seconds since the last access before a session expires. 0 disables.
    pub idle_timeout: u64,
    /// Seconds since creation before a session expires regardless of
    /// activity. 0 disables.
    pub absolute_timeout: u64,
}

impl ServerSessionState {
    /// Create a state bundle over `storage`, signing cookies with `keys`.
    ///
    /// The first key signs outgoing cookies; every key is tried, in order,
    /// when verifying incoming ones (see [`SignedCodec`]).
    pub fn new(
        storage: impl SessionStorage + 'static,
        keys: impl IntoIterator<Item = Vec<u8>>,
    ) -> Self {
        Self::with_codec(storage, SignedCodec::new(keys))
    }

    /// Create a state bundle with a custom cookie codec.
    pub fn with_codec(
        storage: impl SessionStorage + 'static,
        codec: impl SessionCodec + 'static,
    ) -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_owned(),
            auth_key: DEFAULT_AUTH_KEY.to_owned(),
            storage: Arc::new(storage),
            codec: Arc::new(codec),
            cookie_options: CookieOptions::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
        }
    }

    /// The name of the session cookie.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Change the name of the session cookie.
    ///
    /// Names that are not valid RFC 6265 tokens are rejected and the current
    /// name stays in place.
    pub fn set_cookie_name(&mut self, name: impl Into<String>) -> Result<(), InvalidCookieName> {
        let name = name.into();
        if !is_valid_cookie_name(&name) {
            return Err(InvalidCookieName { name });
        }
        self.cookie_name = name;
        Ok(())
    }

    /// The codec used to encode session IDs into cookie values.
    pub fn codec(&self) -> &dyn SessionCodec {
        &*self.codec
    }

    /// See [`next_expires`], with this bundle's timeouts.
    pub fn next_expires(&self, sess: &Session) -> Option<OffsetDateTime> {
        next_expires(sess, self.idle_timeout, self.absolute_timeout)
    }

    /// See [`is_session_expired`], with this bundle's timeouts.
    pub fn is_session_expired(&self, now: OffsetDateTime, sess: &Session) -> bool {
        is_session_expired(now, sess, self.idle_timeout, self.absolute_timeout)
    }

    /// See [`next_expires_max_age`], with this bundle's timeouts, at the
    /// current instant.
    pub fn next_expires_max_age(&self, sess: &Session) -> i64 {
        next_expires_max_age(
            OffsetDateTime::now_utc(),
            sess,
            self.idle_timeout,
            self.absolute_timeout,
        )
    }

    /// Load the payload map for an incoming cookie value.
    ///
    /// An empty value, a value that fails codec verification, an unknown
    /// session ID and an expired session all yield an empty payload: the
    /// request proceeds as a fresh, unauthenticated one. Only storage
    /// failures surface as errors.
    ///
    /// The returned token must be handed back to [`save`](Self::save) at the
    /// end of the request, so the whole read-modify-write cycle shares one
    /// timestamp.
    pub async fn load(
        &self,
        cookie_value: &str,
    ) -> Result<(SessionMap, SaveSessionToken), LoadError> {
        let now = OffsetDateTime::now_utc();
        let fresh = (SessionMap::new(), SaveSessionToken { sess: None, now });

        if cookie_value.is_empty() {
            return Ok(fresh);
        }
        let Some(id) = self.codec.decode(cookie_value) else {
            return Ok(fresh);
        };
        if let Some(sess) = self.storage.get(&id).await? {
            if !self.is_session_expired(now, &sess) {
                let data = recompose_session(&self.auth_key, &sess.auth_id, sess.values.clone());
                return Ok((
                    data,
                    SaveSessionToken {
                        sess: Some(sess),
                        now,
                    },
                ));
            }
            tracing::debug!(session.id = %id, "stored session has expired, starting fresh");
        }
        Ok(fresh)
    }

    /// Persist the payload map a handler produced.
    ///
    /// Returns the session that was written, or `None` when there was nothing
    /// to persist — no previous session, no auth ID, empty payload. Any
    /// change to the auth binding (login, logout, switching users) destroys
    /// the old session and re-issues the payload under a fresh ID, so a
    /// fixated pre-authentication ID never survives authentication.
    pub async fn save(
        &self,
        token: SaveSessionToken,
        data: SessionMap,
    ) -> Result<Option<Session>, SaveError> {
        let decomposed = decompose_session(&self.auth_key, data);
        let SaveSessionToken { sess, now } = token;
        let sess = self.invalidate_if_needed(sess, &decomposed).await?;
        self.save_session_on_db(now, sess, decomposed).await
    }

    /// Invalidate the old session if needed, returning the session the save
    /// should replace, if any.
    async fn invalidate_if_needed(
        &self,
        sess: Option<Session>,
        decomposed: &DecomposedSession,
    ) -> Result<Option<Session>, SaveError> {
        let current_auth_id = sess.as_ref().map(|s| s.auth_id.as_str()).unwrap_or("");
        let invalidate_current = decomposed.force != ForceInvalidate::DontForceInvalidate
            || decomposed.auth_id != current_auth_id;
        let invalidate_others = decomposed.force == ForceInvalidate::AllSessionIdsOfLoggedUser
            && !decomposed.auth_id.is_empty();

        if let Some(sess) = &sess {
            if invalidate_current {
                self.storage.destroy(&sess.id).await?;
            }
            if invalidate_others {
                self.storage.destroy_all_of_auth_id(&sess.auth_id).await?;
            }
        }

        Ok(if invalidate_current { None } else { sess })
    }

    async fn save_session_on_db(
        &self,
        now: OffsetDateTime,
        sess: Option<Session>,
        decomposed: DecomposedSession,
    ) -> Result<Option<Session>, SaveError> {
        let DecomposedSession {
            auth_id,
            decomposed: values,
            ..
        } = decomposed;

        let Some(old) = sess else {
            if auth_id.is_empty() && values.is_empty() {
                // Nothing to persist: unauthenticated requests that store
                // nothing stay stateless.
                return Ok(None);
            }
            let sess = Session {
                id: SessionId::random(),
                auth_id,
                values,
                created_at: now,
                accessed_at: now,
            };
            self.storage.insert(&sess).await?;
            return Ok(Some(sess));
        };

        let sess = Session {
            id: old.id,
            auth_id,
            values,
            created_at: old.created_at,
            accessed_at: now,
        };
        self.storage.replace(&sess).await?;
        Ok(Some(sess))
    }
}

#[derive(Debug)]
/// Created by [`ServerSessionState::load`], consumed by
/// [`ServerSessionState::save`].
///
/// It carries the session that served the request (if a live one was loaded)
/// and the instant the load ran, which the save reuses as its write time.
pub struct SaveSessionToken {
    sess: Option<Session>,
    now: OffsetDateTime,
}

impl SaveSessionToken {
    /// The session loaded for this request, if any.
    pub fn session(&self) -> Option<&Session> {
        self.sess.as_ref()
    }

    /// The instant this request's load ran.
    pub fn now(&self) -> OffsetDateTime {
        self.now
    }
}

/// Errors surfaced by the session state machine.
pub mod errors {
    use crate::store::errors::{
        DestroyAllError, DestroyError, GetError, InsertError, ReplaceError,
    };

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by
    /// [`ServerSessionState::load`][super::ServerSessionState::load].
    pub enum LoadError {
        #[error("failed to fetch the session from storage")]
        /// The storage backend failed while fetching the session.
        Get(#[from] GetError),
    }

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by
    /// [`ServerSessionState::save`][super::ServerSessionState::save].
    pub enum SaveError {
        #[error("failed to destroy the previous session")]
        /// Invalidation of the current session failed.
        Destroy(#[from] DestroyError),
        #[error("failed to destroy the other sessions of the auth ID")]
        /// Invalidation of the auth ID's other sessions failed.
        DestroyAll(#[from] DestroyAllError),
        #[error("failed to insert the new session")]
        /// Writing the new session failed.
        Insert(#[from] InsertError),
        #[error("failed to replace the session")]
        /// Overwriting the existing session failed.
        Replace(#[from] ReplaceError),
    }
}
