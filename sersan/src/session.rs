use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::SessionId;

/// The payload attached to a session: a string-keyed bag of JSON values.
pub type SessionMap = HashMap<String, Value>;

/// Reserved payload key carrying a [`ForceInvalidate`] directive.
///
/// The value stored under this key is a directive, not data: it is consumed
/// when the payload is saved and never persisted.
pub const FORCE_INVALIDATE_KEY: &str = "_forceinvalidate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A saved session.
pub struct Session {
    /// Primary key. Never reassigned: invalidation always issues a fresh one.
    pub id: SessionId,
    /// The authenticated principal bound to this session.
    /// Empty means unauthenticated.
    pub auth_id: String,
    /// User data, with the auth ID and control directives stripped out.
    pub values: SessionMap,
    /// When this session was created, in UTC.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When this session was last written, in UTC.
    /// `created_at <= accessed_at` always holds.
    #[serde(with = "time::serde::rfc3339")]
    pub accessed_at: OffsetDateTime,
}

impl Session {
    /// A fresh session with an empty payload, created and accessed at `now`.
    pub fn new(id: SessionId, auth_id: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id,
            auth_id: auth_id.into(),
            values: SessionMap::new(),
            created_at: now,
            accessed_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Application-supplied directive requesting session invalidation on save.
///
/// Place it in the payload map under [`FORCE_INVALIDATE_KEY`] — or use
/// [`SessionHandle::force_invalidate`][crate::SessionHandle::force_invalidate]
/// — and the save step picks it up.
pub enum ForceInvalidate {
    /// Invalidate the session that served this request.
    CurrentSessionId,
    /// Invalidate the session that served this request and every other
    /// session bound to the same auth ID ("log out everywhere").
    AllSessionIdsOfLoggedUser,
    /// No forced invalidation. This is the default.
    #[default]
    DontForceInvalidate,
}

/// A payload map split into its session-control parts and the data that
/// actually gets persisted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DecomposedSession {
    pub(crate) auth_id: String,
    pub(crate) force: ForceInvalidate,
    pub(crate) decomposed: SessionMap,
}

/// Strip the auth ID and the force-invalidate directive out of a payload map.
///
/// A non-string value under the auth key cannot name a principal; it is
/// consumed and the request is treated as unauthenticated. Likewise an
/// unrecognised force value falls back to the default.
pub(crate) fn decompose_session(auth_key: &str, mut data: SessionMap) -> DecomposedSession {
    let auth_id = match data.remove(auth_key) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let force = data
        .remove(FORCE_INVALIDATE_KEY)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    DecomposedSession {
        auth_id,
        force,
        decomposed: data,
    }
}

/// Put the auth ID back into the payload map handed to the application.
pub(crate) fn recompose_session(auth_key: &str, auth_id: &str, mut values: SessionMap) -> SessionMap {
    if !auth_id.is_empty() {
        values.insert(auth_key.to_owned(), Value::String(auth_id.to_owned()));
    }
    values
}
