/*!
Server-side HTTP sessions.

The server holds the authoritative session state, keyed by an opaque 32-byte
identifier; the client carries only that identifier, signed, inside a cookie.
[`ServerSessionState`] is the per-application bundle gluing the pieces
together: a [`SessionStorage`] backend, a [`SessionCodec`][codec::SessionCodec]
for the cookie value, the idle/absolute timeout policy and the cookie
attributes.

Handlers see the session as a flat map of JSON values. Two keys in that map
are reserved: the configured auth key, which carries the ID of the
authenticated principal, and [`FORCE_INVALIDATE_KEY`], which carries a
[`ForceInvalidate`] directive. Both are consumed when the payload is saved.
Any change to the auth ID — login, logout, switching users — destroys the old
session and re-issues the payload under a fresh ID, which is what defeats
session fixation; `ForceInvalidate::AllSessionIdsOfLoggedUser` additionally
logs the principal out everywhere.

Storage backends implement [`SessionStorage`]. The crate ships
[`RecorderStorage`], an in-memory backend for tests that records its
operation log; `sersan_redis` provides the production Redis backend.

# Example

```no_run
use sersan::{RecorderStorage, ServerSessionState};

# async fn demo() -> Result<(), Box<dyn std::error::Error>> {
let mut state = ServerSessionState::new(RecorderStorage::new(), [b"secret-key".to_vec()]);
state.set_cookie_name("session-name")?;

// One request: load, let the handler mutate the payload, save.
let (mut data, token) = state.load("").await?;
data.insert("theme".to_owned(), serde_json::json!("dark"));
let written = state.save(token, data).await?;
assert!(written.is_some());
# Ok(())
# }
```

Most applications never call [`load`][ServerSessionState::load] and
[`save`][ServerSessionState::save] directly: [`SessionLayer`] does it once
per request and hands the payload to handlers as a [`SessionHandle`] in the
request extensions.
*/
pub mod codec;
pub mod config;
mod id;
mod middleware;
mod recorder;
mod session;
mod state;
pub mod store;

pub use id::{ParseSessionIdError, SessionId};
pub use middleware::{SessionHandle, SessionLayer, SessionService};
pub use recorder::{Operation, RecorderStorage};
pub use session::{ForceInvalidate, Session, SessionMap, FORCE_INVALIDATE_KEY};
pub use state::{
    errors, is_session_expired, next_expires, next_expires_max_age, SaveSessionToken,
    ServerSessionState,
};
pub use store::SessionStorage;
