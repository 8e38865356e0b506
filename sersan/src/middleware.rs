//! Tower middleware binding the session state machine to HTTP requests.
//!
//! The layer loads the session before the inner service runs, shares the
//! payload map with it through a [`SessionHandle`] stored in the request
//! extensions, and saves the session — exactly once — after the inner
//! response is ready, attaching at most one `Set-Cookie` header. Because the
//! save happens before the response is released upstream, no header ever
//! leaves the server ahead of the session write.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use cookie::Cookie;
use futures::future::BoxFuture;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderValue, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tower_layer::Layer;
use tower_service::Service;

use crate::session::{ForceInvalidate, FORCE_INVALIDATE_KEY};
use crate::state::ServerSessionState;
use crate::SessionMap;

#[derive(Clone)]
/// Adds session handling to a Tower service stack.
///
/// ```no_run
/// use sersan::{RecorderStorage, ServerSessionState, SessionLayer};
///
/// let state = ServerSessionState::new(RecorderStorage::new(), [b"secret-key".to_vec()]);
/// // Wraps any `Service<http::Request<_>>`, e.g. via `ServiceBuilder::layer`.
/// let layer = SessionLayer::new(state);
/// # let _ = layer;
/// ```
pub struct SessionLayer {
    state: Arc<ServerSessionState>,
}

impl SessionLayer {
    /// Wrap a configured state bundle into a layer.
    pub fn new(state: ServerSessionState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }
}

impl<S> Layer<S> for SessionLayer {
    type Service = SessionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
/// The service produced by [`SessionLayer`].
pub struct SessionService<S> {
    inner: S,
    state: Arc<ServerSessionState>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for SessionService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let state = self.state.clone();
        // The clone takes the place of `self.inner`: the original, already
        // polled ready, is the one driving this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let cookie_value = session_cookie_value(&req, state.cookie_name());
            let (data, token) = match state.load(cookie_value.as_deref().unwrap_or("")).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::error!(error = %e, "failed to load the session");
                    return Ok(internal_server_error());
                }
            };
            let had_session = token.session().is_some();

            let handle = SessionHandle::new(data, state.auth_key.clone());
            req.extensions_mut().insert(handle.clone());

            let mut response = inner.call(req).await?;

            let data = handle.take();
            match state.save(token, data).await {
                Ok(Some(sess)) => {
                    let encoded = match state.codec().encode(&sess.id) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to encode the session cookie");
                            return Ok(internal_server_error());
                        }
                    };
                    let max_age = state.next_expires_max_age(&sess);
                    append_cookie(&mut response, &session_cookie(&state, encoded, max_age));
                }
                Ok(None) => {
                    // The previous session was invalidated and nothing
                    // replaced it: ask the client to drop the cookie.
                    if had_session {
                        append_cookie(&mut response, &removal_cookie(&state));
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to save the session");
                    return Ok(internal_server_error());
                }
            }
            Ok(response)
        })
    }
}

fn internal_server_error<ResBody: Default>() -> Response<ResBody> {
    let mut response = Response::new(ResBody::default());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// The value of the session cookie attached to the request, if any.
fn session_cookie_value<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers().get_all(COOKIE).iter().find_map(|header| {
        let header = header.to_str().ok()?;
        Cookie::split_parse(header)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == name)
            .map(|cookie| cookie.value().to_owned())
    })
}

fn session_cookie(
    state: &ServerSessionState,
    encoded_id: String,
    max_age: i64,
) -> Cookie<'static> {
    let options = &state.cookie_options;
    let mut cookie = Cookie::new(state.cookie_name().to_owned(), encoded_id);
    if let Some(path) = &options.path {
        cookie.set_path(path.clone());
    }
    if let Some(domain) = &options.domain {
        cookie.set_domain(domain.clone());
    }
    cookie.set_secure(options.secure);
    cookie.set_http_only(options.http_only);
    if let Some(same_site) = options.same_site {
        cookie.set_same_site(same_site);
    }
    // `max_age == 0` means the session never expires: emit a session cookie
    // with no Max-Age attribute at all.
    let max_age = options.max_age.unwrap_or(max_age);
    if max_age > 0 {
        cookie.set_max_age(time::Duration::seconds(max_age));
    } else if max_age < 0 {
        cookie.set_max_age(time::Duration::ZERO);
    }
    cookie
}

fn removal_cookie(state: &ServerSessionState) -> Cookie<'static> {
    let options = &state.cookie_options;
    let mut cookie = Cookie::new(state.cookie_name().to_owned(), "");
    if let Some(path) = &options.path {
        cookie.set_path(path.clone());
    }
    if let Some(domain) = &options.domain {
        cookie.set_domain(domain.clone());
    }
    cookie.make_removal();
    cookie
}

fn append_cookie<B>(response: &mut Response<B>, cookie: &Cookie<'_>) {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(_) => tracing::error!("the session cookie is not a valid header value"),
    }
}

#[derive(Debug, Clone)]
/// A handle to the request's payload map, shared between the middleware and
/// the handler.
///
/// Clones are cheap and all point at the same map. Retrieve it from the
/// request extensions:
///
/// ```ignore
/// let session = req.extensions().get::<SessionHandle>().cloned().unwrap();
/// session.insert("theme", "dark")?;
/// ```
pub struct SessionHandle {
    data: Arc<Mutex<SessionMap>>,
    auth_key: Arc<str>,
}

impl SessionHandle {
    fn new(data: SessionMap, auth_key: String) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            auth_key: auth_key.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionMap> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the value stored under `key`, deserialized as `T`.
    ///
    /// `None` if the key is absent; an error if the stored value does not
    /// have the shape `T` expects.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.lock()
            .get(key)
            .cloned()
            .map(serde_json::from_value)
            .transpose()
    }

    /// Get the raw JSON value stored under `key`.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Store `value` under `key`, serialized to JSON.
    ///
    /// Returns the previous raw value, if the key was already set.
    pub fn insert<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.lock().insert(key.into(), value))
    }

    /// Store a raw JSON value under `key`.
    pub fn insert_value(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.lock().insert(key.into(), value)
    }

    /// Remove the value stored under `key`, returning it.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    /// Remove every value from the payload.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Whether the payload holds no values.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The auth ID bound to this request, if any.
    pub fn auth_id(&self) -> Option<String> {
        self.lock()
            .get(&*self.auth_key)
            .and_then(|v| v.as_str().map(str::to_owned))
    }

    /// Bind the session to an authenticated principal.
    ///
    /// If this differs from the auth ID the request came in with, the old
    /// session is destroyed on save and the payload is re-issued under a
    /// fresh ID.
    pub fn set_auth_id(&self, auth_id: impl Into<String>) {
        self.lock()
            .insert(self.auth_key.to_string(), Value::String(auth_id.into()));
    }

    /// Drop the auth binding: a logout. The current session is destroyed on
    /// save.
    pub fn clear_auth_id(&self) {
        self.lock().remove(&*self.auth_key);
    }

    /// Request forced invalidation when this request's payload is saved.
    pub fn force_invalidate(&self, force: ForceInvalidate) {
        // A unit enum variant always serializes.
        if let Ok(value) = serde_json::to_value(force) {
            self.lock().insert(FORCE_INVALIDATE_KEY.to_owned(), value);
        }
    }

    /// Take the payload map out of the handle, leaving it empty. Called by
    /// the middleware right before the save.
    fn take(&self) -> SessionMap {
        std::mem::take(&mut *self.lock())
    }
}
