/*!
A Redis-backed [`SessionStorage`] for `sersan`.

Sessions are stored as serialized blobs under `<prefix><session id>`. A set
at `<prefix>:auth:<auth id>` indexes the sessions of each authenticated
principal, so that "log out everywhere" touches O(sessions-per-user) keys
instead of scanning the keyspace. Every mutating operation runs as a single
server-side Lua script, keeping the primary entry and the index consistent
under concurrent callers.

The store also owns expiry enforcement: every write carries a TTL derived
from the session's next expiry, so rows the application never touches again
still get garbage-collected.
*/
mod serializer;

pub use serializer::{JsonSerializer, MessagePackSerializer, SessionSerializer};

use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use sersan::store::errors::{
    DestroyAllError, DestroyError, GetError, InsertError, ReplaceError, SessionAlreadyExists,
    SessionDoesNotExist,
};
use sersan::store::SessionStorage;
use sersan::{next_expires_max_age, Session, SessionId};
use time::OffsetDateTime;

/// 30 days.
const DEFAULT_EXPIRE: u64 = 86_400 * 30;
/// 7 days.
const DEFAULT_IDLE_TIMEOUT: u64 = 604_800;
/// 60 days.
const DEFAULT_ABSOLUTE_TIMEOUT: u64 = 5_184_000;
const DEFAULT_KEY_PREFIX: &str = "sersan:redis:";

// KEYS[1] - primary key
// KEYS[2] - auth index key, '' when the session is unauthenticated
// ARGV[1] - TTL in seconds
// ARGV[2] - serialized session
const INSERT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return redis.error_reply('session already exists')
end
redis.call('SETEX', KEYS[1], ARGV[1], ARGV[2])
if KEYS[2] ~= '' then
  redis.call('SADD', KEYS[2], KEYS[1])
end
return redis.status_reply('OK')
"#;

// KEYS[1] - primary key
// KEYS[2] - previous auth index key, '' if none
// KEYS[3] - new auth index key, '' if none
// ARGV[1] - TTL in seconds
// ARGV[2] - serialized session
const REPLACE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return redis.error_reply('session does not exist')
end
redis.call('DEL', KEYS[1])
redis.call('SETEX', KEYS[1], ARGV[1], ARGV[2])
if KEYS[2] ~= KEYS[3] then
  if KEYS[2] ~= '' then
    redis.call('SREM', KEYS[2], KEYS[1])
  end
  if KEYS[3] ~= '' then
    redis.call('SADD', KEYS[3], KEYS[1])
  end
end
return redis.status_reply('OK')
"#;

// KEYS[1] - primary key
// KEYS[2] - auth index key, '' if none
const DESTROY_SCRIPT: &str = r#"
redis.call('DEL', KEYS[1])
if KEYS[2] ~= '' then
  redis.call('SREM', KEYS[2], KEYS[1])
end
return true
"#;

// KEYS[1] - auth index key
const DESTROY_ALL_SCRIPT: &str = r#"
local sessions = redis.call('SMEMBERS', KEYS[1])
return redis.call('DEL', KEYS[1], unpack(sessions))
"#;

#[derive(Clone)]
/// A session storage backed by Redis.
pub struct RedisStorage {
    conn: ConnectionManager,
    key_prefix: String,
    default_expire: u64,
    idle_timeout: u64,
    absolute_timeout: u64,
    serializer: Arc<dyn SessionSerializer>,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("connection", &"<ConnectionManager>")
            .field("key_prefix", &self.key_prefix)
            .field("default_expire", &self.default_expire)
            .field("idle_timeout", &self.idle_timeout)
            .field("absolute_timeout", &self.absolute_timeout)
            .field("serializer", &self.serializer)
            .finish()
    }
}

impl RedisStorage {
    /// Create a storage over an established connection manager.
    ///
    /// Pings the server once, so a dead connection fails here rather than on
    /// the first request.
    pub async fn new(conn: ConnectionManager) -> Result<Self, redis::RedisError> {
        let storage = Self {
            conn,
            key_prefix: DEFAULT_KEY_PREFIX.to_owned(),
            default_expire: DEFAULT_EXPIRE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
            serializer: Arc::new(JsonSerializer),
        };
        storage.ping().await?;
        Ok(storage)
    }

    /// Change the prefix shared by every key this storage writes.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Change the TTL, in seconds, applied when a session has no computable
    /// expiry (timeouts disabled) or is already past it.
    pub fn with_default_expire(mut self, seconds: u64) -> Self {
        self.default_expire = seconds;
        self
    }

    /// Change the idle/absolute timeouts, in seconds, used to derive TTLs.
    ///
    /// These should match the timeouts configured on the session state
    /// machine, so the store never drops a row the application still
    /// considers live.
    pub fn with_timeouts(mut self, idle_timeout: u64, absolute_timeout: u64) -> Self {
        self.idle_timeout = idle_timeout;
        self.absolute_timeout = absolute_timeout;
        self
    }

    /// Change how sessions are serialized into storage blobs.
    pub fn with_serializer(mut self, serializer: impl SessionSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn session_key(&self, id: &SessionId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// The auth index key for `auth_id`, or an empty string when the session
    /// is unauthenticated. The scripts treat '' as "no index to touch".
    fn auth_index_key(&self, auth_id: &str) -> String {
        if auth_id.is_empty() {
            String::new()
        } else {
            format!("{}:auth:{}", self.key_prefix, auth_id)
        }
    }

    fn expire_seconds(&self, sess: &Session) -> u64 {
        let age = next_expires_max_age(
            OffsetDateTime::now_utc(),
            sess,
            self.idle_timeout,
            self.absolute_timeout,
        );
        if age <= 0 {
            self.default_expire
        } else {
            age as u64
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<Session>, GetError> {
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| GetError::Other(e.into()))?;
        match bytes {
            Some(bytes) => self
                .serializer
                .deserialize(&bytes)
                .map(Some)
                .map_err(GetError::Deserialization),
            None => Ok(None),
        }
    }
}

fn fetch_failure(e: GetError) -> anyhow::Error {
    match e {
        GetError::Deserialization(e) | GetError::Other(e) => e,
        _ => anyhow::anyhow!("failed to fetch the session"),
    }
}

#[async_trait::async_trait]
impl SessionStorage for RedisStorage {
    #[tracing::instrument(name = "Get session record", level = tracing::Level::INFO, skip_all)]
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, GetError> {
        self.fetch(&self.session_key(id)).await
    }

    #[tracing::instrument(name = "Destroy session record", level = tracing::Level::INFO, skip_all)]
    async fn destroy(&self, id: &SessionId) -> Result<(), DestroyError> {
        let key = self.session_key(id);
        // The blob is opaque to Redis, so the auth index key has to be
        // recovered here before the script runs.
        let sess = self
            .fetch(&key)
            .await
            .map_err(|e| DestroyError::Other(fetch_failure(e)))?;
        let Some(sess) = sess else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let _: bool = Script::new(DESTROY_SCRIPT)
            .key(&key)
            .key(self.auth_index_key(&sess.auth_id))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DestroyError::Other(e.into()))?;
        Ok(())
    }

    #[tracing::instrument(
        name = "Destroy all session records of auth ID",
        level = tracing::Level::INFO,
        skip_all
    )]
    async fn destroy_all_of_auth_id(&self, auth_id: &str) -> Result<(), DestroyAllError> {
        if auth_id.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = Script::new(DESTROY_ALL_SCRIPT)
            .key(self.auth_index_key(auth_id))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DestroyAllError::Other(e.into()))?;
        Ok(())
    }

    #[tracing::instrument(name = "Insert session record", level = tracing::Level::INFO, skip_all)]
    async fn insert(&self, sess: &Session) -> Result<(), InsertError> {
        let key = self.session_key(&sess.id);
        // The script refuses colliding inserts on its own; this read exists
        // to return the structured error carrying both sessions.
        let old = self
            .fetch(&key)
            .await
            .map_err(|e| InsertError::Other(fetch_failure(e)))?;
        if let Some(old) = old {
            return Err(SessionAlreadyExists {
                old: Box::new(old),
                new: Box::new(sess.clone()),
            }
            .into());
        }

        let blob = self
            .serializer
            .serialize(sess)
            .map_err(InsertError::Serialization)?;
        let mut conn = self.conn.clone();
        let _: () = Script::new(INSERT_SCRIPT)
            .key(&key)
            .key(self.auth_index_key(&sess.auth_id))
            .arg(self.expire_seconds(sess))
            .arg(blob)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| InsertError::Other(e.into()))?;
        Ok(())
    }

    #[tracing::instrument(name = "Replace session record", level = tracing::Level::INFO, skip_all)]
    async fn replace(&self, sess: &Session) -> Result<(), ReplaceError> {
        let key = self.session_key(&sess.id);
        // The read doubles as the source of the previous auth index key.
        let old = self
            .fetch(&key)
            .await
            .map_err(|e| ReplaceError::Other(fetch_failure(e)))?;
        let Some(old) = old else {
            return Err(SessionDoesNotExist {
                session: Box::new(sess.clone()),
            }
            .into());
        };

        let blob = self
            .serializer
            .serialize(sess)
            .map_err(ReplaceError::Serialization)?;
        let mut conn = self.conn.clone();
        let _: () = Script::new(REPLACE_SCRIPT)
            .key(&key)
            .key(self.auth_index_key(&old.auth_id))
            .key(self.auth_index_key(&sess.auth_id))
            .arg(self.expire_seconds(sess))
            .arg(blob)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ReplaceError::Other(e.into()))?;
        Ok(())
    }
}
